//! Log forwarder
//!
//! After readiness, drains the worker's output into the worker log until the
//! stream ends or a stop is requested.

use std::sync::Arc;

use tokio::task::JoinHandle;

use robolaunch_core::prelude::*;
use robolaunch_remote::OutputStream;

use crate::log_sink::LogSink;
use crate::stop_flag::StopFlag;

/// Prefix for lines taken from the worker's error stream
pub const STDERR_PREFIX: &str = "[stderr] ";

/// Spawn the forwarder, taking ownership of both streams.
pub(crate) fn spawn_forwarder(
    output: OutputStream,
    errors: OutputStream,
    sink: Arc<LogSink>,
    stop: StopFlag,
) -> JoinHandle<()> {
    tokio::spawn(forward(output, errors, sink, stop))
}

async fn forward(
    mut output: OutputStream,
    mut errors: OutputStream,
    sink: Arc<LogSink>,
    stop: StopFlag,
) {
    let mut output_open = true;
    let mut errors_open = true;

    while (output_open || errors_open) && !stop.is_raised() {
        // Both reads are cancel safe, so losing a race drops no line
        let record = tokio::select! {
            biased;

            _ = stop.raised() => break,

            line = output.next_line(), if output_open => match line {
                Ok(Some(line)) => {
                    trace!("worker: {}", line);
                    line
                }
                Ok(None) => {
                    output_open = false;
                    continue;
                }
                Err(e) => {
                    warn!("Reading worker output failed: {}", e);
                    output_open = false;
                    continue;
                }
            },

            line = errors.next_line(), if errors_open => match line {
                Ok(Some(line)) => {
                    trace!("worker stderr: {}", line);
                    format!("{}{}", STDERR_PREFIX, line)
                }
                Ok(None) | Err(_) => {
                    errors_open = false;
                    continue;
                }
            },
        };

        if let Err(e) = sink.append(&record) {
            debug!("Worker log unavailable, forwarder stopping: {}", e);
            break;
        }
    }

    debug!(
        "Forwarder finished after {} lines (stop requested: {})",
        output.lines_read(),
        stop.is_raised()
    );
}
