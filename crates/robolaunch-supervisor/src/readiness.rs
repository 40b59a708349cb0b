//! Readiness detection
//!
//! Reads the worker's output line by line until the sentinel shows up, while
//! copying every line into the worker log.

use std::path::Path;

use robolaunch_core::prelude::*;
use robolaunch_remote::{LineRead, OutputStream, ReadBound};

use crate::log_sink::LogSink;

/// Line printed by the worker once its components are up
pub const DEFAULT_SENTINEL: &str = "Started component manager";

/// Wait until a line containing `marker` appears on `output`.
///
/// Each line is appended to `sink` before it is inspected. Returns the number
/// of lines consumed, counting the one carrying the marker.
///
/// # Errors
/// - [`Error::ReadinessTimeout`] after `bound.max_lines` lines without the
///   marker, or when `bound.deadline` passes
/// - [`Error::OutputClosed`] when the stream ends first
pub async fn await_ready(
    output: &mut OutputStream,
    sink: &LogSink,
    marker: &str,
    bound: ReadBound,
) -> Result<usize> {
    let expires_at = bound.expires_at();
    let start = output.lines_read();

    for _ in 0..bound.max_lines {
        match output.next_line_before(expires_at).await? {
            LineRead::Line(line) => {
                trace!("worker: {}", line);
                sink.append(&line)?;
                if line.contains(marker) {
                    let consumed = output.lines_read() - start;
                    info!("Worker ready after {} lines", consumed);
                    return Ok(consumed);
                }
            }
            LineRead::Eof => {
                let lines_read = output.lines_read() - start;
                warn!("Worker output closed after {} lines", lines_read);
                return Err(Error::OutputClosed {
                    lines_read,
                    log_path: sink.path().to_path_buf(),
                });
            }
            LineRead::DeadlineElapsed => {
                let attempts = output.lines_read() - start;
                warn!(
                    "Worker not ready within {:?} ({} lines read)",
                    bound.deadline, attempts
                );
                return Err(timeout(attempts, sink.path()));
            }
        }
    }

    warn!("Sentinel not seen within {} lines", bound.max_lines);
    Err(timeout(bound.max_lines, sink.path()))
}

fn timeout(attempts: usize, log_path: &Path) -> Error {
    Error::ReadinessTimeout {
        attempts,
        log_path: log_path.to_path_buf(),
    }
}
