//! Out-of-band bootstrap
//!
//! A device that does not answer the reachability probe may simply have no
//! shell service yet. When the profile carries a bootstrap command it is run
//! on this machine (for example through a vendor tool talking to the device
//! directly), then the probe is retried.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use robolaunch_core::prelude::*;

use crate::forwarder::STDERR_PREFIX;
use crate::log_sink::LogSink;

/// Run `command` through the local shell and copy its output into `sink`.
///
/// # Errors
/// - [`Error::ProcessSpawn`] when the shell cannot be started
/// - [`Error::CommandTimeout`] when it runs longer than `timeout`
/// - [`Error::Remote`] when it exits with a non-zero status
pub async fn run_bootstrap(command: &str, sink: &LogSink, timeout: Duration) -> Result<()> {
    info!("Running bootstrap: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| Error::ProcessSpawn {
            reason: format!("bootstrap: {}", e),
        })?,
        Err(_) => {
            return Err(Error::CommandTimeout {
                command: command.to_string(),
                timeout,
            })
        }
    };

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        sink.append(line)?;
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        sink.append(&format!("{}{}", STDERR_PREFIX, line))?;
    }

    if !output.status.success() {
        return Err(Error::remote(format!(
            "bootstrap exited with {:?}",
            output.status.code()
        )));
    }

    debug!("Bootstrap finished");
    Ok(())
}
