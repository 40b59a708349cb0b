//! Process launcher
//!
//! Clears any previous worker instance, then starts a fresh one.

use std::time::Duration;

use robolaunch_core::prelude::*;
use robolaunch_remote::{ProcessHandle, RemoteSession};

/// Start and stop commands for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommands {
    pub start: String,
    /// Best-effort; a failure or non-zero exit is ignored
    pub stop: String,
}

/// Run the stop command, wait `settle`, then spawn the start command.
///
/// Returns once the session hands back the new process's streams; the worker
/// is not waited on.
pub async fn launch<S>(
    session: &S,
    commands: &LaunchCommands,
    settle: Duration,
) -> Result<ProcessHandle>
where
    S: RemoteSession + Sync,
{
    stop_previous(session, &commands.stop).await;

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    info!("Starting worker");
    session.spawn(&commands.start).await
}

/// Issue the stop command, logging instead of failing.
pub(crate) async fn stop_previous<S>(session: &S, stop: &str)
where
    S: RemoteSession + Sync,
{
    if stop.is_empty() {
        return;
    }
    match session.run(stop).await {
        Ok(output) if output.success() => debug!("Stop command succeeded"),
        // pkill exits 1 when nothing matched
        Ok(output) => debug!("Stop command exited with {:?}, ignoring", output.code),
        Err(e) => debug!("Stop command failed, ignoring: {}", e),
    }
}
