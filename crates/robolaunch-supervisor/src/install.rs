//! Installation gate
//!
//! Makes sure the worker runtime is present on the device before launch.

use std::path::Path;

use robolaunch_core::prelude::*;
use robolaunch_remote::RemoteSession;

/// Commands and markers for checking and installing the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCommands {
    /// Presence check; prints `installed_marker` when the runtime is there
    pub probe: String,
    pub installed_marker: String,
    pub install: String,
    /// Printed by `install` when it completed
    pub install_success_marker: String,
}

/// Ensure the runtime is installed, installing it if necessary.
///
/// When the presence check already reports the runtime, nothing else runs.
/// Otherwise the install command runs once and the presence check is repeated
/// once to confirm. There is no retry.
///
/// # Errors
/// [`Error::Installation`] with the install command's stderr when either the
/// success marker is missing or the follow-up presence check fails.
pub async fn ensure_installed<S>(
    session: &S,
    commands: &InstallCommands,
    log_path: &Path,
) -> Result<()>
where
    S: RemoteSession + Sync,
{
    if is_installed(session, commands).await? {
        info!("Runtime already installed");
        return Ok(());
    }

    info!("Runtime not found on device, installing");
    let output = session.run(&commands.install).await?;
    debug!(
        "Install command finished with code {:?} ({} bytes of output)",
        output.code,
        output.stdout.len()
    );

    if !output.stdout_contains(&commands.install_success_marker) {
        error!("Install command did not report success");
        return Err(Error::installation(output.stderr, log_path));
    }

    if !is_installed(session, commands).await? {
        error!("Runtime still missing after install");
        return Err(Error::installation(output.stderr, log_path));
    }

    info!("Runtime installed");
    Ok(())
}

async fn is_installed<S>(session: &S, commands: &InstallCommands) -> Result<bool>
where
    S: RemoteSession + Sync,
{
    let output = session.run(&commands.probe).await?;
    Ok(output.stdout_contains(&commands.installed_marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use robolaunch_remote::test_utils::MockSession;
    use robolaunch_remote::CommandOutput;

    const LOG: &str = "robolaunch.log";

    fn commands() -> InstallCommands {
        InstallCommands {
            probe: "check-runtime".to_string(),
            installed_marker: "already installed".to_string(),
            install: "install-runtime".to_string(),
            install_success_marker: "successfully installed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_present_runtime_skips_install() {
        let session = MockSession::new();
        session.respond("check-runtime", CommandOutput::ok("SIC already installed\n"));

        ensure_installed(&session, &commands(), Path::new(LOG))
            .await
            .unwrap();

        assert_eq!(session.commands(), vec!["check-runtime"]);
    }

    #[tokio::test]
    async fn test_installs_and_reverifies() {
        let session = MockSession::new();
        session
            .respond("check-runtime", CommandOutput::ok(""))
            .respond("check-runtime", CommandOutput::ok("already installed"))
            .respond("install-runtime", CommandOutput::ok("SIC successfully installed"));

        ensure_installed(&session, &commands(), Path::new(LOG))
            .await
            .unwrap();

        assert_eq!(
            session.commands(),
            vec!["check-runtime", "install-runtime", "check-runtime"]
        );
    }

    #[tokio::test]
    async fn test_missing_success_marker_fails_with_stderr() {
        let session = MockSession::new();
        session.respond(
            "install-runtime",
            CommandOutput::new("", "pip: command not found", Some(127)),
        );

        let err = ensure_installed(&session, &commands(), Path::new(LOG))
            .await
            .unwrap_err();

        match &err {
            Error::Installation { stderr, log_path } => {
                assert_eq!(stderr, "pip: command not found");
                assert_eq!(log_path, Path::new(LOG));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // No second presence check after a failed install
        assert_eq!(session.count_matching("check-runtime"), 1);
    }

    #[tokio::test]
    async fn test_still_missing_after_install_fails() {
        let session = MockSession::new();
        session.respond(
            "install-runtime",
            CommandOutput::new("SIC successfully installed", "warning: cache", Some(0)),
        );

        let err = ensure_installed(&session, &commands(), Path::new(LOG))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Installation { ref stderr, .. } if stderr == "warning: cache"));
        assert_eq!(session.count_matching("install-runtime"), 1);
        assert_eq!(session.count_matching("check-runtime"), 2);
    }
}
