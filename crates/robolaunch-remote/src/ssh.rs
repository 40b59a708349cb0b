//! Remote session over the system `ssh` client

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use robolaunch_core::prelude::*;
use robolaunch_core::RemoteTarget;

use crate::probe;
use crate::session::{CommandOutput, OutputStream, ProcessHandle, RemoteSession};

/// Default timeout for commands run to completion (installs can be slow)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Default ssh `ConnectTimeout`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the no-op command used to find a working password
const AUTH_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Exit status sshpass uses for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

/// [`RemoteSession`] backed by the local OpenSSH client.
///
/// Key-based auth runs `ssh` in batch mode. Password auth wraps it in
/// `sshpass -e`, with the password passed through the environment. When
/// several passwords are configured the first one that logs in is cached for
/// the lifetime of the session.
pub struct SshSession {
    target: RemoteTarget,
    ssh_path: PathBuf,
    sshpass_path: Option<PathBuf>,
    command_timeout: Duration,
    connect_timeout: Duration,
    password: OnceCell<Option<String>>,
}

impl SshSession {
    /// Create a session for `target`. No network traffic happens here.
    pub fn new(target: RemoteTarget) -> Result<Self> {
        let ssh_path = which::which("ssh").map_err(|_| Error::SshNotFound)?;

        let sshpass_path = if target.credentials.uses_password() {
            Some(which::which("sshpass").map_err(|_| Error::SshpassNotFound)?)
        } else {
            None
        };

        debug!("Using ssh client at {}", ssh_path.display());

        Ok(Self {
            target,
            ssh_path,
            sshpass_path,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            password: OnceCell::new(),
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Arguments passed to `ssh` for one remote command
    fn ssh_args(&self, remote_command: &str, batch_mode: bool) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if batch_mode {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push(self.target.destination());
        args.push(remote_command.to_string());
        args
    }

    /// Build the local process that runs `remote_command` with `password`
    fn command(&self, remote_command: &str, password: Option<&str>) -> Command {
        let mut cmd = match (password, &self.sshpass_path) {
            (Some(password), Some(sshpass)) => {
                let mut cmd = Command::new(sshpass);
                cmd.arg("-e")
                    .arg(&self.ssh_path)
                    .args(self.ssh_args(remote_command, false))
                    .env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.ssh_path);
                cmd.args(self.ssh_args(remote_command, true));
                cmd
            }
        };
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Password to log in with, found once per session
    async fn password(&self) -> Result<Option<&str>> {
        let password = self
            .password
            .get_or_try_init(|| self.select_password())
            .await?;
        Ok(password.as_deref())
    }

    async fn select_password(&self) -> Result<Option<String>> {
        let candidates = &self.target.credentials.passwords;
        match candidates.len() {
            0 => return Ok(None),
            1 => return Ok(Some(candidates[0].clone())),
            _ => {}
        }

        for (index, candidate) in candidates.iter().enumerate() {
            let output = self
                .output_with_timeout("true", Some(candidate), AUTH_PROBE_TIMEOUT)
                .await?;
            if output.success() {
                debug!(
                    "Logged in to {} with password #{}",
                    self.target.destination(),
                    index + 1
                );
                return Ok(Some(candidate.clone()));
            }
            if output.code != Some(SSHPASS_BAD_PASSWORD) {
                // Anything but a rejected password will not improve with the next candidate
                return Err(Error::remote(format!(
                    "ssh to {} failed: {}",
                    self.target.destination(),
                    output.stderr.trim()
                )));
            }
        }

        Err(Error::AuthenticationFailed {
            username: self.target.credentials.username.clone(),
            host: self.target.host.clone(),
        })
    }

    async fn output_with_timeout(
        &self,
        remote_command: &str,
        password: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut cmd = self.command(remote_command, password);
        // Nothing is ever written to stdin of a completed command
        cmd.stdin(Stdio::null());

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result.map_err(spawn_error)?,
            Err(_) => {
                return Err(Error::CommandTimeout {
                    command: summarize(remote_command),
                    timeout,
                })
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let password = self.password().await?;
        trace!("ssh {}: {}", self.target.destination(), command);
        self.output_with_timeout(command, password, self.command_timeout)
            .await
    }

    async fn spawn(&self, command: &str) -> Result<ProcessHandle> {
        let password = self.password().await?;

        // Merge stderr into stdout on the remote side so every line of the
        // worker arrives on one ordered stream.
        let merged = format!("{{ {}\n}} 2>&1", command);

        info!("Spawning remote worker on {}", self.target.destination());
        let mut child = self.command(&merged, password).spawn().map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::remote("stdin of ssh client not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::remote("stdout of ssh client not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::remote("stderr of ssh client not captured"))?;

        let destination = self.target.destination();
        let exit = async move {
            match child.wait().await {
                Ok(status) => {
                    info!("Remote worker on {} exited with {:?}", destination, status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for ssh client: {}", e);
                    None
                }
            }
        }
        .boxed();

        Ok(ProcessHandle {
            input: Box::new(stdin),
            output: OutputStream::new(stdout),
            errors: OutputStream::new(stderr),
            exit,
        })
    }

    async fn is_reachable(&self, port: u16, timeout: Duration) -> bool {
        probe::tcp_reachable(&self.target.host, port, timeout).await
    }
}

fn spawn_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::SshNotFound
    } else {
        Error::ProcessSpawn {
            reason: e.to_string(),
        }
    }
}

/// First line of a (possibly multi-line) command, for error messages
fn summarize(command: &str) -> String {
    command
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}
