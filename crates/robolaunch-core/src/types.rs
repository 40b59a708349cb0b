//! Domain types for remote targets and supervision state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default port of the remote shell daemon
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Login credentials for a remote target.
///
/// `passwords` are tried in order when a session is opened. An empty list
/// means key-based authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub passwords: Vec<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            passwords: Vec::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.passwords.push(password.into());
        self
    }

    pub fn uses_password(&self) -> bool {
        !self.passwords.is_empty()
    }
}

/// A remote machine reachable over a shell session.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub credentials: Credentials,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            credentials,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.credentials.username, self.host)
    }
}

// Passwords stay out of logs.
impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.credentials.username)
            .field("passwords", &self.credentials.passwords.len())
            .finish()
    }
}

/// Why a supervised worker reached [`SupervisionState::Terminated`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// `stop()` was called before the worker exited
    RequestedStop,
    /// The worker exited on its own; `None` when no exit code was reported
    UnexpectedExit(Option<i32>),
    /// The sentinel marker never appeared
    ReadinessTimeout,
    /// Installation could not be verified
    InstallFailed,
    /// The target did not answer the reachability probe
    Unreachable,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::RequestedStop => write!(f, "requested stop"),
            TerminationReason::UnexpectedExit(Some(code)) => {
                write!(f, "unexpected exit (code {})", code)
            }
            TerminationReason::UnexpectedExit(None) => write!(f, "unexpected exit"),
            TerminationReason::ReadinessTimeout => write!(f, "readiness timeout"),
            TerminationReason::InstallFailed => write!(f, "install failed"),
            TerminationReason::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Lifecycle of one supervised device
///
/// `Uninstalled → Installing → Stopped → Starting → Ready → Running → Stopping → Terminated`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisionState {
    #[default]
    Uninstalled,
    Installing,
    Stopped,
    Starting,
    Ready,
    Running,
    Stopping,
    Terminated(TerminationReason),
}

impl SupervisionState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SupervisionState::Terminated(_))
    }

    /// Worker is live (sentinel seen, not yet asked to stop)
    pub fn is_live(&self) -> bool {
        matches!(self, SupervisionState::Ready | SupervisionState::Running)
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self {
            SupervisionState::Terminated(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for SupervisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisionState::Uninstalled => write!(f, "uninstalled"),
            SupervisionState::Installing => write!(f, "installing"),
            SupervisionState::Stopped => write!(f, "stopped"),
            SupervisionState::Starting => write!(f, "starting"),
            SupervisionState::Ready => write!(f, "ready"),
            SupervisionState::Running => write!(f, "running"),
            SupervisionState::Stopping => write!(f, "stopping"),
            SupervisionState::Terminated(reason) => write!(f, "terminated ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_destination() {
        let target = RemoteTarget::new("192.168.0.151", Credentials::new("nao")).with_port(8022);
        assert_eq!(target.destination(), "nao@192.168.0.151");
        assert_eq!(target.port, 8022);
    }

    #[test]
    fn test_target_debug_hides_passwords() {
        let target = RemoteTarget::new(
            "10.0.0.5",
            Credentials::new("nao").with_password("secret"),
        );
        let debug = format!("{:?}", target);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("10.0.0.5"));
    }

    #[test]
    fn test_credentials_password_order_preserved() {
        let creds = Credentials::new("nao")
            .with_password("pepper")
            .with_password("nao");
        assert!(creds.uses_password());
        assert_eq!(creds.passwords, vec!["pepper", "nao"]);
        assert!(!Credentials::new("nao").uses_password());
    }

    #[test]
    fn test_state_predicates() {
        assert!(SupervisionState::Ready.is_live());
        assert!(SupervisionState::Running.is_live());
        assert!(!SupervisionState::Stopping.is_live());

        let done = SupervisionState::Terminated(TerminationReason::UnexpectedExit(Some(3)));
        assert!(done.is_terminated());
        assert_eq!(
            done.termination_reason(),
            Some(TerminationReason::UnexpectedExit(Some(3)))
        );
        assert_eq!(SupervisionState::default(), SupervisionState::Uninstalled);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            SupervisionState::Terminated(TerminationReason::RequestedStop).to_string(),
            "terminated (requested stop)"
        );
        assert_eq!(
            TerminationReason::UnexpectedExit(Some(1)).to_string(),
            "unexpected exit (code 1)"
        );
    }
}
