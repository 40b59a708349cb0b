//! Error types for deployment and supervision

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types organized by layer/domain
///
/// Supervision errors (`Unreachable` through `UnexpectedTermination`) carry the
/// path of the worker log so a human can inspect the captured output.
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Remote Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("ssh client not found. Ensure 'ssh' is in your PATH.")]
    SshNotFound,

    #[error("sshpass not found. Install it or use key-based authentication.")]
    SshpassNotFound,

    #[error("Failed to spawn remote command: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Remote command timed out after {}s: {command}", timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("Remote session error: {message}")]
    Remote { message: String },

    #[error("Authentication to {username}@{host} failed with all configured passwords")]
    AuthenticationFailed { username: String, host: String },

    // ─────────────────────────────────────────────────────────────
    // Supervision Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device {host}:{port} is unreachable. See {} for details", log_path.display())]
    Unreachable {
        host: String,
        port: u16,
        log_path: PathBuf,
    },

    #[error(
        "Failed to install the runtime on the device. Standard error stream from install command: {stderr}\nSee {} for details",
        log_path.display()
    )]
    Installation { stderr: String, log_path: PathBuf },

    #[error(
        "Could not start the worker on the remote device after {attempts} lines\nSee {} for details",
        log_path.display()
    )]
    ReadinessTimeout { attempts: usize, log_path: PathBuf },

    #[error(
        "Remote worker closed its output after {lines_read} lines, before it was ready\nSee {} for details",
        log_path.display()
    )]
    OutputClosed { lines_read: usize, log_path: PathBuf },

    #[error(
        "Remote worker has stopped unexpectedly (exit code: {code:?})\nSee {} for details",
        log_path.display()
    )]
    UnexpectedTermination {
        code: Option<i32>,
        log_path: PathBuf,
    },

    #[error("Failed to start the worker: {source}\nSee {} for details", log_path.display())]
    Launch {
        #[source]
        source: Box<Error>,
        log_path: PathBuf,
    },

    #[error("Log sink already closed: {}", path.display())]
    LogSinkClosed { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unreachable(host: impl Into<String>, port: u16, log_path: impl Into<PathBuf>) -> Self {
        Self::Unreachable {
            host: host.into(),
            port,
            log_path: log_path.into(),
        }
    }

    pub fn installation(stderr: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self::Installation {
            stderr: stderr.into(),
            log_path: log_path.into(),
        }
    }

    /// Attach the worker log to an error raised while starting a worker.
    ///
    /// Errors that already name a log are returned unchanged.
    pub fn with_log_path(self, log_path: impl Into<PathBuf>) -> Self {
        if self.log_path().is_some() {
            return self;
        }
        Self::Launch {
            source: Box::new(self),
            log_path: log_path.into(),
        }
    }

    /// The worker log referenced by this error, if it is a supervision error.
    pub fn log_path(&self) -> Option<&std::path::Path> {
        match self {
            Error::Unreachable { log_path, .. }
            | Error::Launch { log_path, .. }
            | Error::Installation { log_path, .. }
            | Error::ReadinessTimeout { log_path, .. }
            | Error::OutputClosed { log_path, .. }
            | Error::UnexpectedTermination { log_path, .. } => Some(log_path),
            _ => None,
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Remote { .. }
                | Error::CommandTimeout { .. }
                | Error::LogSinkClosed { .. }
        )
    }

    /// Check if this error aborts the supervision of a device
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SshNotFound
                | Error::SshpassNotFound
                | Error::AuthenticationFailed { .. }
                | Error::Unreachable { .. }
                | Error::Launch { .. }
                | Error::Installation { .. }
                | Error::ReadinessTimeout { .. }
                | Error::OutputClosed { .. }
                | Error::UnexpectedTermination { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
