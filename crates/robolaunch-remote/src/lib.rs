//! # robolaunch-remote - Remote Session Boundary
//!
//! Everything that touches the remote machine goes through this crate.
//!
//! Depends on [`robolaunch_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Sessions
//! - [`RemoteSession`] - Run / spawn commands on a target, probe reachability
//! - [`SshSession`] - Production session over the system `ssh` client
//! - [`ProcessHandle`] - Streams and exit future of one remote invocation
//! - [`OutputStream`] - Line reader with a read counter and deadline support
//! - [`CommandOutput`] - Captured output of a completed command
//! - [`ReadBound`] - Line count and wall-clock bound for readers
//!
//! ### Probing
//! - [`tcp_reachable()`] - TCP connect within a timeout
//! - [`local_address_towards()`] - Local address on the route to a host

pub mod probe;
pub mod session;
pub mod ssh;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use probe::{is_loopback, local_address_towards, tcp_reachable, DEFAULT_PROBE_TIMEOUT};
pub use session::{
    CommandOutput, ExitFuture, InputStream, LineRead, LocalRemoteSession, OutputStream,
    ProcessHandle, ReadBound, RemoteSession,
};
pub use ssh::{SshSession, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
