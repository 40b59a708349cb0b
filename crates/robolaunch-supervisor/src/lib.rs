//! # robolaunch-supervisor - Worker Deployment and Supervision
//!
//! Deploys a worker onto a remote robot, waits for it to report ready, then
//! supervises it: crashes are reported out-of-band and its output keeps
//! flowing into a local log until it is stopped.
//!
//! Depends on [`robolaunch_core`] for domain types and errors, and on
//! [`robolaunch_remote`] for the session boundary.
//!
//! ## Public API
//!
//! ### Supervision
//! - [`DeviceHandle`] - Start, stop and observe one worker
//! - [`run_bootstrap()`] - Local command that brings up an unreachable device
//! - [`ensure_installed()`] - Presence check, install, re-verify
//! - [`launch()`] - Stop any previous instance, then start the worker
//! - [`await_ready()`] - Bounded wait for the sentinel line
//! - [`LogSink`] - Flushed, close-once worker log
//! - [`StopFlag`] - One-way stop signal shared with background tasks
//!
//! ### Configuration (`config`)
//! - [`config::load_settings()`] - Read `robolaunch.toml`
//! - [`config::Settings::resolve()`] - Validate and fill in family defaults
//! - [`config::DeviceProfile`] - Per-family command templates

pub mod bootstrap;
pub mod config;
pub mod device;
mod forwarder;
pub mod install;
pub mod launcher;
pub mod log_sink;
pub mod readiness;
mod state;
pub mod stop_flag;
mod watchdog;

pub use bootstrap::run_bootstrap;
pub use config::{CommandSet, DeviceProfile, ResolvedConfig, Settings, SupervisorOptions};
pub use device::DeviceHandle;
pub use forwarder::STDERR_PREFIX;
pub use install::{ensure_installed, InstallCommands};
pub use launcher::{launch, LaunchCommands};
pub use log_sink::{LogSink, DEFAULT_LOG_PATH};
pub use readiness::{await_ready, DEFAULT_SENTINEL};
pub use stop_flag::StopFlag;
