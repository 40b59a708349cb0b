//! # robolaunch-core - Core Domain Types
//!
//! Foundation crate for robolaunch. Provides domain types, error handling and
//! logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`RemoteTarget`] - Address, port and credentials of a remote machine
//! - [`Credentials`] - Username plus candidate passwords
//! - [`SupervisionState`] - Lifecycle of one supervised device
//! - [`TerminationReason`] - Why a worker reached `Terminated`
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Logging (`logging`)
//! - [`logging::init()`] - Install the tracing subscriber
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use robolaunch_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use types::{Credentials, RemoteTarget, SupervisionState, TerminationReason, DEFAULT_SSH_PORT};
