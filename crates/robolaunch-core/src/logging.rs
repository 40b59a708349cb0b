//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable controlling the log filter
pub const LOG_ENV_VAR: &str = "ROBOLAUNCH_LOG";

const LOG_FILE_NAME: &str = "robolaunch.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/robolaunch/logs/`.
/// Log level is controlled by the `ROBOLAUNCH_LOG` environment variable.
///
/// This is the supervisor's own diagnostic log. Output of the remote worker
/// goes to the per-device log sink instead.
///
/// # Examples
/// ```bash
/// ROBOLAUNCH_LOG=debug my-launcher
/// ROBOLAUNCH_LOG=robolaunch_supervisor=trace my-launcher
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("robolaunch starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Default to info for our crates, allow override via `ROBOLAUNCH_LOG`
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| {
        EnvFilter::new("robolaunch_core=info,robolaunch_remote=info,robolaunch_supervisor=info,warn")
    })
}

/// Get the log directory path
fn get_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("robolaunch").join("logs")
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> PathBuf {
    get_log_directory().join(LOG_FILE_NAME)
}
