//! Configuration types for robolaunch
//!
//! Defines:
//! - `Settings` - Contents of `robolaunch.toml`
//! - `DeviceFamily` - Supported hardware families
//! - `SupervisorOptions` - Runtime knobs handed to a `DeviceHandle`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use robolaunch_core::DEFAULT_SSH_PORT;
use robolaunch_remote::ReadBound;

use crate::log_sink::DEFAULT_LOG_PATH;
use crate::readiness::DEFAULT_SENTINEL;

/// Application settings (robolaunch.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub target: TargetSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub bus: BusSettings,

    #[serde(default)]
    pub supervision: SupervisionSettings,
}

/// Where the device lives and how to log in
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetSettings {
    /// Address of the device
    #[serde(default)]
    pub host: String,

    /// Shell port; falls back to the family default
    #[serde(default)]
    pub port: Option<u16>,

    /// Login name; falls back to the family default
    #[serde(default)]
    pub username: Option<String>,

    /// Candidate passwords, tried in order. Empty uses the family default.
    #[serde(default)]
    pub passwords: Vec<String>,
}

/// Hardware family of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    #[default]
    Nao,
    Pepper,
    Alphamini,
    /// No preset; every command comes from `[device.commands]`
    Custom,
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFamily::Nao => write!(f, "nao"),
            DeviceFamily::Pepper => write!(f, "pepper"),
            DeviceFamily::Alphamini => write!(f, "alphamini"),
            DeviceFamily::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub family: DeviceFamily,

    /// Identifier handed to the worker (`$DEVICE_ID`)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Per-field overrides of the family preset
    #[serde(default)]
    pub commands: CommandOverrides,
}

/// Optional replacements for any field of a device profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandOverrides {
    #[serde(default)]
    pub probe: Option<String>,
    #[serde(default)]
    pub installed_marker: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub install_success_marker: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub stop: Option<String>,
    /// Local command that brings up the device's shell service
    #[serde(default)]
    pub bootstrap: Option<String>,
}

/// Message bus the worker connects to once running
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusSettings {
    /// Loopback addresses are replaced by our address as seen from the device
    #[serde(default = "default_bus_host")]
    pub host: String,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            host: default_bus_host(),
            password: None,
        }
    }
}

fn default_bus_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisionSettings {
    /// Line the worker prints once it is ready
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    /// Maximum output lines read while waiting for the sentinel
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Wall-clock limit for readiness; 0 disables it
    #[serde(default = "default_readiness_timeout_secs")]
    pub readiness_timeout_secs: u64,

    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Limit for commands run to completion (presence check, install, stop,
    /// bootstrap)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// How long `shutdown` waits for background tasks
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Pause between the stop and start commands
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for SupervisionSettings {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            max_attempts: default_max_attempts(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            log_path: default_log_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

fn default_max_attempts() -> usize {
    300
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

fn default_log_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_PATH)
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_secs() -> u64 {
    600
}

fn default_stop_grace_secs() -> u64 {
    2
}

fn default_settle_ms() -> u64 {
    100
}

impl SupervisionSettings {
    pub fn to_options(&self, probe_port: u16) -> SupervisorOptions {
        let mut readiness = ReadBound::lines(self.max_attempts);
        if self.readiness_timeout_secs > 0 {
            readiness = readiness.with_deadline(Duration::from_secs(self.readiness_timeout_secs));
        }

        SupervisorOptions {
            sentinel: self.sentinel.clone(),
            readiness,
            log_path: self.log_path.clone(),
            probe_port,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            settle: Duration::from_millis(self.settle_ms),
            bootstrap_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }
}

/// Runtime knobs for one [`DeviceHandle`](crate::DeviceHandle)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub sentinel: String,
    pub readiness: ReadBound,
    pub log_path: PathBuf,
    /// Port checked by the reachability probe
    pub probe_port: u16,
    pub probe_timeout: Duration,
    pub stop_grace: Duration,
    pub settle: Duration,
    pub bootstrap_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisionSettings::default().to_options(DEFAULT_SSH_PORT)
    }
}

impl SupervisorOptions {
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn with_readiness(mut self, readiness: ReadBound) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}
