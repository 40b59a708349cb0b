//! Settings loading and resolution
//!
//! `robolaunch.toml` is looked up in the given directory first, then in the
//! user config directory (`<config_dir>/robolaunch/robolaunch.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use robolaunch_core::prelude::*;
use robolaunch_core::{Credentials, RemoteTarget};
use robolaunch_remote::{is_loopback, local_address_towards, SshSession};

use super::profiles::{CommandSet, DeviceProfile, TemplateContext};
use super::types::{DeviceFamily, Settings, SupervisorOptions};

pub const CONFIG_FILENAME: &str = "robolaunch.toml";
const USER_CONFIG_DIR: &str = "robolaunch";

/// Load settings for `dir`, falling back to the user config, then defaults.
///
/// A file that cannot be read or parsed is logged and skipped.
pub fn load_settings(dir: &Path) -> Settings {
    let local = dir.join(CONFIG_FILENAME);
    if let Some(settings) = load_settings_from(&local) {
        return settings;
    }

    if let Some(user) = user_config_path() {
        if let Some(settings) = load_settings_from(&user) {
            return settings;
        }
    }

    debug!("No usable config file, using defaults");
    Settings::default()
}

/// Parse one config file. `None` when it is missing or invalid.
pub fn load_settings_from(path: &Path) -> Option<Settings> {
    if !path.exists() {
        debug!("No config file at {:?}", path);
        return None;
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                Some(settings)
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            None
        }
    }
}

/// `<config_dir>/robolaunch/robolaunch.toml`, if the platform has a config dir
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(USER_CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Write a commented default config into `dir` unless one exists.
pub fn init_config_file(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILENAME);
    if path.exists() {
        debug!("Config already present at {:?}", path);
        return Ok(path);
    }

    std::fs::create_dir_all(dir)
        .map_err(|e| Error::config(format!("Failed to create {:?}: {}", dir, e)))?;
    std::fs::write(&path, DEFAULT_CONFIG)
        .map_err(|e| Error::config(format!("Failed to write {:?}: {}", path, e)))?;
    info!("Created {:?}", path);
    Ok(path)
}

const DEFAULT_CONFIG: &str = r#"# robolaunch configuration

[target]
# Address of the robot
host = ""
# port = 22
# username = "nao"
# passwords = ["nao"]

[device]
# nao | pepper | alphamini | custom
family = "nao"
# device_id = "00167"

# [device.commands]
# start = "python3 worker.py --redis_ip=$BUS_HOST$BUS_PASS_ARG"
# stop = "pkill -f worker.py"
# Runs on this machine when the device does not answer the probe
# bootstrap = "./start-device-sshd.sh $DEVICE_ID"

[bus]
# Loopback is replaced by this machine's address as seen from the robot
host = "127.0.0.1"
# password = ""

[supervision]
sentinel = "Started component manager"
max_attempts = 300
readiness_timeout_secs = 30
log_path = "robolaunch.log"
"#;

/// Everything needed to supervise one device
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub target: RemoteTarget,
    pub profile: DeviceProfile,
    pub commands: CommandSet,
    pub options: SupervisorOptions,
    pub command_timeout: Duration,
}

impl ResolvedConfig {
    /// Open an ssh session to the resolved target
    pub fn connect(&self) -> Result<SshSession> {
        Ok(SshSession::new(self.target.clone())?.with_command_timeout(self.command_timeout))
    }
}

impl Settings {
    /// Validate the settings and fill in family defaults.
    ///
    /// A loopback bus host is replaced by the local address that routes to
    /// the target, so the worker can reach the bus.
    pub async fn resolve(&self) -> Result<ResolvedConfig> {
        let host = self.target.host.trim();
        if host.is_empty() {
            return Err(Error::config("[target] host is required"));
        }

        let family = self.device.family;
        let profile = DeviceProfile::for_family(family).with_overrides(&self.device.commands);

        if family == DeviceFamily::Custom
            && (profile.start_cmd.is_empty() || profile.stop_cmd.is_empty())
        {
            return Err(Error::config(
                "family \"custom\" needs [device.commands] start and stop",
            ));
        }
        if profile.needs_device_id() && self.device.device_id.is_none() {
            return Err(Error::config(format!(
                "family \"{}\" needs [device] device_id",
                family
            )));
        }

        let username = self
            .target
            .username
            .clone()
            .unwrap_or_else(|| profile.default_username.clone());
        if username.is_empty() {
            return Err(Error::config("[target] username is required"));
        }

        let passwords = if self.target.passwords.is_empty() {
            profile.default_passwords.clone()
        } else {
            self.target.passwords.clone()
        };
        let port = self.target.port.unwrap_or(profile.default_port);

        let mut credentials = Credentials::new(username);
        credentials.passwords = passwords;
        let target = RemoteTarget::new(host, credentials).with_port(port);

        let context = TemplateContext {
            bus_host: resolve_bus_host(&self.bus.host, host, port).await,
            bus_password: self.bus.password.clone().filter(|p| !p.is_empty()),
            device_id: self.device.device_id.clone(),
        };
        let commands = profile.render(&context);

        info!(
            "Resolved {} target {} (bus at {})",
            family,
            target.destination(),
            context.bus_host
        );

        Ok(ResolvedConfig {
            target,
            profile,
            commands,
            options: self.supervision.to_options(port),
            command_timeout: Duration::from_secs(self.supervision.command_timeout_secs),
        })
    }
}

async fn resolve_bus_host(bus_host: &str, target_host: &str, port: u16) -> String {
    if !is_loopback(bus_host) {
        return bus_host.to_string();
    }

    match local_address_towards(target_host, port).await {
        Some(addr) => {
            debug!("Bus host {} resolved to {}", bus_host, addr);
            addr.to_string()
        }
        None => {
            warn!(
                "Could not determine local address towards {}, keeping bus host {}",
                target_host, bus_host
            );
            bus_host.to_string()
        }
    }
}
