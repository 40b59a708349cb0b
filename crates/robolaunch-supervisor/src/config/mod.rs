//! Configuration for robolaunch
//!
//! Supports:
//! - `robolaunch.toml` - Target, device family, bus and supervision settings
//! - Device family presets (NAO, Pepper, AlphaMini) as capability records

pub mod profiles;
pub mod settings;
pub mod types;

pub use profiles::{
    CommandSet, DeviceProfile, TemplateContext, INSTALLED_MARKER, INSTALL_SUCCESS_MARKER,
};
pub use settings::{
    init_config_file, load_settings, load_settings_from, user_config_path, ResolvedConfig,
    CONFIG_FILENAME,
};
pub use types::*;
