//! Device family capability records
//!
//! A [`DeviceProfile`] holds every family-specific command as a template.
//! The installation and launch logic is written once and parameterized by
//! the rendered [`CommandSet`].
//!
//! Templates may use:
//! - `$BUS_HOST` - address of the message bus as seen from the device
//! - `$BUS_PASS_ARG` - ` --redis_pass=<password>` or empty
//! - `$DEVICE_ID` - identifier from `[device] device_id`

use super::types::{CommandOverrides, DeviceFamily};
use crate::install::InstallCommands;
use crate::launcher::LaunchCommands;
use robolaunch_core::DEFAULT_SSH_PORT;

/// Marker printed by the presence check when the runtime is in place
pub const INSTALLED_MARKER: &str = "SIC already installed";

/// Marker printed by an install command that completed
pub const INSTALL_SUCCESS_MARKER: &str = "SIC successfully installed";

/// Login defaults and command templates for one hardware family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub family: DeviceFamily,
    pub default_username: String,
    pub default_passwords: Vec<String>,
    pub default_port: u16,
    pub probe_cmd: String,
    pub installed_marker: String,
    pub install_cmd: String,
    pub install_success_marker: String,
    pub start_cmd: String,
    pub stop_cmd: String,
    /// Run locally when the probe fails, to bring up the device's shell service
    pub bootstrap_cmd: Option<String>,
}

/// Values substituted into a profile's templates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    pub bus_host: String,
    pub bus_password: Option<String>,
    pub device_id: Option<String>,
}

/// A profile with every placeholder filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub install: InstallCommands,
    pub launch: LaunchCommands,
    pub bootstrap: Option<String>,
}

const NAO_DEVICE_DIR: &str =
    "/data/home/nao/.venv_sic/lib/python2.7/site-packages/sic_framework/devices";

const PEPPER_DEVICE_DIR: &str =
    "/home/nao/sic_framework_2/social-interaction-cloud-main/sic_framework/devices";

impl DeviceProfile {
    pub fn for_family(family: DeviceFamily) -> Self {
        match family {
            DeviceFamily::Nao => Self::nao(),
            DeviceFamily::Pepper => Self::pepper(),
            DeviceFamily::Alphamini => Self::alphamini(),
            DeviceFamily::Custom => Self::custom(),
        }
    }

    pub fn nao() -> Self {
        Self {
            family: DeviceFamily::Nao,
            default_username: "nao".to_string(),
            default_passwords: vec!["nao".to_string()],
            default_port: DEFAULT_SSH_PORT,
            probe_cmd: format!(
                r#"
if ls -d ~/.venv_sic/lib/python2.7/site-packages/social_interaction_cloud* > /dev/null 2>&1; then
    echo "{installed}";
    source ~/.venv_sic/bin/activate;
    pip install --upgrade social-interaction-cloud --no-deps;
fi;
"#,
                installed = INSTALLED_MARKER
            ),
            installed_marker: INSTALLED_MARKER.to_string(),
            install_cmd: format!(
                r#"
if [ ! -f ~/.local/bin/virtualenv ]; then
    pip install --user virtualenv;
fi;
~/.local/bin/virtualenv ~/.venv_sic;
source ~/.venv_sic/bin/activate;
ln -sf /usr/lib/python2.7/site-packages/cv2.so ~/.venv_sic/lib/python2.7/site-packages/cv2.so;
pip install social-interaction-cloud --no-deps;
pip install Pillow PyTurboJPEG numpy redis six;
if pip list | grep -w 'social-interaction-cloud' > /dev/null 2>&1; then
    echo "{success}";
fi;
"#,
                success = INSTALL_SUCCESS_MARKER
            ),
            install_success_marker: INSTALL_SUCCESS_MARKER.to_string(),
            start_cmd: format!(
                r#"
export PYTHONPATH=/opt/aldebaran/lib/python2.7/site-packages;
export LD_LIBRARY_PATH=/opt/aldebaran/lib/naoqi;
source ~/.venv_sic/bin/activate;
echo 'Robot: Starting SIC';
python2 {dir}/nao.py --redis_ip=$BUS_HOST$BUS_PASS_ARG;
"#,
                dir = NAO_DEVICE_DIR
            ),
            stop_cmd: r#"pkill -f "sic_framework/devices/nao.py""#.to_string(),
            bootstrap_cmd: None,
        }
    }

    pub fn pepper() -> Self {
        Self {
            family: DeviceFamily::Pepper,
            default_username: "nao".to_string(),
            default_passwords: vec!["pepper".to_string(), "nao".to_string()],
            default_port: DEFAULT_SSH_PORT,
            probe_cmd: format!(
                r#"
if pip list 2> /dev/null | grep -w 'social-interaction-cloud' > /dev/null 2>&1; then
    echo "{installed}";
fi;
"#,
                installed = INSTALLED_MARKER
            ),
            installed_marker: INSTALLED_MARKER.to_string(),
            install_cmd: format!(
                r#"
rm -rf /home/nao/sic_framework_2;
mkdir /home/nao/sic_framework_2;
cd /home/nao/sic_framework_2;
curl -L -o sic_repo.zip https://github.com/Social-AI-VU/social-interaction-cloud/archive/refs/heads/main.zip;
unzip sic_repo.zip;
cd /home/nao/sic_framework_2/social-interaction-cloud-main;
pip install --user -e . --no-deps;
cd {dir}/dep_whls;
pip install --user *.whl;
if pip list | grep -w 'social-interaction-cloud' > /dev/null 2>&1; then
    echo "{success}";
fi;
"#,
                dir = PEPPER_DEVICE_DIR,
                success = INSTALL_SUCCESS_MARKER
            ),
            install_success_marker: INSTALL_SUCCESS_MARKER.to_string(),
            start_cmd: format!(
                r#"
cd {dir};
echo 'Robot: Starting SIC';
python pepper.py --redis_ip=$BUS_HOST;
"#,
                dir = PEPPER_DEVICE_DIR
            ),
            stop_cmd: r#"pkill -f "sic_framework/devices/pepper.py""#.to_string(),
            bootstrap_cmd: None,
        }
    }

    /// AlphaMini over the Termux sshd (port 8022) set up by its bootstrap
    pub fn alphamini() -> Self {
        Self {
            family: DeviceFamily::Alphamini,
            default_username: "u0_a25".to_string(),
            default_passwords: Vec::new(),
            default_port: 8022,
            probe_cmd: format!(
                r#"
if [ -d ~/.venv_sic ] && [ -d ~/social-interaction-cloud ]; then
    echo "{installed}";
fi;
"#,
                installed = INSTALLED_MARKER
            ),
            installed_marker: INSTALLED_MARKER.to_string(),
            install_cmd: format!(
                r#"
cd ~;
pkg install -y portaudio python-numpy python-pillow sox git;
git clone https://github.com/Social-AI-VU/social-interaction-cloud.git;
cd social-interaction-cloud && git checkout mini_device && cd ~;
python -m venv .venv_sic --system-site-packages;
.venv_sic/bin/python -m pip install --no-input redis six alphamini pyaudio;
cd social-interaction-cloud && ../.venv_sic/bin/python -m pip install --no-input -e .[alphamini] && echo "{success}";
"#,
                success = INSTALL_SUCCESS_MARKER
            ),
            install_success_marker: INSTALL_SUCCESS_MARKER.to_string(),
            start_cmd: r#"
cd ~/social-interaction-cloud && git pull;
cd ~;
.venv_sic/bin/python social-interaction-cloud/sic_framework/devices/alphamini.py --redis_ip $BUS_HOST --alphamini_id $DEVICE_ID;
"#
            .to_string(),
            stop_cmd: r#"pkill -f "sic_framework/devices/alphamini.py""#.to_string(),
            bootstrap_cmd: None,
        }
    }

    /// Empty profile; `[device.commands]` must supply at least start and stop
    pub fn custom() -> Self {
        Self {
            family: DeviceFamily::Custom,
            default_username: String::new(),
            default_passwords: Vec::new(),
            default_port: DEFAULT_SSH_PORT,
            probe_cmd: format!("echo \"{}\"", INSTALLED_MARKER),
            installed_marker: INSTALLED_MARKER.to_string(),
            install_cmd: String::new(),
            install_success_marker: INSTALL_SUCCESS_MARKER.to_string(),
            start_cmd: String::new(),
            stop_cmd: String::new(),
            bootstrap_cmd: None,
        }
    }

    /// Replace every field set in `overrides`
    pub fn with_overrides(mut self, overrides: &CommandOverrides) -> Self {
        let fields = [
            (&mut self.probe_cmd, &overrides.probe),
            (&mut self.installed_marker, &overrides.installed_marker),
            (&mut self.install_cmd, &overrides.install),
            (
                &mut self.install_success_marker,
                &overrides.install_success_marker,
            ),
            (&mut self.start_cmd, &overrides.start),
            (&mut self.stop_cmd, &overrides.stop),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        if let Some(bootstrap) = &overrides.bootstrap {
            self.bootstrap_cmd = Some(bootstrap.clone());
        }
        self
    }

    /// Whether any template asks for `$DEVICE_ID`
    pub fn needs_device_id(&self) -> bool {
        [&self.probe_cmd, &self.install_cmd, &self.start_cmd, &self.stop_cmd]
            .into_iter()
            .chain(&self.bootstrap_cmd)
            .any(|t| t.contains("$DEVICE_ID"))
    }

    /// Fill in all placeholders
    pub fn render(&self, ctx: &TemplateContext) -> CommandSet {
        let fill = |template: &str| render_template(template, ctx);
        CommandSet {
            install: InstallCommands {
                probe: fill(&self.probe_cmd),
                installed_marker: self.installed_marker.clone(),
                install: fill(&self.install_cmd),
                install_success_marker: self.install_success_marker.clone(),
            },
            launch: LaunchCommands {
                start: fill(&self.start_cmd),
                stop: fill(&self.stop_cmd),
            },
            bootstrap: self.bootstrap_cmd.as_deref().map(fill),
        }
    }
}

fn render_template(template: &str, ctx: &TemplateContext) -> String {
    let pass_arg = ctx
        .bus_password
        .as_deref()
        .map(|p| format!(" --redis_pass={}", shell_quote(p)))
        .unwrap_or_default();

    template
        .replace("$BUS_PASS_ARG", &pass_arg)
        .replace("$BUS_HOST", &ctx.bus_host)
        .replace("$DEVICE_ID", ctx.device_id.as_deref().unwrap_or(""))
}

/// Single-quote `value` for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
