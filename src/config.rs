use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::error::TartbootError;
use crate::paths;

#[derive(Debug, Clone, Facet)]
pub struct Config {
    pub vm: VmConfig,
    #[facet(default)]
    pub vnc: VncConfig,
    #[facet(default)]
    pub network: NetworkConfig,
    #[facet(default)]
    pub communicator: Option<CommunicatorConfig>,
    #[facet(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Facet)]
pub struct VmConfig {
    /// Name of the Tart VM to run.
    pub name: String,
    #[facet(default = true)]
    pub headless: bool,
    #[facet(default)]
    pub recovery: bool,
    /// Extra disk images passed to `tart run --disk`.
    #[facet(default)]
    pub disks: Vec<String>,
    #[facet(default = "tart")]
    pub tart_path: String,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct VncConfig {
    #[facet(default)]
    pub disable: bool,
    #[facet(default)]
    pub boot_command: Vec<String>,
    #[facet(default = 100)]
    pub key_interval_ms: u64,
    #[facet(default = 300)]
    pub credentials_timeout_s: u64,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            disable: false,
            boot_command: Vec::new(),
            key_interval_ms: 100,
            credentials_timeout_s: 300,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct NetworkConfig {
    /// Host interface the guest network is bridged on.
    #[facet(default = "bridge100")]
    pub interface: String,
    #[facet(default = 10)]
    pub settle_delay_s: u64,
    /// Port of the HTTP server the installer fetches from, exposed to the
    /// boot command as `{{ .HTTPPort }}`.
    #[facet(default)]
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "bridge100".into(),
            settle_delay_s: 10,
            http_port: 0,
        }
    }
}

#[derive(Debug, Clone, Facet)]
pub struct CommunicatorConfig {
    pub user: String,
    pub password: String,
    /// Guest address; looked up with `tart ip` when empty.
    #[facet(default)]
    pub host: String,
    #[facet(default = 22)]
    pub port: u16,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ShutdownConfig {
    #[facet(default = "shutdown -h now")]
    pub command: String,
    #[facet(default = 60)]
    pub graceful_timeout_s: u64,
    #[facet(default = 300)]
    pub exit_timeout_s: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: "shutdown -h now".into(),
            graceful_timeout_s: 60,
            exit_timeout_s: 300,
        }
    }
}

// ── SystemConfig ──────────────────────────────────────────

/// Resolved runtime config: the parsed TOML plus where it came from.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Canonicalized path to the config file.
    pub config_path: PathBuf,
    /// Parsed TOML config.
    pub config: Config,
}

impl SystemConfig {
    pub fn vm_name(&self) -> &str {
        &self.config.vm.name
    }

    /// Keystrokes are only typed when VNC is enabled and there is something to type.
    pub fn boot_injection_requested(&self) -> bool {
        !self.config.vnc.disable && !self.config.vnc.boot_command.is_empty()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.config.network.settle_delay_s)
    }

    pub fn key_interval(&self) -> Duration {
        Duration::from_millis(self.config.vnc.key_interval_ms)
    }

    pub fn credentials_timeout(&self) -> Duration {
        Duration::from_secs(self.config.vnc.credentials_timeout_s)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown.graceful_timeout_s)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown.exit_timeout_s)
    }

    pub fn logs_dir(&self) -> PathBuf {
        paths::logs_dir(self.vm_name())
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), TartbootError> {
    validate_name(&config.vm.name)?;

    if config.vm.tart_path.trim().is_empty() {
        return Err(TartbootError::Validation {
            message: "vm.tart_path must not be empty".into(),
        });
    }

    for disk in &config.vm.disks {
        if disk.trim().is_empty() {
            return Err(TartbootError::Validation {
                message: "vm.disks entries must not be empty".into(),
            });
        }
    }

    if config.network.interface.trim().is_empty() {
        return Err(TartbootError::Validation {
            message: "network.interface must not be empty".into(),
        });
    }

    if !config.vnc.disable
        && !config.vnc.boot_command.is_empty()
        && config.vnc.credentials_timeout_s == 0
    {
        return Err(TartbootError::Validation {
            message: "vnc.credentials_timeout_s must be at least 1".into(),
        });
    }

    if let Some(comm) = &config.communicator {
        if comm.user.is_empty() {
            return Err(TartbootError::Validation {
                message: "communicator.user must not be empty".into(),
            });
        }
        if comm.port == 0 {
            return Err(TartbootError::Validation {
                message: "communicator.port must not be 0".into(),
            });
        }
    }

    if config.shutdown.command.trim().is_empty() {
        return Err(TartbootError::Validation {
            message: "shutdown.command must not be empty".into(),
        });
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), TartbootError> {
    if name.is_empty() {
        return Err(TartbootError::Validation {
            message: "vm.name must not be empty".into(),
        });
    }
    let valid = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(TartbootError::Validation {
            message: format!("vm.name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"),
        });
    }
    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, TartbootError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| TartbootError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<SystemConfig, TartbootError> {
    let contents = std::fs::read_to_string(path).map_err(|source| TartbootError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config = parse_config(&contents, path)?;

    let canonical = path.canonicalize().map_err(|source| TartbootError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    Ok(SystemConfig {
        config_path: canonical,
        config,
    })
}
