//! Daemon configuration
//!
//! Read from `$UNIJOY_CONFIG` or `<config dir>/unijoy/config.toml`. Every
//! field has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [device]
//! name = "unijoy v0.3"
//!
//! [queue]
//! capacity = 64
//!
//! [mapping]
//! max_axes = 64
//! max_buttons = 512
//!
//! [control]
//! socket_path = "/run/user/1000/unijoy.sock"
//! request_timeout_ms = 5000
//!
//! [host]
//! scan_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! ```

use crate::engine::{EngineSettings, DEVICE_NAME};
use crate::error::ConfigError;
use crate::mapping::{MAX_AXES, MAX_BUTTONS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "UNIJOY_CONFIG";
const CONFIG_DIR: &str = "unijoy";
const CONFIG_FILE: &str = "config.toml";
const SOCKET_FILE: &str = "unijoy.sock";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct UnijoyConfig {
    pub device: DeviceConfig,
    pub queue: QueueConfig,
    pub mapping: MappingConfig,
    pub control: ControlConfig,
    pub host: HostConfig,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name of the merged joystick
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEVICE_NAME.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending output entries before new ones are dropped
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MappingConfig {
    pub max_axes: usize,
    pub max_buttons: usize,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_axes: MAX_AXES,
            max_buttons: MAX_BUTTONS,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    pub socket_path: PathBuf,
    /// Time a client gets to send its whole request
    pub request_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            socket_path: dir.join(SOCKET_FILE),
            request_timeout_ms: 5000,
        }
    }
}

impl ControlConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// How often `/dev/input` is rescanned for new devices
    pub scan_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1000,
        }
    }
}

impl HostConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl UnijoyConfig {
    /// Config file location: `$UNIJOY_CONFIG` or the user config dir
    ///
    /// Called before logging is set up; failures are returned, not logged.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Self::resolve_path(std::env::var_os(CONFIG_ENV), dirs::config_dir())
    }

    fn resolve_path(
        explicit: Option<std::ffi::OsString>,
        config_dir: Option<PathBuf>,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(PathBuf::from(path));
        }

        config_dir
            .map(|base| base.join(CONFIG_DIR).join(CONFIG_FILE))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "no user config directory, set ${} to a config file",
                    CONFIG_ENV
                ))
            })
    }

    /// Loads and validates the config at `path`; a missing file yields defaults
    ///
    /// Called before logging is set up, so it does not log.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config = if exists {
            let content =
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be positive".into()));
        }
        if self.mapping.max_axes == 0 || self.mapping.max_axes > MAX_AXES {
            return Err(ConfigError::Invalid(format!(
                "mapping.max_axes must be within 1..={}",
                MAX_AXES
            )));
        }
        if self.mapping.max_buttons == 0 || self.mapping.max_buttons > MAX_BUTTONS {
            return Err(ConfigError::Invalid(format!(
                "mapping.max_buttons must be within 1..={}",
                MAX_BUTTONS
            )));
        }
        if self.device.name.trim().is_empty() {
            return Err(ConfigError::Invalid("device.name must not be empty".into()));
        }
        if self.control.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "control.request_timeout_ms must be positive".into(),
            ));
        }
        if self.host.scan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "host.scan_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            device_name: self.device.name.clone(),
            max_axes: self.mapping.max_axes,
            max_buttons: self.mapping.max_buttons,
        }
    }
}
