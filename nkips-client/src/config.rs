//! Session configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NKIPS_CONFIG or --config)
//! 3. Environment variables

use crate::connection::SessionConfig;
use nkips_protocol::level::LEVELS;
use nkips_protocol::{DEFAULT_ADDRESS, DEFAULT_INPUTS, DEFAULT_LEVELS, DEFAULT_OUTPUTS, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration of one router connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The router and its gateway.
    pub device: DeviceConfig,
    /// Timers of the session.
    pub session: SessionTimings,
    /// Label file handling.
    pub labels: LabelsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NKIPS_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.device.apply_env_overrides();
        self.session.apply_env_overrides();
        self.labels.apply_env_overrides();
    }

    /// Checks values a session cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "device.host must not be empty".to_string(),
            ));
        }
        if self.device.levels == 0 || self.device.levels as usize > LEVELS.len() {
            return Err(ConfigError::ValidationError(format!(
                "device.levels must be between 1 and {}, got {}",
                LEVELS.len(),
                self.device.levels
            )));
        }
        if self.device.inputs == 0 || self.device.outputs == 0 {
            return Err(ConfigError::ValidationError(
                "device.inputs and device.outputs must be at least 1".to_string(),
            ));
        }
        if self.session.keepalive_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.keepalive_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds the runtime session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.device.host.clone(), self.device.port)
            .with_address(self.device.address)
            .with_ports(self.device.inputs, self.device.outputs)
            .with_levels(self.device.levels)
            .with_reconnect_delay(self.session.reconnect_delay())
            .with_keepalive_interval(self.session.keepalive_interval())
            .with_connect_timeout(self.session.connect_timeout())
            .with_confirm_timeout(self.session.confirm_timeout())
            .with_partial_timeout(self.session.partial_timeout())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// The router and its gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Gateway host name or address.
    pub host: String,
    /// Gateway TCP port.
    pub port: u16,
    /// TBUS address of the router.
    pub address: u8,
    /// Number of router inputs.
    pub inputs: u16,
    /// Number of router outputs.
    pub outputs: u16,
    /// Number of levels tracked.
    pub levels: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS,
            inputs: DEFAULT_INPUTS,
            outputs: DEFAULT_OUTPUTS,
            levels: DEFAULT_LEVELS,
        }
    }
}

impl DeviceConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("NKIPS_HOST") {
            self.host = host;
        }
        override_parsed("NKIPS_PORT", &mut self.port);
        override_parsed("NKIPS_ADDRESS", &mut self.address);
        override_parsed("NKIPS_INPUTS", &mut self.inputs);
        override_parsed("NKIPS_OUTPUTS", &mut self.outputs);
        override_parsed("NKIPS_LEVELS", &mut self.levels);
    }
}

/// Timers of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    /// Delay before reconnecting after a close, in seconds.
    pub reconnect_secs: u64,
    /// Keepalive interval in seconds.
    pub keepalive_secs: u64,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// How long a crosspoint change waits for confirmation, in milliseconds.
    pub confirm_timeout_ms: u64,
    /// How long a partial table dump waits for more bytes, in milliseconds.
    pub partial_timeout_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            reconnect_secs: 10,
            keepalive_secs: 10,
            connect_timeout_secs: 10,
            confirm_timeout_ms: 500,
            partial_timeout_ms: 200,
        }
    }
}

impl SessionTimings {
    fn apply_env_overrides(&mut self) {
        override_parsed("NKIPS_RECONNECT_SECS", &mut self.reconnect_secs);
        override_parsed("NKIPS_KEEPALIVE_SECS", &mut self.keepalive_secs);
        override_parsed("NKIPS_CONNECT_TIMEOUT_SECS", &mut self.connect_timeout_secs);
        override_parsed("NKIPS_CONFIRM_MS", &mut self.confirm_timeout_ms);
        override_parsed("NKIPS_PARTIAL_MS", &mut self.partial_timeout_ms);
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn partial_timeout(&self) -> Duration {
        Duration::from_millis(self.partial_timeout_ms)
    }
}

/// Label file handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    /// `.lbl` file loaded at startup.
    pub path: Option<PathBuf>,
    /// Write labels back to `path` on shutdown.
    pub save_on_exit: bool,
}

impl LabelsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("NKIPS_LABELS") {
            self.path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Ok(save) = std::env::var("NKIPS_LABELS_SAVE") {
            self.save_on_exit = save == "1" || save.to_lowercase() == "true";
        }
    }
}

/// Replaces `value` with the parsed environment variable, if set and valid.
fn override_parsed<T: std::str::FromStr>(name: &str, value: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(parsed) => *value = parsed,
            Err(_) => tracing::warn!("ignoring invalid {}={}", name, raw),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
