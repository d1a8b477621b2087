//! Configuration management for clipwire
//!
//! This module handles loading, validating, and managing configuration
//! for the sync engine and its binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::DetectorConfig;
use crate::pairing::PeerAddress;
use crate::transport::{ReconnectionConfig, TransportConfig};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "CLIPWIRE_CONFIG";

/// Log levels accepted in `log_level`
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to write TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),

    #[error("Config file already exists at {0}. Use --force to overwrite.")]
    AlreadyExists(PathBuf),

    #[error("Could not find a config directory for this user")]
    NoConfigDir,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name announced to the peer
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Device class announced to the peer
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// Network address to accept peers on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Peer to dial on startup (`ws://host:port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Clipboard monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Connection configuration
    #[serde(default)]
    pub transport: TransportSettings,

    /// Reconnection configuration
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between clipboard reads
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait after a failed clipboard read
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Drop the connection when a ping stays unanswered this long (0 = never)
    #[serde(default)]
    pub pong_timeout_secs: u64,

    /// Maximum envelope size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of attempts per outage (0 = infinite)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_device_name() -> String {
    let hostname = gethostname::gethostname();
    format!("{}-clipwire", hostname.to_string_lossy())
}

fn default_device_type() -> String {
    crate::device::DEFAULT_DEVICE_TYPE.to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8484".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    crate::MAX_PAYLOAD_SIZE
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: default_keepalive_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pong_timeout_secs: 0,
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            device_type: default_device_type(),
            listen_addr: default_listen_addr(),
            peer: None,
            log_level: default_log_level(),
            monitor: MonitorConfig::default(),
            transport: TransportSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from CLIPWIRE_CONFIG environment variable
    /// 2. ~/.config/clipwire/config.toml
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration with an optional explicit path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate_config()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipwire").join("config.toml"))
    }

    /// Find configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Validation(message));

        if self.device_name.trim().is_empty() {
            return invalid("device_name must not be empty".to_string());
        }

        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return invalid(format!(
                "listen_addr '{}' must be an ip:port pair",
                self.listen_addr
            ));
        }

        if let Some(peer) = &self.peer {
            if let Err(e) = peer.parse::<PeerAddress>() {
                return invalid(e.to_string());
            }
        }

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join(", ")
            ));
        }

        // Poll interval range (10ms to 10s)
        let poll = self.monitor.poll_interval_ms;
        if !(10..=10_000).contains(&poll) {
            return invalid("poll_interval_ms must be between 10 and 10000".to_string());
        }
        if self.monitor.error_backoff_ms < poll {
            return invalid("error_backoff_ms must not be shorter than poll_interval_ms".to_string());
        }

        // Keepalive range (1s to 1h)
        if !(1..=3600).contains(&self.transport.keepalive_interval_secs) {
            return invalid("keepalive_interval_secs must be between 1 and 3600".to_string());
        }
        if self.transport.connect_timeout_secs == 0 {
            return invalid("connect_timeout_secs must be at least 1".to_string());
        }

        // Message size range (1KB to 50MB)
        if self.transport.max_message_size < 1024 {
            return invalid("max_message_size must be at least 1024 bytes (1KB)".to_string());
        }
        if self.transport.max_message_size > 52_428_800 {
            return invalid("max_message_size must not exceed 52428800 bytes (50MB)".to_string());
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return invalid("jitter_factor must be between 0.0 and 1.0".to_string());
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return invalid("initial_delay_ms must not exceed max_delay_ms".to_string());
        }

        Ok(())
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            error_backoff: Duration::from_millis(self.monitor.error_backoff_ms),
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let pong_timeout = match self.transport.pong_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        TransportConfig {
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(self.transport.keepalive_interval_secs),
            pong_timeout,
            max_message_size: self.transport.max_message_size,
        }
    }

    pub fn reconnection_config(&self) -> ReconnectionConfig {
        ReconnectionConfig {
            enabled: self.reconnect.enabled,
            max_attempts: self.reconnect.max_attempts,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            backoff_multiplier: self.reconnect.backoff_multiplier,
            jitter_factor: self.reconnect.jitter_factor,
        }
    }

    /// Save configuration to `path`, or to the default location
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, toml::to_string_pretty(self)?)?;
        Ok(config_path)
    }

    /// Write the commented example configuration to `path`, or to the
    /// default location
    pub fn init(path: Option<&Path>, force: bool) -> Result<PathBuf, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };

        if !force && config_path.exists() {
            return Err(ConfigError::AlreadyExists(config_path));
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, Self::generate_example())?;
        Ok(config_path)
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# clipwire configuration file
# Location: ~/.config/clipwire/config.toml

# Name and class announced to the peer
device_name = "{}"
device_type = "{}"

# Address to accept peer connections on
listen_addr = "{}"

# Peer to connect to on startup
# peer = "ws://192.168.1.20:8484"

# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[monitor]
# Clipboard poll interval in milliseconds
poll_interval_ms = {}
# Wait after a failed clipboard read
error_backoff_ms = {}

[transport]
keepalive_interval_secs = {}
connect_timeout_secs = {}
# Drop the connection when a ping stays unanswered this long (0 disables)
pong_timeout_secs = {}
# Largest message accepted or sent, in bytes (5MB default)
max_message_size = {}

[reconnect]
# Reconnect to the configured peer after the connection is lost
enabled = {}
# 0 retries forever
max_attempts = {}
initial_delay_ms = {}
max_delay_ms = {}
backoff_multiplier = {:.1}
jitter_factor = {}
"#,
            config.device_name,
            config.device_type,
            config.listen_addr,
            config.log_level,
            config.monitor.poll_interval_ms,
            config.monitor.error_backoff_ms,
            config.transport.keepalive_interval_secs,
            config.transport.connect_timeout_secs,
            config.transport.pong_timeout_secs,
            config.transport.max_message_size,
            config.reconnect.enabled,
            config.reconnect.max_attempts,
            config.reconnect.initial_delay_ms,
            config.reconnect.max_delay_ms,
            config.reconnect.backoff_multiplier,
            config.reconnect.jitter_factor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device_name.ends_with("-clipwire"));
        assert_eq!(config.device_type, "desktop");
        assert_eq!(config.listen_addr, "0.0.0.0:8484");
        assert!(config.peer.is_none());
        assert_eq!(config.monitor.poll_interval_ms, 100);
        assert_eq!(config.transport.keepalive_interval_secs, 30);
        assert!(!config.reconnect.enabled);
        assert!(config.validate_config().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let config = Config::from_toml(
            r#"
            device_name = "office"
            peer = "ws://10.0.0.5:8484"

            [monitor]
            poll_interval_ms = 250
            error_backoff_ms = 2000

            [reconnect]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.device_name, "office");
        assert_eq!(config.peer.as_deref(), Some("ws://10.0.0.5:8484"));
        assert_eq!(config.detector_config().poll_interval, Duration::from_millis(250));
        assert!(config.reconnection_config().enabled);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.transport.max_message_size, crate::MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            "[monitor]\npoll_interval_ms = 5",
            "[monitor]\npoll_interval_ms = 500\nerror_backoff_ms = 100",
            "[transport]\nkeepalive_interval_secs = 0",
            "[transport]\nmax_message_size = 512",
            "[transport]\nmax_message_size = 104857600",
            "[reconnect]\nbackoff_multiplier = 0.5",
            "[reconnect]\njitter_factor = 1.5",
            "peer = \"http://host:1\"",
            "listen_addr = \"nowhere\"",
            "log_level = \"loud\"",
        ];

        for case in cases {
            assert!(
                matches!(Config::from_toml(case), Err(ConfigError::Validation(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_transport_config_conversion() {
        let mut config = Config::default();
        assert!(config.transport_config().pong_timeout.is_none());

        config.transport.pong_timeout_secs = 75;
        let transport = config.transport_config();
        assert_eq!(transport.pong_timeout, Some(Duration::from_secs(75)));
        assert_eq!(transport.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_example_config_parses_to_defaults() {
        let example = Config::generate_example();
        let parsed = Config::from_toml(&example).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device_name = "saved".to_string();
        config.peer = Some("ws://[::1]:9000".to_string());

        let written = config.save(Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = Config::load_config(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_init_respects_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        Config::init(Some(&path), false).unwrap();
        assert!(matches!(
            Config::init(Some(&path), false),
            Err(ConfigError::AlreadyExists(_))
        ));
        assert!(Config::init(Some(&path), true).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load_from_path(&dir.path().join("absent.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
