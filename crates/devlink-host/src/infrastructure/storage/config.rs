//! TOML-based configuration persistence for the devlink host.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\devlink\config.toml`
//! - Linux:    `~/.config/devlink/config.toml`
//! - macOS:    `~/Library/Application Support/devlink/config.toml`
//!
//! Example file:
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [usb]
//! enabled = true
//! poll_interval_ms = 1000
//! authorized = ["0123456789ABCDEF"]
//!
//! [network]
//! endpoint = "ws://localhost:15555"
//! probe_interval_secs = 5
//! connect_timeout_ms = 2000
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! an older file without newer fields all load cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds a value the probes cannot run with.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// USB probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsbConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hot-plug poll interval in milliseconds.
    #[serde(default = "default_usb_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Serial numbers of devices the user has authorized.
    #[serde(default)]
    pub authorized: Vec<String>,
}

/// Network probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// WebSocket endpoint of the local device bridge.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Upper bound of one probe attempt.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl AppConfig {
    /// Rejects intervals and timeouts of zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("usb.poll_interval_ms", self.usb.poll_interval_ms),
            ("network.probe_interval_secs", self.network.probe_interval_secs),
            ("network.connect_timeout_ms", self.network.connect_timeout_ms),
        ];
        match non_zero.iter().find(|(_, value)| *value == 0) {
            Some(&(field, _)) => Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }
}

impl UsbConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Adds `serial` to the authorized list.  Returns `false` if it was
    /// already there.
    pub fn remember(&mut self, serial: &str) -> bool {
        if self.authorized.iter().any(|s| s == serial) {
            return false;
        }
        self.authorized.push(serial.to_string());
        true
    }
}

impl NetworkConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_usb_poll_interval_ms() -> u64 {
    1000
}
fn default_endpoint() -> String {
    "ws://localhost:15555".to_string()
}
fn default_probe_interval_secs() -> u64 {
    5
}
fn default_connect_timeout_ms() -> u64 {
    2000
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval_ms: default_usb_poll_interval_ms(),
            authorized: Vec::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            endpoint: default_endpoint(),
            probe_interval_secs: default_probe_interval_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value fails [`AppConfig::validate`].
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory, including the `devlink` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("devlink"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("devlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("devlink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("devlink-test-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_default_network_endpoint_and_interval() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.network.endpoint, "ws://localhost:15555");
        assert_eq!(cfg.network.probe_interval(), Duration::from_secs(5));
        assert_eq!(cfg.network.connect_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_default_usb_is_enabled_with_no_authorizations() {
        let cfg = AppConfig::default();
        assert!(cfg.usb.enabled);
        assert!(cfg.usb.authorized.is_empty());
        assert_eq!(cfg.usb.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_log_level_is_info() {
        assert_eq!(GeneralConfig::default().log_level, "info");
    }

    #[test]
    fn test_partial_file_fills_missing_fields_with_defaults() {
        // Arrange
        let toml_str = r#"
            [network]
            endpoint = "ws://127.0.0.1:9000"
        "#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("parse");

        // Assert
        assert_eq!(cfg.network.endpoint, "ws://127.0.0.1:9000");
        assert_eq!(cfg.network.probe_interval_secs, 5);
        assert_eq!(cfg.usb, UsbConfig::default());
    }

    #[test]
    fn test_remember_adds_serial_once() {
        let mut usb = UsbConfig::default();

        assert!(usb.remember("ABC"));
        assert!(!usb.remember("ABC"));

        assert_eq!(usb.authorized, vec!["ABC".to_string()]);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let cfg = load_config_from(&temp_config_path()).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_authorizations() {
        // Arrange
        let path = temp_config_path();
        let mut cfg = AppConfig::default();
        cfg.usb.remember("0123456789ABCDEF");

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded.usb.authorized, vec!["0123456789ABCDEF".to_string()]);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_zero_probe_interval_is_rejected_on_load() {
        // Arrange
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[network]\nprobe_interval_secs = 0\n").unwrap();

        // Act
        let result = load_config_from(&path);

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "network.probe_interval_secs",
                ..
            })
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_zero_usb_poll_interval_fails_validation() {
        let mut cfg = AppConfig::default();
        cfg.usb.poll_interval_ms = 0;

        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "usb.poll_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let path = temp_config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[usb\nenabled = ").unwrap();

        let result = load_config_from(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
