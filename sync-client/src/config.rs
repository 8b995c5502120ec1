//! Configuration loading for the sync engine.
//!
//! Configuration is loaded from a TOML file (default: `inkwell-sync.toml`).
//! Every section and field is optional.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// This device.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Sync service.
    #[serde(default)]
    pub server: ServerConfig,
    /// Editor integration.
    #[serde(default)]
    pub editor: EditorConfig,
    /// Outbound update handling.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name shown to paired devices (default: "Inkwell device").
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Sync service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Service URL (default: mem://local).
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Account token (optional until the user signs in).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Timeout in seconds for a single connect attempt (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Editor integration configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Delay between the last keystroke and the CRDT commit (default: 300).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Outbound update configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum deltas buffered while offline, across all projects (default: 1000).
    #[serde(default = "default_max_pending_updates")]
    pub max_pending_updates: usize,
}

// Default value functions
fn default_device_name() -> String {
    "Inkwell device".to_string()
}

fn default_server_url() -> String {
    "mem://local".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_max_pending_updates() -> usize {
    1000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pending_updates: default_max_pending_updates(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the device name.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device.name = name.to_string();
        self
    }

    /// Set the debounce delay.
    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.editor.debounce_ms = delay.as_millis() as u64;
        self
    }

    /// Debounce delay as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.editor.debounce_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
