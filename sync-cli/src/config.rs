//! Configuration file handling for inkwell-sync.

use anyhow::{Context, Result};
use inkwell_sync_client::EngineConfig;
use std::path::{Path, PathBuf};

/// File read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "inkwell-sync.toml";

/// Configuration in effect and where it came from.
#[derive(Debug)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: EngineConfig,
    /// File it was read from, or `None` for built-in defaults.
    pub source: Option<PathBuf>,
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, `inkwell-sync.toml` in the
/// working directory is used if present, otherwise the defaults.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(LoadedConfig {
                    config: EngineConfig::default(),
                    source: None,
                });
            }
            default
        }
    };

    let config = EngineConfig::from_file(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        source: Some(path),
    })
}

/// Render a configuration as TOML.
pub fn render(config: &EngineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize configuration")
}

/// Write a configuration file.
pub async fn save(config: &EngineConfig, path: &Path) -> Result<()> {
    let contents = render(config)?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
