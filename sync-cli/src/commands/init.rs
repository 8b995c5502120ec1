//! Write a starter configuration file.

use anyhow::Result;
use inkwell_sync_client::EngineConfig;
use std::path::Path;

use crate::config;

/// Run the init command.
pub async fn run(path: &Path, name: &str) -> Result<()> {
    if path.exists() {
        anyhow::bail!(
            "Configuration already exists. Delete {} to reinitialize.",
            path.display()
        );
    }

    let config = EngineConfig::default().with_device_name(name);
    config::save(&config, path).await?;

    println!("Configuration written!");
    println!();
    println!("  Device name: {}", config.device.name);
    println!("  Server:      {}", config.server.url);
    println!("  File:        {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add your account token under [server]");
    println!("  2. Check the result: inkwell-sync config");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_writes_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inkwell-sync.toml");

        run(&path, "Study").await.unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.device.name, "Study");
    }

    #[tokio::test]
    async fn init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inkwell-sync.toml");

        run(&path, "First").await.unwrap();
        assert!(run(&path, "Second").await.is_err());

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.device.name, "First");
    }
}
