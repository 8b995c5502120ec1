//! # sync-cli
//!
//! CLI tool for Inkwell sync.
//!
//! ## Commands
//!
//! - `init`: Write a starter configuration file
//! - `config`: Print the effective configuration
//! - `demo`: Run two in-process devices through pairing, sync and a merge
//!
//! ## Example
//!
//! ```bash
//! # Create inkwell-sync.toml for this device
//! inkwell-sync init --name "Writing laptop"
//!
//! # Show what the engine would run with
//! inkwell-sync config
//!
//! # Watch two devices converge
//! RUST_LOG=debug inkwell-sync demo
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{config as config_cmd, demo, init};

/// CLI tool for Inkwell sync.
#[derive(Parser, Debug)]
#[command(name = "inkwell-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./inkwell-sync.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Device name shown to paired devices
        #[arg(long, short)]
        name: String,
    },

    /// Print the effective configuration
    Config,

    /// Run two in-process devices against an in-memory relay
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { name } => {
            let path = cli
                .config
                .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
            init::run(&path, &name).await?;
        }
        Commands::Config => {
            config_cmd::run(cli.config.as_deref())?;
        }
        Commands::Demo => {
            let loaded = config::load(cli.config.as_deref())?;
            demo::run(loaded.config).await?;
        }
    }

    Ok(())
}
