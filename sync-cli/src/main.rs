//! # shelf-sync
//!
//! Command-line peer for shelf-sync LAN library sync.
//!
//! ## Commands
//!
//! - `init`: Create this device's identity
//! - `discover`: Listen for devices announcing on the LAN
//! - `serve`: Accept pairing and sync requests
//! - `pair`: Pair with a discovered device using its PIN
//! - `sync`: Sync the local library with a paired device
//! - `trust`: List or revoke paired devices
//! - `library`: List or import books
//!
//! ## Example
//!
//! ```bash
//! # On the desktop
//! shelf-sync init --name "Desk"
//! shelf-sync serve --pin 4821
//!
//! # On the laptop
//! shelf-sync init --name "Laptop"
//! shelf-sync library import books.json
//! shelf-sync discover
//! shelf-sync pair <device-id> --pin 4821
//! shelf-sync sync <device-id>
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod library;

use commands::{discover, init, pair, serve, sync, trust};
use config::Workspace;

/// Command-line peer for shelf-sync.
#[derive(Parser, Debug)]
#[command(name = "shelf-sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory for identity, trust and library
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Engine configuration file (default: config.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create this device's identity
    Init {
        /// Device name shown to peers
        #[arg(long, short)]
        name: String,
    },

    /// Listen for devices on the LAN
    Discover {
        /// How long to listen
        #[arg(long, short, default_value = "5")]
        seconds: u64,
    },

    /// Accept pairing and sync requests until Ctrl-C
    Serve {
        /// PIN peers must type (generated if not given)
        #[arg(long, short)]
        pin: Option<String>,

        /// Do not announce this device on the LAN
        #[arg(long)]
        no_announce: bool,
    },

    /// Pair with a discovered device
    Pair {
        /// Device id, or a unique prefix of one
        device: String,

        /// PIN shown on the other device
        #[arg(long, short)]
        pin: String,
    },

    /// Sync the library with a paired device
    Sync {
        /// Device id, or a unique prefix of one
        device: String,
    },

    /// Manage paired devices
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Manage the local library
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
}

#[derive(Subcommand, Debug)]
enum TrustAction {
    /// List paired devices
    List,
    /// Forget a paired device
    Revoke {
        /// Device id, or a unique prefix of one
        device: String,
    },
}

#[derive(Subcommand, Debug)]
enum LibraryAction {
    /// List books
    List,
    /// Add or replace books from a JSON file
    Import {
        /// JSON array of books
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    let workspace = Workspace::open(data_dir, cli.config.as_deref())?;

    match cli.command {
        Commands::Init { name } => init::run(&workspace, &name).await?,
        Commands::Discover { seconds } => discover::run(&workspace, seconds).await?,
        Commands::Serve { pin, no_announce } => serve::run(&workspace, pin, !no_announce).await?,
        Commands::Pair { device, pin } => pair::run(&workspace, &device, &pin).await?,
        Commands::Sync { device } => sync::run(&workspace, &device).await?,
        Commands::Trust { action } => match action {
            TrustAction::List => trust::list(&workspace).await?,
            TrustAction::Revoke { device } => trust::revoke(&workspace, &device).await?,
        },
        Commands::Library { action } => match action {
            LibraryAction::List => commands::library::list(&workspace).await?,
            LibraryAction::Import { file } => {
                commands::library::import(&workspace, &file).await?
            }
        },
    }

    Ok(())
}

/// Default data directory for shelf-sync.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "shelf-sync", "shelf-sync")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
