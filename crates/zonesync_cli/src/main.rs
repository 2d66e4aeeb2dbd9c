//! zonesync CLI
//!
//! Command-line tools for a device's zonesync metadata directory.
//!
//! # Commands
//!
//! - `inspect` - Display per-zone checkpoints, pending changes and shares
//! - `erase` - Drop a zone's sync metadata, forcing a full re-sync
//! - `resync` - Discard a zone's change token, forcing a full re-sync

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// zonesync metadata tools.
#[derive(Parser)]
#[command(name = "zonesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the metadata directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display sync metadata per zone
    Inspect {
        /// Only show this zone
        #[arg(short, long)]
        zone: Option<String>,

        /// List pending keys, tombstones and deferred records
        #[arg(short, long)]
        details: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Erase a zone's sync metadata; entity data is not touched
    Erase {
        /// Zone to erase
        #[arg(short, long)]
        zone: String,
    },

    /// Discard a zone's change token so the next pass re-syncs everything
    Resync {
        /// Zone to re-sync
        #[arg(short, long)]
        zone: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            zone,
            details,
            format,
        } => {
            let path = cli.path.ok_or("Metadata path required for inspect")?;
            commands::inspect::run(&path, zone.as_deref(), details, &format)?;
        }
        Commands::Erase { zone } => {
            let path = cli.path.ok_or("Metadata path required for erase")?;
            commands::erase::run(&path, &zone)?;
        }
        Commands::Resync { zone } => {
            let path = cli.path.ok_or("Metadata path required for resync")?;
            commands::resync::run(&path, &zone)?;
        }
        Commands::Version => {
            println!("zonesync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("zonesync engine v{}", zonesync_engine::VERSION);
        }
    }

    Ok(())
}
