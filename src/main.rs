//! # asset-loader CLI
//!
//! Loads directories of JSON asset snapshots into the `assets` table.
//!
//! ## Usage
//!
//! ```bash
//! asset-loader --config ./config/loader.toml <command>
//! ```
//!
//! Without `--config`, the connection settings are read from the `DB_*` and
//! `SSH_*` environment variables (see [`Config::from_lookup`]).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `asset-loader init` | Create the target table if it does not exist |
//! | `asset-loader load <dir>` | Upsert every `*.json` file of `<dir>` |
//!
//! ## Examples
//!
//! ```bash
//! # Create the table
//! asset-loader --config ./config/loader.toml init
//!
//! # Load a directory with 16 concurrent writes
//! asset-loader --config ./config/loader.toml load ./export --concurrency 16
//!
//! # Check what would be loaded
//! asset-loader load ./export --dry-run
//!
//! # Machine-readable progress on stderr
//! asset-loader --progress json load ./export 2> progress.jsonl
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use asset_loader::config::{self, Config, IngestConfig};
use asset_loader::progress::ProgressMode;
use asset_loader::{ingest, logging, schema};

/// Load JSON asset snapshots into a relational store.
#[derive(Parser)]
#[command(name = "asset-loader", version)]
struct Cli {
    /// Path to a TOML configuration file.
    ///
    /// When omitted, settings come from the `DB_*` / `SSH_*` environment
    /// variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` on a terminal, `off`
    /// otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Debug-level logging (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the target table and its primary key if missing.
    ///
    /// Safe to run repeatedly.
    Init,

    /// Upsert every matching file of a directory.
    ///
    /// Each file is one batch. Records of files whose name is an integer
    /// are stored as public, all others as private.
    Load {
        /// Directory containing the `*.json` files.
        in_directory: PathBuf,

        /// Override `ingest.concurrency` (maximum in-flight writes).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        concurrency: Option<u64>,

        /// Classify every record and print counts without connecting to the
        /// store.
        #[arg(long)]
        dry_run: bool,
    },
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            let cfg = resolve_config(cli.config.as_deref())?;
            schema::run_init(&cfg).await?;
        }
        Commands::Load {
            in_directory,
            dry_run: true,
            ..
        } => {
            // The store is not needed; fall back to defaults if no
            // connection settings are available.
            let ingest_cfg = match cli.config.as_deref() {
                Some(path) => config::load_config(path)?.ingest,
                None => Config::from_env()
                    .map(|c| c.ingest)
                    .unwrap_or_else(|_| IngestConfig::default()),
            };
            ingest::run_dry_run(&ingest_cfg, &in_directory).await?;
        }
        Commands::Load {
            in_directory,
            concurrency,
            dry_run: false,
        } => {
            let mut cfg = resolve_config(cli.config.as_deref())?;
            if let Some(n) = concurrency {
                cfg.ingest.concurrency = n as usize;
            }
            ingest::run_load(&cfg, &in_directory, progress).await?;
        }
    }

    Ok(())
}
