//! # catalog-sync CLI (`catsync`)
//!
//! The `catsync` binary drives the snapshot reconciliation pipeline: database
//! initialization, staging loads, the three-phase reconcile run, status
//! reporting, and staging cleanup.
//!
//! ## Usage
//!
//! ```bash
//! catsync --config ./config/catsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catsync init` | Create the SQLite database and all tables |
//! | `catsync load <snapshot.json>` | Stage a fetched catalog snapshot |
//! | `catsync reconcile` | Reconcile staging against current, archiving to history |
//! | `catsync status` | Show row counts and the most recent load |
//! | `catsync clear` | Empty the staging tables between runs |
//!
//! A typical run is `clear` → `load` → `reconcile`; running `reconcile`
//! again with an unchanged staging set is a no-op. Runs must not overlap:
//! schedule them serially.

mod compare;
mod config;
mod db;
mod migrate;
mod models;
mod reconcile;
mod schema;
mod stage;
mod stats;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// catalog-sync CLI — snapshot reconciliation and change history for
/// archival catalog records.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the database path and log level.
#[derive(Parser)]
#[command(
    name = "catsync",
    about = "catalog-sync — snapshot reconciliation and change history for archival catalog records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the current/staging/history tables
    /// for both entity kinds, and the load audit table. Idempotent.
    Init,

    /// Stage a fetched catalog snapshot.
    ///
    /// Parses a catalog API JSON response from a local file and writes one
    /// staging row per description record plus one per digital object. Does
    /// not touch the current or history tables.
    Load {
        /// Path to the snapshot JSON file.
        snapshot: PathBuf,

        /// Parse and report counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile the staging set against the current tables.
    ///
    /// Runs the three phases (insert-new, archive-removed, diff-and-replace)
    /// for both entity kinds and prints per-table counts. Superseded rows
    /// land in the history tables, all tagged with this run's timestamp.
    Reconcile {
        /// Compute and report all counts without mutating any table.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show row counts per table and the most recent load.
    Status,

    /// Empty both staging tables.
    ///
    /// Run between snapshots so a load never mixes records from two fetches.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log.level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { snapshot, dry_run } => {
            stage::run_load(&cfg, &snapshot, dry_run).await?;
        }
        Commands::Reconcile { dry_run } => {
            reconcile::run_reconcile(&cfg, dry_run).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Clear => {
            stage::run_clear(&cfg).await?;
        }
    }

    Ok(())
}
