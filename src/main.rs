//! Binary entry point for mediacache.
//!
//! Maintenance CLI over the cache database: schema setup, statistics,
//! pruning, snapshot export/import, flushing and reset.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI output goes to stdout/stderr
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use mediacache::observability::{self, LogProgress, LoggingConfig};
use mediacache::{CacheConfig, MediaCache, MigrationOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 86_400;

/// mediacache - persistence and caching core for media metadata.
#[derive(Parser)]
#[command(name = "mediacache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "MEDIACACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the schema.
    Init,

    /// Show row counts per table.
    Stats,

    /// Delete cached responses older than the given age.
    Prune {
        /// Maximum age in days.
        #[arg(long, default_value_t = 30)]
        days: u64,
    },

    /// Write the durable tables to a snapshot file.
    Export {
        /// Snapshot file to write.
        #[arg(long)]
        out: PathBuf,
    },

    /// Upsert the rows of a snapshot file.
    Import {
        /// Snapshot file to read.
        #[arg(long)]
        from: PathBuf,
    },

    /// Delete every row of one table.
    Flush {
        /// Table name (for example `url_cache`).
        table: String,
    },

    /// Move the embedded database aside and start empty.
    Reset,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = observability::init_logging(LoggingConfig::from_env(cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::load_default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let (cache, outcome) = MediaCache::builder(config)
        .progress(Arc::new(LogProgress))
        .open_with_outcome()
        .context("opening cache")?;

    match cli.command {
        Commands::Init => cmd_init(&cache, &outcome),
        Commands::Stats => cmd_stats(&cache),
        Commands::Prune { days } => cmd_prune(&cache, days),
        Commands::Export { out } => {
            let rows = cache.migrator().export_snapshot(&out)?;
            println!("Exported {rows} rows to {}", out.display());
            Ok(())
        },
        Commands::Import { from } => {
            let rows = cache.migrator().import_snapshot(&from)?;
            println!("Imported {rows} rows from {}", from.display());
            Ok(())
        },
        Commands::Flush { table } => {
            let removed = cache.flush(&table)?;
            println!("Removed {removed} rows from {table}");
            Ok(())
        },
        Commands::Reset => {
            cache.reset()?;
            println!("Database reset; backups are removed shortly");
            Ok(())
        },
    }
}

fn cmd_init(cache: &MediaCache, outcome: &MigrationOutcome) -> anyhow::Result<()> {
    let backend = cache.executor().backend().describe();
    match outcome {
        MigrationOutcome::Created => println!("Created schema at {backend}"),
        MigrationOutcome::UpToDate => println!("Schema at {backend} is up to date"),
        MigrationOutcome::Migrated { from, rows } => println!(
            "Migrated {backend} from {} to {} ({rows} rows carried over)",
            from.as_deref().unwrap_or("unknown"),
            cache.migrator().version()
        ),
    }
    Ok(())
}

fn cmd_stats(cache: &MediaCache) -> anyhow::Result<()> {
    let stats = cache.stats()?;
    let width = stats.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, count) in stats {
        println!("{name:<width$}  {count}");
    }
    if let Some(throttle) = cache.executor().throttle() {
        println!("{:<width$}  {}", "writer_capacity", throttle.capacity());
    }
    Ok(())
}

fn cmd_prune(cache: &MediaCache, days: u64) -> anyhow::Result<()> {
    let max_age = Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
    let mut total = 0;
    while let Some(removed) = cache.urls().prune(max_age)? {
        total += removed;
    }
    println!("Pruned {total} cached responses older than {days} days");
    Ok(())
}
