//! rehost - command-line driver for the asset migration engine.
//!
//! Loads a JSON configuration, opens the datastore and object storage
//! clients and runs the migration from the last checkpoint.

use anyhow::{Context, Result};
use clap::Parser;
use rehost::{HttpClient, MigrationDriver, MigratorConfig, RunOptions, S3ObjectStore, SqliteDatastore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "rehost")]
#[command(about = "Re-host record assets in object storage, resumably")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "rehost.json")]
    config: PathBuf,

    /// Take a fresh snapshot of the working set, backing up existing state
    #[arg(long)]
    fresh: bool,

    /// Fetch and store assets but leave the datastore untouched
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many chunks
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG overrides --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = MigratorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        "Starting rehost (bucket {}, chunk size {}, {} workers)",
        config.storage.bucket, config.run.chunk_size, config.run.workers
    );

    let datastore = SqliteDatastore::open(&config.datastore)
        .with_context(|| format!("opening datastore {}", config.datastore.path.display()))?;
    let store = S3ObjectStore::connect(&config.storage).await?;
    let http = HttpClient::with_limits(config.run.request_timeout(), config.run.max_connections)?;

    let mut driver =
        MigrationDriver::new(config, Box::new(datastore), Arc::new(http), Arc::new(store))?;

    let options = RunOptions {
        fresh_snapshot: args.fresh,
        dry_run: args.dry_run,
        max_chunks: args.max_chunks,
    };
    let summary = driver.run(&options).await?;

    info!(
        "Processed chunks {}..{} of {} ({} ids): {} stored, {} missing, {} skipped, {} rows updated{}",
        summary.first_chunk + 1,
        summary.first_chunk + summary.chunks_processed,
        summary.chunk_count,
        summary.total_ids,
        summary.stats.stored,
        summary.stats.missing,
        summary.stats.skipped,
        summary.stats.rows_updated,
        if summary.completed { "; migration complete" } else { "" }
    );

    Ok(())
}
