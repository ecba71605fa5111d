//! LAD store daemon.
//!
//! Starts the store, optionally replays a file of JSON records, and runs
//! until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: no persistence, 4 shards
//! lad-server
//!
//! # Config file, restoring a specific snapshot
//! lad-server --config /etc/lad/lad.toml --restore /var/lib/lad/lad-00001700000000000.snap
//!
//! # Load recorded samples (one JSON record per line)
//! lad-server --replay samples.jsonl
//! ```
//!
//! # Graceful Shutdown
//!
//! On Ctrl+C the daemon:
//! 1. Closes the source gate
//! 2. Stops the backup schedule and reaper
//! 3. Cancels queued ingest events and joins the shard workers

use anyhow::{Context, Result};
use clap::Parser;
use ladstore::{
    DiscriminatorFilter, JsonSampleDecoder, LadConfig, LadError, LadService, SampleDecoder,
    StartOptions,
};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// LAD store daemon.
#[derive(Parser, Debug)]
#[command(name = "lad-server")]
#[command(about = "Latest-available-data store for spacecraft telemetry")]
#[command(version)]
struct Args {
    /// Path to lad.toml
    #[arg(long, short, env = "LAD_CONFIG")]
    config: Option<PathBuf>,

    /// Restore this snapshot file at startup
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Restore the newest snapshot even when persistence is disabled
    #[arg(long)]
    force_restore: bool,

    /// Disable periodic snapshots regardless of the config file
    #[arg(long)]
    no_persistence: bool,

    /// Override the snapshot directory
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Replay a file of JSON records (one per line) after startup
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Write a commented default config to --config if it is missing, then exit
    #[arg(long)]
    init_config: bool,
}

fn replay(service: &LadService, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let source = service.attach_source(format!("replay:{}", path.display()))?;
    let decoder: Arc<dyn SampleDecoder> = Arc::new(JsonSampleDecoder::new());

    let mut published = 0u64;
    let mut dropped = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match source.publish_raw(line.into_bytes(), Arc::clone(&decoder)) {
            Ok(_) => published += 1,
            Err(e @ LadError::Capacity { .. }) => {
                dropped += 1;
                if dropped == 1 {
                    warn!(error = %e, "Replay is outrunning the shard workers");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !service.drain(Duration::from_secs(30)) {
        warn!("Replay still draining after 30s");
    }
    let stats = service.stats();
    info!(
        published,
        dropped,
        decode_errors = stats.ingest.decode_errors,
        series = stats.population.series,
        "Replay finished"
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.init_config {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(ladstore::CONFIG_FILE_NAME));
        LadConfig::write_default_if_missing(&path)?;
        info!(path = %path.display(), "Config file ready");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => LadConfig::from_file(path)?,
        None => LadConfig::default(),
    };
    if args.no_persistence {
        config.persistence.enabled = false;
    }
    if let Some(dir) = args.backup_dir.clone() {
        config.persistence.directory = dir;
    }

    let service = LadService::start(
        config,
        StartOptions {
            restore_path: args.restore.clone(),
            force_restore: args.force_restore,
        },
    )
    .context("Failed to start LAD service")?;

    if let Some(path) = &args.replay {
        replay(&service, path)?;
    }

    let depth = service.depth(&DiscriminatorFilter::all());
    info!(series = depth.len(), "Serving; press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping gracefully...");

    service.shutdown();
    match service.stats().to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "Failed to render final statistics"),
    }
    Ok(())
}
