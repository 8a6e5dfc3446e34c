//! SampleTable Table Service
//!
//! Hosts the tables declared in configuration (plus any restored from the
//! metadata store) until interrupted.

use anyhow::Result;
use clap::Parser;
use sampletable_blob::{BlobStore, MemoryBlobStore};
use sampletable_common::Config;
use sampletable_common::config::LoggingConfig;
use sampletable_meta::TableHost;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sampletable-meta")]
#[command(about = "SampleTable Table Service")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sampletable/meta.toml")]
    config: PathBuf,

    /// Log level (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for durable row metadata (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seconds between table stats log lines
    #[arg(long, default_value = "60")]
    stats_interval: u64,
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());
    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(dir) = args.data_dir {
        config.service.data_dir = Some(dir);
    }
    init_logging(&config.logging);

    info!("Starting SampleTable Table Service");

    let blob: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    warn!("Using the in-process {} blob store; by-reference values do not survive a restart", blob.name());

    let host = TableHost::new(config.service.clone(), blob)?;
    let restored = host.restore()?;
    let created = host.create_configured(&config.tables)?;
    info!(
        "Serving {} tables ({} restored, {} created): {:?}",
        host.table_names().len(),
        restored,
        created,
        host.table_names()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for stats in host.stats().await {
                    info!(
                        "Table {}: {} rows, {} inserts, {} retrieves, {} writes, {} deletes, {} failed cells",
                        stats.table_name,
                        stats.row_count,
                        stats.inserts,
                        stats.retrieves,
                        stats.writes,
                        stats.deletes,
                        stats.failed_cells
                    );
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down");
                break;
            }
        }
    }

    host.shutdown_all().await;
    Ok(())
}
