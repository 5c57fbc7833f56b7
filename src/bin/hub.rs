use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use heartwatch::{
    actors::{
        dispatcher::DispatcherHandle,
        monitor::MonitorHandle,
        receiver::{Ingestor, ReceiverHandle},
    },
    clock::{Clock, SystemClock},
    config::{Config, StorageConfig, read_config_file},
    sinks::RegisteredSink,
    storage::{MemoryStore, StatusStore},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{EnvFilter, filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let targets = filter::Targets::new().with_targets(vec![
        ("heartwatch", LevelFilter::TRACE),
        ("heartwatch_hub", LevelFilter::TRACE),
        ("sqlx", LevelFilter::WARN),
    ]);
    let level = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(targets)
        .with(level)
        .init();
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn StatusStore>> {
    match &config.storage {
        StorageConfig::None => {
            warn!("using in-memory storage, state and cooldowns are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = heartwatch::storage::sqlite::SqliteStore::new(path)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage requested but the `storage-sqlite` feature is disabled")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;
    config.apply_env();
    let key = config.shared_key()?;

    let store = open_store(&config).await?;
    match store.health_check().await {
        Ok(health) if health.healthy => debug!("{}", health.message),
        Ok(health) => warn!("{}", health.message),
        Err(e) => warn!("storage health check failed: {e}"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client = reqwest::Client::new();
    let sinks: Vec<RegisteredSink> = config
        .sinks
        .iter()
        .map(|sink| RegisteredSink::from_config(sink, client.clone()))
        .collect();
    if sinks.is_empty() {
        warn!("no sinks configured, alerts are only recorded");
    }

    let dispatcher = DispatcherHandle::spawn(
        config.dispatcher_config(),
        sinks,
        store.clone(),
        clock.clone(),
    );
    let monitor = MonitorHandle::spawn(
        config.monitor_config(),
        store.clone(),
        dispatcher.clone(),
        clock.clone(),
    );
    let ingestor = Ingestor::new(
        key,
        store.clone(),
        monitor.clone(),
        clock,
        config.ingest_config(),
    );
    let receiver = ReceiverHandle::bind(config.listen, ingestor).await?;

    info!("listening on {}", receiver.local_addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    match receiver.shutdown().await {
        Ok(stats) => debug!(
            "receiver: {} received, {} accepted, {} rejected",
            stats.received, stats.accepted, stats.rejected
        ),
        Err(e) => error!("{e:#}"),
    }
    if let Err(e) = monitor.shutdown().await {
        error!("{e:#}");
    }
    match dispatcher.shutdown().await {
        Ok(stats) => debug!(
            "dispatcher: {} delivered, {} failed, {} aborted",
            stats.delivered, stats.failed, stats.aborted
        ),
        Err(e) => error!("{e:#}"),
    }
    if let Err(e) = store.close().await {
        error!("error closing store: {e}");
    }

    Ok(())
}
