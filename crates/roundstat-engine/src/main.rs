//! Ingest binary for Roundstat.
//!
//! Reads typed gameplay facts as JSON lines on stdin, keeps live
//! per-participant statistics in a [`SessionStore`], and persists snapshots
//! to `PostgreSQL` through the backpressure-aware pipeline.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `roundstat-config.yaml` (or `ROUNDSTAT_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the `PostgreSQL` pool (applying migrations when configured)
//! 4. Spawn the persistence worker
//! 5. Read the feed, capturing dirty participants on every interval tick
//! 6. On end of input or a shutdown signal: capture everyone, close the
//!    queue, signal the worker and wait (bounded) for the drain

mod error;
mod feed;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use roundstat_core::config::{LoggingConfig, StatsConfig};
use roundstat_core::session::SessionStore;
use roundstat_db::PostgresPool;
use roundstat_pipeline::{
    HealthCounters, PersistenceWorker, PostgresWriter, ResiliencePipeline, WorkerSettings,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::feed::Feed;

const DEFAULT_CONFIG_PATH: &str = "roundstat-config.yaml";

/// Extra time granted to the worker join beyond its own grace period.
const JOIN_MARGIN: Duration = Duration::from_secs(1);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the database connection or reading
/// the feed fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration (logged once the subscriber exists).
    let (config, config_path) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("roundstat-engine starting");
    match &config_path {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("config file not found, using defaults"),
    }

    // 3. Connect to PostgreSQL.
    let pool = PostgresPool::open(&config.database)
        .await
        .map_err(EngineError::from)?;

    // 4. Spawn the persistence worker.
    let health = Arc::new(HealthCounters::new());
    let (queue, rx) = roundstat_pipeline::channel(config.queue.capacity, Arc::clone(&health));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let settings = WorkerSettings::from_config(&config.worker);
    let join_budget = settings.shutdown_budget().saturating_add(JOIN_MARGIN);
    let mut worker = PersistenceWorker::new(
        rx,
        PostgresWriter::new(pool.clone()),
        ResiliencePipeline::from_config(&config.resilience, Arc::clone(&health)),
        settings,
        Arc::clone(&health),
        shutdown_rx,
    )
    .spawn();
    info!(queue_capacity = config.queue.capacity, "persistence worker spawned");

    // 5. Read the feed.
    let mut feed = Feed::new(
        SessionStore::new(),
        queue.clone(),
        config.snapshots.capture_on_round_end,
    );
    let lines = run_feed(&mut feed, config.snapshots.interval()).await?;

    // 6. Shutdown.
    let final_snapshots = feed.capture_all();
    info!(lines, final_snapshots, participants = feed.store().len(), "feed finished");
    queue.close();
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("persistence worker already stopped");
    }

    match tokio::time::timeout(join_budget, &mut worker).await {
        Ok(Ok(report)) => info!(
            batches = report.batches,
            messages = report.messages,
            abandoned = report.abandoned,
            "persistence worker joined"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "persistence worker task failed"),
        Err(_) => {
            let abandoned = queue.abandon_pending();
            worker.abort();
            tracing::error!(
                budget_ms = u64::try_from(join_budget.as_millis()).unwrap_or(u64::MAX),
                abandoned,
                "persistence worker did not stop in time"
            );
        }
    }

    let h = health.snapshot();
    info!(
        enqueued = h.enqueued,
        dropped = h.dropped,
        batches_written = h.batches_written,
        batches_failed = h.batches_failed,
        batches_dropped_circuit_open = h.batches_dropped_circuit_open,
        rows_written = h.rows_written,
        rows_skipped_malformed = h.rows_skipped_malformed,
        items_abandoned = h.items_abandoned,
        circuit_state = h.circuit_state.as_str(),
        "roundstat-engine shutdown complete"
    );
    pool.close().await;

    Ok(())
}

/// Read feed lines until end of input or a shutdown signal, capturing dirty
/// participants on every interval tick. Returns the number of lines read.
async fn run_feed(feed: &mut Feed, interval: Duration) -> Result<u64, EngineError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut count: u64 = 0;

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let queued = feed.capture_dirty();
                if queued > 0 {
                    tracing::debug!(queued, "periodic snapshot capture");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("end of feed");
                    break;
                };
                count = count.saturating_add(1);
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = feed.handle_line(&line) {
                    tracing::warn!(line = count, error = %e, "feed line rejected");
                }
            }
        }
    }
    Ok(count)
}

/// Resolve when the process is asked to stop (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured
/// level. Logs go to stderr; stdin carries the feed.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration from `ROUNDSTAT_CONFIG` or `roundstat-config.yaml`,
/// falling back to defaults when the file does not exist. Returns the path
/// that was read, if any.
fn load_config() -> Result<(StatsConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os("ROUNDSTAT_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (mut config, read) = if path.exists() {
        (StatsConfig::from_file(&path)?, Some(path))
    } else {
        (StatsConfig::default(), None)
    };
    config.database.apply_env_overrides();
    Ok((config, read))
}
