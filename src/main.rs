//! statusboard - endpoint status monitor
//!
//! Probes a fixed roster of websites and cloud regions on fixed intervals
//! and serves the latest snapshot and history as JSON.

mod config;
mod db;
mod probe;
mod registry;
mod scheduler;
mod snapshot;
mod web;

use config::ServerConfig;
use db::Store;
use probe::NetworkProber;
use registry::Registry;
use scheduler::{CycleRunner, HistoryWriter, RetentionManager, Scheduler};
use snapshot::SnapshotStore;
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HISTORY_QUEUE: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statusboard=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting statusboard on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Load the target roster
    let registry = match &cfg.targets_path {
        Some(path) => {
            tracing::info!("Loading targets from {}", path);
            Registry::from_file(path)?
        }
        None => Registry::builtin()?,
    };
    let registry = Arc::new(registry.with_overrides(&cfg.collections));
    tracing::info!(
        collections = registry.collections().len(),
        targets = registry.target_count(),
        "Target roster loaded"
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!(rows = store.history_count()?, "Database initialized successfully");

    let (history, history_task) = HistoryWriter::spawn(store.clone(), HISTORY_QUEUE);
    let prober = NetworkProber::new(cfg.probe_settings())?;
    let runner = Arc::new(CycleRunner::new(
        Arc::new(prober),
        Arc::new(history),
        cfg.probe_settings(),
    ));

    let snapshots = Arc::new(SnapshotStore::new(
        registry.collections().iter().map(|c| c.key.clone()),
    ));

    // Create scheduler
    let mut scheduler = Scheduler::new(&registry, runner, snapshots.clone());
    match cfg.history_retention() {
        Some(retention) => {
            scheduler = scheduler.with_retention(RetentionManager::new(store.clone(), retention));
        }
        None => tracing::info!("History retention disabled"),
    }
    let scheduler = Arc::new(scheduler);
    scheduler.start();

    // Start web server
    let server = Server::new(
        cfg.http_port,
        AppState {
            registry,
            snapshots,
            store,
            scheduler: scheduler.clone(),
        },
    );
    server.start(shutdown_signal()).await?;

    scheduler.stop();
    drop(server);
    drop(scheduler);
    if tokio::time::timeout(std::time::Duration::from_secs(5), history_task).await.is_err() {
        tracing::warn!("History writer did not drain before exit");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
