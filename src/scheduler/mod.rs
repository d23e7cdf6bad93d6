//! Scheduler module for running probe cycles and publishing snapshots.
//!
//! Each collection gets its own loop task that runs one cycle, publishes
//! the result and sleeps until its next period. Cycles of one collection
//! never overlap; a cycle that overruns its period is followed immediately
//! by the next one.

mod cycle;
mod history;
mod retention;

pub use cycle::*;
pub use history::*;
pub use retention::*;

use crate::registry::{Collection, Registry};
use crate::snapshot::SnapshotStore;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::MissedTickBehavior;

/// Observable state of a collection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    RunningCycle,
    Publishing,
    Sleeping,
}

struct CollectionLoop {
    collection: Arc<Collection>,
    refresh: Arc<Notify>,
    state: Arc<watch::Sender<LoopState>>,
}

/// The main scheduler that drives every collection.
pub struct Scheduler {
    runner: Arc<CycleRunner>,
    snapshots: Arc<SnapshotStore>,
    loops: HashMap<String, CollectionLoop>,
    stop_tx: broadcast::Sender<()>,
    retention: Option<RetentionManager>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(registry: &Registry, runner: Arc<CycleRunner>, snapshots: Arc<SnapshotStore>) -> Self {
        let loops = registry
            .collections()
            .iter()
            .map(|c| {
                let (state, _) = watch::channel(LoopState::Idle);
                let entry = CollectionLoop {
                    collection: Arc::clone(c),
                    refresh: Arc::new(Notify::new()),
                    state: Arc::new(state),
                };
                (c.key.clone(), entry)
            })
            .collect();

        let (stop_tx, _) = broadcast::channel(1);

        Self {
            runner,
            snapshots,
            loops,
            stop_tx,
            retention: None,
            started: AtomicBool::new(false),
        }
    }

    /// Run a retention sweeper alongside the collection loops.
    pub fn with_retention(mut self, retention: RetentionManager) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Start one loop per collection. Calling it again does nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(collections = self.loops.len(), "Starting scheduler");

        for entry in self.loops.values() {
            tracing::info!(
                collection = %entry.collection.key,
                targets = entry.collection.targets.len(),
                interval_secs = entry.collection.interval.as_secs(),
                workers = entry.collection.workers,
                "Scheduler: Adding collection"
            );

            tokio::spawn(run_collection_loop(
                Arc::clone(&entry.collection),
                Arc::clone(&self.runner),
                Arc::clone(&self.snapshots),
                Arc::clone(&entry.state),
                Arc::clone(&entry.refresh),
                self.stop_tx.subscribe(),
            ));
        }

        if let Some(retention) = &self.retention {
            retention.start();
        }
    }

    /// Signal every loop and the retention sweeper to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
        if let Some(retention) = &self.retention {
            retention.stop();
        }
        tracing::info!("Scheduler stopped");
    }

    /// Ask for a cycle of a collection as soon as possible.
    ///
    /// Returns `false` for an unknown collection. Requests made while a cycle
    /// is running coalesce into one follow-up cycle.
    pub fn request_refresh(&self, collection: &str) -> bool {
        match self.loops.get(collection) {
            Some(entry) => {
                entry.refresh.notify_one();
                true
            }
            None => false,
        }
    }

    /// Current state of a collection loop.
    pub fn state(&self, collection: &str) -> Option<LoopState> {
        self.loops.get(collection).map(|entry| *entry.state.borrow())
    }
}

/// Run the cycle loop for a single collection.
async fn run_collection_loop(
    collection: Arc<Collection>,
    runner: Arc<CycleRunner>,
    snapshots: Arc<SnapshotStore>,
    state: Arc<watch::Sender<LoopState>>,
    refresh: Arc<Notify>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(collection.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {}
            _ = refresh.notified() => {
                tracing::info!(collection = %collection.key, "Refresh requested");
                interval.reset();
            }
        }

        cycle += 1;
        state.send_replace(LoopState::RunningCycle);

        // A panic inside the cycle surfaces as a JoinError instead of
        // killing this loop.
        let task = tokio::spawn({
            let runner = Arc::clone(&runner);
            let collection = Arc::clone(&collection);
            async move { runner.run_cycle(&collection, cycle).await }
        });
        let abort = task.abort_handle();

        let outcome = tokio::select! {
            _ = stop_rx.recv() => {
                abort.abort();
                break;
            }
            outcome = task => outcome,
        };

        match outcome {
            Ok(snapshot) => {
                state.send_replace(LoopState::Publishing);
                if let Err(e) = snapshots.publish(snapshot).await {
                    tracing::error!(collection = %collection.key, cycle, error = %e, "Failed to publish snapshot");
                }
            }
            Err(e) => {
                tracing::error!(collection = %collection.key, cycle, error = %e, "Cycle failed");
            }
        }

        state.send_replace(LoopState::Sleeping);
    }

    state.send_replace(LoopState::Idle);
    tracing::info!(collection = %collection.key, "Collection loop stopped");
}
