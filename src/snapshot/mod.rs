//! Snapshot store.
//!
//! Holds the last completed cycle of every collection. Each collection has
//! its own slot holding an `Arc<CycleSnapshot>`; publishing swaps the whole
//! `Arc`, so a reader either sees the previous cycle or the new one in full.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::probe::{CheckResult, Health};

/// Snapshot error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

/// Per-classification counts over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub operational: usize,
    pub degraded: usize,
    pub down: usize,
}

impl StatusCounts {
    pub fn tally<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a CheckResult>,
    {
        let mut counts = Self::default();
        for r in results {
            counts.total += 1;
            match r.status {
                Health::Operational => counts.operational += 1,
                Health::Degraded => counts.degraded += 1,
                Health::Down => counts.down += 1,
            }
        }
        counts
    }
}

/// The complete results of one cycle of a collection.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSnapshot {
    pub collection: String,
    pub cycle: u64,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Results keyed by target name.
    pub results: BTreeMap<String, CheckResult>,
}

impl CycleSnapshot {
    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(self.results.values())
    }

    /// Results belonging to one group.
    pub fn in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a CheckResult> + 'a {
        self.results.values().filter(move |r| r.group == group)
    }

    /// Find a result by target name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&CheckResult> {
        self.results.get(name).or_else(|| {
            let wanted = name.to_lowercase();
            self.results.values().find(|r| r.name.to_lowercase() == wanted)
        })
    }
}

/// What a reader sees for a collection.
#[derive(Debug, Clone)]
pub enum SnapshotState {
    /// No cycle has completed yet.
    Pending,
    Ready(Arc<CycleSnapshot>),
}

impl SnapshotState {
    #[cfg(test)]
    pub fn ready(self) -> Option<Arc<CycleSnapshot>> {
        match self {
            SnapshotState::Pending => None,
            SnapshotState::Ready(s) => Some(s),
        }
    }
}

/// Latest snapshot per collection.
///
/// The set of collections is fixed at construction; only slot contents change.
pub struct SnapshotStore {
    slots: HashMap<String, RwLock<Option<Arc<CycleSnapshot>>>>,
}

impl SnapshotStore {
    pub fn new<I, S>(collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = collections
            .into_iter()
            .map(|k| (k.into(), RwLock::new(None)))
            .collect();
        Self { slots }
    }

    /// Replace the visible snapshot of a collection.
    pub async fn publish(&self, snapshot: CycleSnapshot) -> Result<(), SnapshotError> {
        let slot = self
            .slots
            .get(&snapshot.collection)
            .ok_or_else(|| SnapshotError::UnknownCollection(snapshot.collection.clone()))?;

        let snapshot = Arc::new(snapshot);
        *slot.write().await = Some(snapshot);
        Ok(())
    }

    /// Read the latest snapshot of a collection.
    pub async fn read(&self, collection: &str) -> Result<SnapshotState, SnapshotError> {
        let slot = self
            .slots
            .get(collection)
            .ok_or_else(|| SnapshotError::UnknownCollection(collection.to_string()))?;

        Ok(match slot.read().await.as_ref() {
            Some(s) => SnapshotState::Ready(Arc::clone(s)),
            None => SnapshotState::Pending,
        })
    }
}
