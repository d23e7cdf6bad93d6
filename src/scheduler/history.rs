//! History sink: per-result append into SQLite through a batching channel.

use crate::db::{HistoryRecord, Store};
use crate::probe::CheckResult;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_THRESHOLD: usize = 500;

/// Destination for completed check results.
///
/// `append` must not block; delivery is best-effort.
pub trait HistorySink: Send + Sync {
    fn append(&self, result: &CheckResult);
}

/// Sink that discards everything.
#[cfg(test)]
pub struct NullSink;

#[cfg(test)]
impl HistorySink for NullSink {
    fn append(&self, _result: &CheckResult) {}
}

/// Sink that queues results for the SQLite batch writer.
pub struct HistoryWriter {
    tx: mpsc::Sender<HistoryRecord>,
}

impl HistoryWriter {
    /// Start the batch writer task. The task exits, flushing what it holds,
    /// once every `HistoryWriter` handle is dropped.
    pub fn spawn(store: Arc<Store>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_batch_writer(rx, store));
        (Self { tx }, handle)
    }
}

impl HistorySink for HistoryWriter {
    fn append(&self, result: &CheckResult) {
        match self.tx.try_send(HistoryRecord::from(result)) {
            Ok(()) => {}
            Err(TrySendError::Full(r)) => {
                tracing::warn!(collection = %r.collection, target_name = %r.name, "History queue full, dropping result");
            }
            Err(TrySendError::Closed(r)) => {
                tracing::warn!(collection = %r.collection, target_name = %r.name, "History writer stopped, dropping result");
            }
        }
    }
}

/// Run the batch writer that accumulates and flushes history records.
async fn run_batch_writer(mut rx: mpsc::Receiver<HistoryRecord>, store: Arc<Store>) {
    let mut buffer: Vec<HistoryRecord> = Vec::with_capacity(100);
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(r) => {
                        buffer.push(r);
                        if buffer.len() >= FLUSH_THRESHOLD {
                            flush_buffer(&store, &mut buffer);
                        }
                    }
                    None => {
                        // Channel closed, flush remaining and exit
                        flush_buffer(&store, &mut buffer);
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush_buffer(&store, &mut buffer);
            }
        }
    }
}

fn flush_buffer(store: &Store, buffer: &mut Vec<HistoryRecord>) {
    if buffer.is_empty() {
        return;
    }

    if let Err(e) = store.add_history(buffer) {
        tracing::error!(rows = buffer.len(), error = %e, "Failed to flush history");
    }

    buffer.clear();
}
