//! Retention manager for cleaning up old history.

use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Manager for deleting history past the retention window.
pub struct RetentionManager {
    store: Arc<Store>,
    retention: Duration,
    stop: broadcast::Sender<()>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention: Duration) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            store,
            retention,
            stop,
        }
    }

    /// Start the retention manager background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let retention = self.retention;
        let mut rx = self.stop.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention);
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub fn stop(&self) {
        let _ = self.stop.send(());
    }
}

fn process_retention(store: &Store, retention: Duration) {
    let cutoff = Utc::now() - ChronoDuration::seconds(retention.as_secs() as i64);

    match store.delete_history_before(cutoff) {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, %cutoff, "RetentionManager: Deleted expired history"),
        Err(e) => tracing::error!(error = %e, "RetentionManager: Failed to delete history"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::HistoryRecord;
    use crate::probe::{Health, Outcome};
    use tempfile::NamedTempFile;

    fn record(name: &str, age_days: i64) -> HistoryRecord {
        HistoryRecord {
            collection: "ec2".to_string(),
            name: name.to_string(),
            address: "ec2.test".to_string(),
            status: Health::Operational,
            status_code: Outcome::Connected,
            response_time: Some(5),
            message: String::new(),
            checked_at: Utc::now() - ChronoDuration::days(age_days),
        }
    }

    #[test]
    fn test_process_retention_removes_expired_rows() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store
            .add_history(&[record("old", 31), record("recent", 29), record("fresh", 0)])
            .unwrap();

        process_retention(&store, Duration::from_secs(30 * 24 * 60 * 60));

        assert_eq!(store.history_count().unwrap(), 2);
        assert!(store.get_history("old", None, 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_sweeps_immediately() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        store.add_history(&[record("old", 10)]).unwrap();

        let manager = RetentionManager::new(store.clone(), Duration::from_secs(24 * 60 * 60));
        manager.start();

        for _ in 0..100 {
            if store.history_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        manager.stop();

        assert_eq!(store.history_count().unwrap(), 0);
    }
}
