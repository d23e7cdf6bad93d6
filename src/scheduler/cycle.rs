//! Cycle runner: probes every target of a collection once.

use super::HistorySink;
use crate::probe::{CheckResult, Health, Outcome, ProbeSettings, Prober};
use crate::registry::{Collection, ProbeMethod, Target};
use crate::snapshot::CycleSnapshot;

use chrono::Utc;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

/// Extra time a check gets beyond its probe timeout before it is abandoned.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Runs complete cycles over collections.
pub struct CycleRunner {
    prober: Arc<dyn Prober>,
    sink: Arc<dyn HistorySink>,
    settings: ProbeSettings,
    grace: Duration,
}

impl CycleRunner {
    pub fn new(prober: Arc<dyn Prober>, sink: Arc<dyn HistorySink>, settings: ProbeSettings) -> Self {
        Self {
            prober,
            sink,
            settings,
            grace: DEFAULT_GRACE,
        }
    }

    #[cfg(test)]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Probe every target of the collection and assemble the cycle.
    ///
    /// At most `collection.workers` probes run at once. Every target gets
    /// exactly one result: a check that panics or outlives its deadline is
    /// replaced by a synthetic `down` result.
    pub async fn run_cycle(&self, collection: &Collection, cycle: u64) -> CycleSnapshot {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(collection.workers.max(1)));

        let mut handles = Vec::with_capacity(collection.targets.len());
        for target in &collection.targets {
            let target = Arc::clone(target);
            let prober = Arc::clone(&self.prober);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.settings.timeout_for(target.method);
            let deadline = timeout + self.grace;

            let handle = tokio::spawn({
                let target = Arc::clone(&target);
                async move {
                    // The semaphore is never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    match tokio::time::timeout(deadline, prober.probe(&target)).await {
                        Ok(result) => result,
                        Err(_) => deadline_exceeded(&target, timeout, deadline),
                    }
                }
            });
            handles.push((target, handle));
        }

        let mut results = BTreeMap::new();
        for (target, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let detail = join_error_detail(e);
                    tracing::warn!(
                        collection = %collection.key,
                        target_name = %target.name,
                        error = %detail,
                        "Check task failed"
                    );
                    CheckResult::unknown_error(&target, &detail)
                }
            }
            .in_cycle(cycle);

            tracing::debug!(
                collection = %collection.key,
                target_name = %result.name,
                status = %result.status,
                outcome = %result.outcome,
                message = %result.message,
                "Check complete"
            );

            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.sink.append(&result))) {
                tracing::error!(
                    collection = %collection.key,
                    target_name = %result.name,
                    error = %panic_message(payload),
                    "History append failed"
                );
            }
            results.insert(target.name.clone(), result);
        }

        let snapshot = CycleSnapshot {
            collection: collection.key.clone(),
            cycle,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            results,
        };

        let counts = snapshot.counts();
        tracing::info!(
            collection = %collection.key,
            cycle,
            targets = counts.total,
            operational = counts.operational,
            degraded = counts.degraded,
            down = counts.down,
            duration_ms = snapshot.duration_ms,
            "Cycle complete"
        );

        snapshot
    }
}

fn deadline_exceeded(target: &Target, timeout: Duration, deadline: Duration) -> CheckResult {
    let message = match target.method {
        ProbeMethod::Http => format!("Connection timeout ({}s)", timeout.as_secs()),
        ProbeMethod::Tcp => format!("TCP connection timeout ({}s)", timeout.as_secs()),
    };
    CheckResult::new(
        target,
        Health::Down,
        Outcome::Timeout,
        Some(deadline.as_millis() as u64),
        message,
    )
}

fn join_error_detail(e: JoinError) -> String {
    if e.is_panic() {
        panic_message(e.into_panic())
    } else {
        e.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Group, Registry};
    use crate::scheduler::NullSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Prober scripted by target name.
    struct ScriptedProber {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedProber {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, target: &Target) -> CheckResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if target.name.starts_with("panic") {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("probe exploded for {}", target.name);
            }
            if target.name.starts_with("hang") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            CheckResult::new(target, Health::Operational, Outcome::Connected, Some(50), "TCP connection OK (50 ms)".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<CheckResult>>,
    }

    impl HistorySink for RecordingSink {
        fn append(&self, result: &CheckResult) {
            self.seen.lock().unwrap().push(result.clone());
        }
    }

    struct PanickingSink;

    impl HistorySink for PanickingSink {
        fn append(&self, _result: &CheckResult) {
            panic!("history backend unavailable");
        }
    }

    fn collection(names: &[&str], workers: usize) -> Collection {
        let targets = names
            .iter()
            .map(|name| {
                Arc::new(Target {
                    name: name.to_string(),
                    address: format!("{}.test", name),
                    method: ProbeMethod::Tcp,
                    icon: String::new(),
                    collection: "regions".to_string(),
                    group: "all".to_string(),
                    group_name: "All".to_string(),
                })
            })
            .collect();

        Collection {
            key: "regions".to_string(),
            name: "Regions".to_string(),
            method: ProbeMethod::Tcp,
            interval: Duration::from_secs(60),
            workers,
            groups: vec![Group {
                key: "all".to_string(),
                name: "All".to_string(),
            }],
            targets,
        }
    }

    fn settings() -> ProbeSettings {
        ProbeSettings {
            tcp_timeout: Duration::from_secs(1),
            jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_still_yields_full_cycle() {
        let names: Vec<String> = (0..9).map(|i| format!("ok{}", i)).chain(["panic0".to_string()]).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let sink = Arc::new(RecordingSink::default());
        let runner = CycleRunner::new(Arc::new(ScriptedProber::new()), sink.clone(), settings());
        let snapshot = runner.run_cycle(&collection(&names, 4), 7).await;

        assert_eq!(snapshot.results.len(), 10);
        assert!(snapshot.results.values().all(|r| r.cycle == 7));

        let failed = &snapshot.results["panic0"];
        assert_eq!(failed.status, Health::Down);
        assert_eq!(failed.outcome, Outcome::Error);
        assert_eq!(failed.elapsed_ms, None);
        assert!(failed.message.starts_with("Unknown error: "));

        assert_eq!(snapshot.counts().operational, 9);
        assert_eq!(sink.seen.lock().unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_panic_does_not_fail_cycle() {
        let runner = Arc::new(CycleRunner::new(
            Arc::new(ScriptedProber::new()),
            Arc::new(PanickingSink),
            settings(),
        ));
        let regions = Arc::new(collection(&["ok0", "ok1", "ok2"], 2));

        let handle = tokio::spawn({
            let runner = runner.clone();
            let regions = regions.clone();
            async move { runner.run_cycle(&regions, 1).await }
        });
        let snapshot = handle.await.expect("cycle must complete despite sink panics");

        assert_eq!(snapshot.results.len(), 3);
        assert_eq!(snapshot.counts().operational, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_by_workers() {
        let names: Vec<String> = (0..12).map(|i| format!("t{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let prober = Arc::new(ScriptedProber::new());
        let runner = CycleRunner::new(prober.clone(), Arc::new(NullSink), settings());
        let snapshot = runner.run_cycle(&collection(&names, 3), 1).await;

        assert_eq!(snapshot.results.len(), 12);
        assert!(prober.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_hits_deadline() {
        let runner = CycleRunner::new(Arc::new(ScriptedProber::new()), Arc::new(NullSink), settings())
            .with_grace(Duration::from_secs(1));
        let snapshot = runner.run_cycle(&collection(&["hang0", "ok0"], 2), 1).await;

        let hung = &snapshot.results["hang0"];
        assert_eq!(hung.status, Health::Down);
        assert_eq!(hung.outcome, Outcome::Timeout);
        assert_eq!(hung.message, "TCP connection timeout (1s)");
        assert_eq!(snapshot.results["ok0"].status, Health::Operational);
    }

    #[tokio::test(start_paused = true)]
    async fn test_builtin_collection_runs() {
        let registry = Registry::builtin().unwrap();
        let websites = registry.get("websites").unwrap();

        let runner = CycleRunner::new(Arc::new(ScriptedProber::new()), Arc::new(NullSink), settings());
        let snapshot = runner.run_cycle(websites, 1).await;

        assert_eq!(snapshot.collection, "websites");
        assert_eq!(snapshot.results.len(), websites.targets.len());
    }
}
