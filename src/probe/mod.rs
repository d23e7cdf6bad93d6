//! Probe module for endpoint health checks.
//!
//! Supports HTTP GET and raw TCP connect probes. A probe never fails: every
//! error is folded into a `down` (or `degraded`) [`CheckResult`].

mod http;
mod result;
mod tcp;

pub use http::*;
pub use result::*;
pub use tcp::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::registry::{ProbeMethod, Target};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Latency thresholds for HTTP classification, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpThresholds {
    /// Above this a response is `degraded`.
    pub degraded_ms: u64,
    /// Above this a response is `down`.
    pub down_ms: u64,
    /// A 403 faster than this counts as `operational`.
    pub forbidden_fast_ms: u64,
}

impl Default for HttpThresholds {
    fn default() -> Self {
        Self {
            degraded_ms: 5000,
            down_ms: 15000,
            forbidden_fast_ms: 5000,
        }
    }
}

/// Latency thresholds for TCP classification, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpThresholds {
    pub high_ms: u64,
    pub elevated_ms: u64,
}

impl Default for TcpThresholds {
    fn default() -> Self {
        Self {
            high_ms: 5000,
            elevated_ms: 2000,
        }
    }
}

/// Tunables shared by every probe.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub http_timeout: Duration,
    pub tcp_timeout: Duration,
    pub tcp_port: u16,
    pub http: HttpThresholds,
    pub tcp: TcpThresholds,
    /// Upper bound of the random delay before each probe.
    pub jitter: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(15),
            tcp_timeout: Duration::from_secs(10),
            tcp_port: 443,
            http: HttpThresholds::default(),
            tcp: TcpThresholds::default(),
            jitter: Duration::from_millis(100),
        }
    }
}

impl ProbeSettings {
    /// The per-attempt timeout for a probe method.
    pub fn timeout_for(&self, method: ProbeMethod) -> Duration {
        match method {
            ProbeMethod::Http => self.http_timeout,
            ProbeMethod::Tcp => self.tcp_timeout,
        }
    }
}

/// Something that can check a single target.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one target. Must not panic or fail: errors become `down` results.
    async fn probe(&self, target: &Target) -> CheckResult;
}

/// Prober that performs real HTTP and TCP checks.
pub struct NetworkProber {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl NetworkProber {
    pub fn new(settings: ProbeSettings) -> Result<Self, ProbeError> {
        let client = build_http_client(settings.http_timeout)?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, target: &Target) -> CheckResult {
        // Add jitter to avoid thundering herd
        let max_jitter = self.settings.jitter.as_millis() as u64;
        if max_jitter > 0 {
            let jitter = rand::random::<u64>() % max_jitter;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        match target.method {
            ProbeMethod::Http => run_http_probe(&self.client, target, &self.settings).await,
            ProbeMethod::Tcp => run_tcp_probe(target, &self.settings).await,
        }
    }
}
