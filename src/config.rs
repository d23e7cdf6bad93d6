//! Configuration module for statusboard.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::{HttpThresholds, ProbeSettings, TcpThresholds};
use crate::registry::CollectionOverride;

const PREFIX: &str = "STATUSBOARD_";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statusboard.db")
    pub db_path: String,
    /// Roster file replacing the embedded one
    pub targets_path: Option<String>,
    pub http_timeout_secs: u64,
    pub tcp_timeout_secs: u64,
    pub tcp_port: u16,
    pub http_thresholds: HttpThresholds,
    pub tcp_thresholds: TcpThresholds,
    /// Days of history to keep; 0 keeps everything
    pub history_retention_days: u64,
    /// Per-collection cadence overrides, keyed by lowercase collection key
    pub collections: HashMap<String, CollectionOverride>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "statusboard.db".to_string(),
            targets_path: None,
            http_timeout_secs: 15,
            tcp_timeout_secs: 10,
            tcp_port: 443,
            http_thresholds: HttpThresholds::default(),
            tcp_thresholds: TcpThresholds::default(),
            history_retention_days: 30,
            collections: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables (all prefixed `STATUSBOARD_`):
    /// - `HTTP_PORT`, `DB_PATH`, `TARGETS_PATH`
    /// - `HTTP_TIMEOUT_SECS`, `TCP_TIMEOUT_SECS`, `TCP_PORT`
    /// - `HTTP_DEGRADED_MS`, `HTTP_DOWN_MS`, `HTTP_FORBIDDEN_FAST_MS`
    /// - `TCP_HIGH_MS`, `TCP_ELEVATED_MS`
    /// - `HISTORY_RETENTION_DAYS`
    /// - `<COLLECTION>_INTERVAL_SECS`, `<COLLECTION>_WORKERS`
    pub fn load() -> Self {
        Self::from_vars(env::vars())
    }

    /// Build a configuration from `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(PREFIX).map(|k| (k.to_string(), v)))
            .collect();

        let mut cfg = Self::default();

        set(&vars, "HTTP_PORT", &mut cfg.http_port);
        if let Some(path) = vars.get("DB_PATH") {
            cfg.db_path = path.clone();
        }
        cfg.targets_path = vars.get("TARGETS_PATH").filter(|p| !p.is_empty()).cloned();

        set(&vars, "HTTP_TIMEOUT_SECS", &mut cfg.http_timeout_secs);
        set(&vars, "TCP_TIMEOUT_SECS", &mut cfg.tcp_timeout_secs);
        set(&vars, "TCP_PORT", &mut cfg.tcp_port);
        cfg.http_timeout_secs = cfg.http_timeout_secs.max(1);
        cfg.tcp_timeout_secs = cfg.tcp_timeout_secs.max(1);

        set(&vars, "HTTP_DEGRADED_MS", &mut cfg.http_thresholds.degraded_ms);
        set(&vars, "HTTP_DOWN_MS", &mut cfg.http_thresholds.down_ms);
        set(&vars, "HTTP_FORBIDDEN_FAST_MS", &mut cfg.http_thresholds.forbidden_fast_ms);
        set(&vars, "TCP_HIGH_MS", &mut cfg.tcp_thresholds.high_ms);
        set(&vars, "TCP_ELEVATED_MS", &mut cfg.tcp_thresholds.elevated_ms);

        set(&vars, "HISTORY_RETENTION_DAYS", &mut cfg.history_retention_days);

        for (key, value) in &vars {
            if let Some(collection) = key.strip_suffix("_INTERVAL_SECS") {
                if let Ok(secs) = value.trim().parse::<u64>() {
                    cfg.collection_entry(collection).interval_secs = Some(secs.max(1));
                }
            } else if let Some(collection) = key.strip_suffix("_WORKERS") {
                if let Ok(workers) = value.trim().parse::<usize>() {
                    cfg.collection_entry(collection).workers = Some(workers.max(1));
                }
            }
        }

        cfg
    }

    fn collection_entry(&mut self, key: &str) -> &mut CollectionOverride {
        self.collections.entry(key.to_lowercase()).or_default()
    }

    /// Probe tunables derived from this configuration.
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            tcp_timeout: Duration::from_secs(self.tcp_timeout_secs),
            tcp_port: self.tcp_port,
            http: self.http_thresholds.clone(),
            tcp: self.tcp_thresholds.clone(),
            ..Default::default()
        }
    }

    /// History retention window, `None` when retention is disabled.
    pub fn history_retention(&self) -> Option<Duration> {
        match self.history_retention_days {
            0 => None,
            days => Some(Duration::from_secs(days * 24 * 60 * 60)),
        }
    }
}

fn set<T: FromStr>(vars: &HashMap<String, String>, key: &str, slot: &mut T) {
    if let Some(value) = vars.get(key) {
        match value.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(variable = %format!("{}{}", PREFIX, key), value = %value, "Ignoring invalid value"),
        }
    }
}
