//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::probe::{CheckResult, Health, Outcome};

/// One stored check result.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub collection: String,
    pub name: String,
    pub address: String,
    pub status: Health,
    pub status_code: Outcome,
    /// Milliseconds, if the attempt was made
    pub response_time: Option<u64>,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

impl From<&CheckResult> for HistoryRecord {
    fn from(r: &CheckResult) -> Self {
        Self {
            collection: r.collection.clone(),
            name: r.name.clone(),
            address: r.address.clone(),
            status: r.status,
            status_code: r.outcome,
            response_time: r.elapsed_ms,
            message: r.message.clone(),
            checked_at: r.last_checked,
        }
    }
}

/// Uptime over all recorded history of a target.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UptimeStats {
    pub name: String,
    pub total_checks: i64,
    pub operational_checks: i64,
    /// Percentage rounded to two decimals; `None` without history.
    pub uptime_percentage: Option<f64>,
}

impl UptimeStats {
    pub fn new(name: &str, total_checks: i64, operational_checks: i64) -> Self {
        let uptime_percentage = if total_checks > 0 {
            let pct = operational_checks as f64 / total_checks as f64 * 100.0;
            Some((pct * 100.0).round() / 100.0)
        } else {
            None
        };

        Self {
            name: name.to_string(),
            total_checks,
            operational_checks,
            uptime_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_undefined_without_history() {
        let stats = UptimeStats::new("Google", 0, 0);
        assert_eq!(stats.uptime_percentage, None);
    }

    #[test]
    fn test_uptime_rounds_to_two_decimals() {
        assert_eq!(UptimeStats::new("a", 3, 2).uptime_percentage, Some(66.67));
        assert_eq!(UptimeStats::new("a", 4, 4).uptime_percentage, Some(100.0));
        assert_eq!(UptimeStats::new("a", 7, 0).uptime_percentage, Some(0.0));
    }
}
