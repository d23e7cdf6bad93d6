//! Probe result types.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::registry::Target;

/// Health classification of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Operational,
    Degraded,
    Down,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Operational => "operational",
            Health::Degraded => "degraded",
            Health::Down => "down",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operational" => Ok(Health::Operational),
            "degraded" => Ok(Health::Degraded),
            "down" => Ok(Health::Down),
            other => Err(format!("unknown health: {}", other)),
        }
    }
}

/// Raw outcome of an attempt: the HTTP status code, or what went wrong.
///
/// Serialized as a number for status codes and as a label otherwise, so
/// `status_code` reads `200` or `"Timeout"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Status(u16),
    Connected,
    Timeout,
    ConnectionError,
    DnsError,
    Error,
}

impl Outcome {
    /// Parse the stored text form. Unrecognized text maps to `Error`.
    pub fn parse(s: &str) -> Self {
        if let Ok(code) = s.parse::<u16>() {
            return Outcome::Status(code);
        }
        match s {
            "Connected" => Outcome::Connected,
            "Timeout" => Outcome::Timeout,
            "Connection Error" => Outcome::ConnectionError,
            "DNS Error" => Outcome::DnsError,
            _ => Outcome::Error,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Status(code) => write!(f, "{}", code),
            Outcome::Connected => f.write_str("Connected"),
            Outcome::Timeout => f.write_str("Timeout"),
            Outcome::ConnectionError => f.write_str("Connection Error"),
            Outcome::DnsError => f.write_str("DNS Error"),
            Outcome::Error => f.write_str("Error"),
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Status(code) => serializer.serialize_u16(*code),
            other => serializer.collect_str(other),
        }
    }
}

/// The result of one probe execution.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub address: String,
    pub icon: String,
    pub status: Health,
    #[serde(rename = "status_code")]
    pub outcome: Outcome,
    /// Elapsed milliseconds. Absent when no network attempt was made.
    #[serde(rename = "response_time")]
    pub elapsed_ms: Option<u64>,
    pub message: String,
    pub last_checked: DateTime<Utc>,
    pub collection: String,
    pub group: String,
    pub group_name: String,
    /// Number of the cycle that produced this result.
    pub cycle: u64,
}

impl CheckResult {
    pub fn new(
        target: &Target,
        status: Health,
        outcome: Outcome,
        elapsed_ms: Option<u64>,
        message: String,
    ) -> Self {
        Self {
            name: target.name.clone(),
            address: target.address.clone(),
            icon: target.icon.clone(),
            status,
            outcome,
            elapsed_ms,
            message,
            last_checked: Utc::now(),
            collection: target.collection.clone(),
            group: target.group.clone(),
            group_name: target.group_name.clone(),
            cycle: 0,
        }
    }

    /// A `down` result for a check that failed in an unexpected way.
    pub fn unknown_error(target: &Target, detail: &str) -> Self {
        Self::new(
            target,
            Health::Down,
            Outcome::Error,
            None,
            format!("Unknown error: {}", truncate(detail, 50)),
        )
    }

    /// Tag this result with the cycle that produced it.
    pub fn in_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }
}

/// Truncate to at most `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
