//! SQLite history store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;
use crate::probe::{Health, Outcome};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    /// Append history rows in one transaction.
    pub fn add_history(&self, records: &[HistoryRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO history (collection, name, address, status, status_code, response_time, message, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for r in records {
                stmt.execute(params![
                    r.collection,
                    r.name,
                    r.address,
                    r.status.as_str(),
                    r.status_code.to_string(),
                    r.response_time.map(|ms| ms as i64),
                    r.message,
                    r.checked_at.format(TIME_FORMAT).to_string(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// History of one target, most recent first. Names match case-insensitively.
    pub fn get_history(
        &self,
        name: &str,
        collection: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT collection, name, address, status, status_code, response_time, message, checked_at
             FROM history
             WHERE name = ?1 COLLATE NOCASE AND (?2 IS NULL OR collection = ?2)
             ORDER BY id DESC LIMIT ?3 OFFSET ?4",
        )?;

        let records = stmt
            .query_map(params![name, collection, limit, offset], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    /// Most recent history rows across all targets.
    pub fn get_recent_history(&self, limit: u32, offset: u32) -> Result<Vec<HistoryRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT collection, name, address, status, status_code, response_time, message, checked_at
             FROM history ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let records = stmt
            .query_map(params![limit, offset], history_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    /// Uptime of one target over all recorded history.
    pub fn get_uptime(&self, name: &str, collection: Option<&str>) -> Result<UptimeStats, DbError> {
        let conn = self.conn.lock().unwrap();
        let (total, operational): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'operational' THEN 1 ELSE 0 END), 0)
             FROM history
             WHERE name = ?1 COLLATE NOCASE AND (?2 IS NULL OR collection = ?2)",
            params![name, collection],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(UptimeStats::new(name, total, operational))
    }

    /// Delete history rows checked before a cutoff. Returns the number removed.
    pub fn delete_history_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM history WHERE checked_at < ?1",
            params![cutoff.format(TIME_FORMAT).to_string()],
        )?;
        Ok(removed)
    }

    /// Total number of history rows.
    pub fn history_count(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM history", [], |r| r.get(0))?)
    }
}

fn history_from_row(row: &Row<'_>) -> SqlResult<HistoryRecord> {
    let status: String = row.get(3)?;
    let status = status
        .parse::<Health>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
    let status_code: String = row.get(4)?;
    let response_time: Option<i64> = row.get(5)?;
    let time_str: String = row.get(7)?;

    Ok(HistoryRecord {
        collection: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        status,
        status_code: Outcome::parse(&status_code),
        response_time: response_time.map(|ms| ms.max(0) as u64),
        message: row.get(6)?,
        checked_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn record(collection: &str, name: &str, status: Health, at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            collection: collection.to_string(),
            name: name.to_string(),
            address: format!("https://{}.test", name.to_lowercase()),
            status,
            status_code: Outcome::Status(200),
            response_time: Some(42),
            message: "OK - 42 ms".to_string(),
            checked_at: at,
        }
    }

    #[test]
    fn test_history_most_recent_first() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        let records: Vec<_> = (0..5)
            .map(|i| {
                let status = if i == 4 { Health::Down } else { Health::Operational };
                record("websites", "Google", status, now + ChronoDuration::seconds(i))
            })
            .collect();
        store.add_history(&records).unwrap();
        store
            .add_history(&[record("websites", "GitHub", Health::Operational, now)])
            .unwrap();

        let history = store.get_history("google", None, 3, 0).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].status, Health::Down);
        assert!(history[0].checked_at > history[1].checked_at);
        assert_eq!(history[0].status_code, Outcome::Status(200));
        assert_eq!(history[0].response_time, Some(42));

        let page2 = store.get_history("Google", None, 3, 3).unwrap();
        assert_eq!(page2.len(), 2);

        assert_eq!(store.get_recent_history(10, 0).unwrap()[0].name, "GitHub");
    }

    #[test]
    fn test_history_collection_filter() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        store
            .add_history(&[
                record("ec2", "Shared", Health::Down, now),
                record("azure", "Shared", Health::Operational, now),
            ])
            .unwrap();

        assert_eq!(store.get_history("Shared", None, 10, 0).unwrap().len(), 2);
        let ec2 = store.get_history("Shared", Some("ec2"), 10, 0).unwrap();
        assert_eq!(ec2.len(), 1);
        assert_eq!(ec2[0].status, Health::Down);
    }

    #[test]
    fn test_uptime() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        assert_eq!(store.get_uptime("Google", None).unwrap().uptime_percentage, None);

        store
            .add_history(&[
                record("websites", "Google", Health::Operational, now),
                record("websites", "Google", Health::Operational, now),
                record("websites", "Google", Health::Degraded, now),
            ])
            .unwrap();

        let stats = store.get_uptime("Google", None).unwrap();
        assert_eq!(stats.total_checks, 3);
        assert_eq!(stats.operational_checks, 2);
        assert_eq!(stats.uptime_percentage, Some(66.67));
    }

    #[test]
    fn test_failed_checks_round_trip_outcome() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut r = record("ec2", "Tokyo", Health::Down, Utc::now());
        r.status_code = Outcome::DnsError;
        r.response_time = None;
        store.add_history(&[r]).unwrap();

        let history = store.get_history("Tokyo", Some("ec2"), 1, 0).unwrap();
        assert_eq!(history[0].status_code, Outcome::DnsError);
        assert_eq!(history[0].response_time, None);
    }

    #[test]
    fn test_delete_history_before() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc::now();

        store
            .add_history(&[
                record("websites", "Old", Health::Operational, now - ChronoDuration::days(40)),
                record("websites", "New", Health::Operational, now),
            ])
            .unwrap();

        let removed = store.delete_history_before(now - ChronoDuration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.history_count().unwrap(), 1);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let tmp = NamedTempFile::new().unwrap();
        Store::new(tmp.path()).unwrap();
        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.history_count().unwrap(), 0);
    }
}
