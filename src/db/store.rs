//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::classify::NetworkStatus;
use crate::profile::MediaKind;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Timestamps are stored as fixed-width UTC text so lexical order is time order.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    Poisoned,
}

/// Append-only persistence for probe outcomes.
pub trait PingResultStore: Send + Sync {
    /// Append one row and return its id.
    fn insert(&self, result: &PingResult) -> Result<i64, DbError>;

    /// Rows for one entity checked at or after `since`, newest first.
    fn query_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PingResult>, DbError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::init(Connection::open(path)?)
    }

    /// A private in-memory database, gone when the store is dropped.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, DbError> {
        let report = embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::info!("Store: applied migration {}", migration);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Total rows stored for an entity.
    pub fn count_for_entity(&self, entity_type: EntityType, entity_id: i64) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM ping_results WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.as_str(), entity_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl PingResultStore for Store {
    fn insert(&self, result: &PingResult) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ping_results (
                entity_type, entity_id, ip_address, ip_role, network_media, network_vendor,
                status, reachable, packets_sent, packets_received, packet_loss_percent,
                min_rtt_ms, avg_rtt_ms, max_rtt_ms, jitter_ms, error_message, checked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                result.entity_type.as_str(),
                result.entity_id,
                result.ip_address,
                result.ip_role.as_str(),
                result.network_media.as_str(),
                result.network_vendor,
                result.status.as_str(),
                result.reachable,
                result.packets_sent,
                result.packets_received,
                result.packet_loss_percent,
                result.min_rtt_ms,
                result.avg_rtt_ms,
                result.max_rtt_ms,
                result.jitter_ms,
                result.error_message,
                result.checked_at.format(DB_TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<PingResult>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity_type, entity_id, ip_address, ip_role, network_media, network_vendor,
                    status, reachable, packets_sent, packets_received, packet_loss_percent,
                    min_rtt_ms, avg_rtt_ms, max_rtt_ms, jitter_ms, error_message, checked_at
             FROM ping_results
             WHERE entity_type = ?1 AND entity_id = ?2 AND checked_at >= ?3
             ORDER BY checked_at DESC, id DESC",
        )?;

        let results = stmt
            .query_map(
                params![
                    entity_type.as_str(),
                    entity_id,
                    since.format(DB_TIME_FORMAT).to_string(),
                ],
                row_to_ping_result,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }
}

fn row_to_ping_result(row: &Row<'_>) -> SqlResult<PingResult> {
    let checked_at: String = row.get(17)?;
    Ok(PingResult {
        id: row.get(0)?,
        entity_type: parse_column(row, 1)?,
        entity_id: row.get(2)?,
        ip_address: row.get(3)?,
        ip_role: parse_column(row, 4)?,
        network_media: MediaKind::parse_lenient(&row.get::<_, String>(5)?),
        network_vendor: row.get(6)?,
        status: parse_column::<NetworkStatus>(row, 7)?,
        reachable: row.get(8)?,
        packets_sent: row.get(9)?,
        packets_received: row.get(10)?,
        packet_loss_percent: row.get(11)?,
        min_rtt_ms: row.get(12)?,
        avg_rtt_ms: row.get(13)?,
        max_rtt_ms: row.get(14)?,
        jitter_ms: row.get(15)?,
        error_message: row.get(16)?,
        checked_at: parse_db_time(&checked_at).ok_or_else(|| {
            conversion_error(17, format!("invalid timestamp: {}", checked_at))
        })?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> SqlResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| conversion_error(idx, e))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [DB_TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeMeasurement;
    use chrono::{Duration, TimeZone};
    use tempfile::NamedTempFile;

    fn target(entity_id: i64, role: IpRole) -> ProbeTarget<'static> {
        ProbeTarget {
            entity_type: EntityType::Branch,
            entity_id,
            ip_address: match role {
                IpRole::Primary => "10.0.0.1",
                IpRole::Backup => "10.0.1.1",
            },
            ip_role: role,
            network_media: MediaKind::Satellite,
            network_vendor: Some("Hughes"),
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_and_query_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let m = ProbeMeasurement::from_samples(4, &[700.0, 720.5, 690.25]);
        let row = PingResult::measured(
            &target(1, IpRole::Primary),
            &m,
            NetworkStatus::Slow,
            base_time(),
        );
        let id = store.insert(&row).unwrap();
        assert!(id > 0);

        let fetched = store
            .query_by_entity(EntityType::Branch, 1, base_time() - Duration::hours(1))
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0], PingResult { id, ..row });
    }

    #[test]
    fn test_failed_row_keeps_nulls() {
        let store = Store::open_in_memory().unwrap();
        let row = PingResult::failed(
            &target(2, IpRole::Backup),
            "failed to execute ping: not found".to_string(),
            base_time(),
        );
        store.insert(&row).unwrap();

        let fetched = store
            .query_by_entity(EntityType::Branch, 2, base_time())
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].status, NetworkStatus::Error);
        assert!(fetched[0].reachable.is_none());
        assert!(fetched[0].packet_loss_percent.is_none());
        assert_eq!(fetched[0].ip_role, IpRole::Backup);
    }

    #[test]
    fn test_query_is_newest_first_and_bounded() {
        let store = Store::open_in_memory().unwrap();
        for minutes in [0, 30, 90, 10] {
            let row = PingResult::failed(
                &target(3, IpRole::Primary),
                format!("t+{}", minutes),
                base_time() + Duration::minutes(minutes),
            );
            store.insert(&row).unwrap();
        }
        // Another entity must not leak in
        store
            .insert(&PingResult::failed(&target(4, IpRole::Primary), "x".into(), base_time()))
            .unwrap();

        let fetched = store
            .query_by_entity(EntityType::Branch, 3, base_time() + Duration::minutes(10))
            .unwrap();
        let messages: Vec<_> = fetched
            .iter()
            .filter_map(|r| r.error_message.as_deref())
            .collect();
        assert_eq!(messages, vec!["t+90", "t+30", "t+10"]);
        assert_eq!(store.count_for_entity(EntityType::Branch, 3).unwrap(), 4);
        assert_eq!(store.count_for_entity(EntityType::Atm, 3).unwrap(), 0);
    }

    #[test]
    fn test_rows_cannot_be_updated() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .insert(&PingResult::failed(&target(5, IpRole::Primary), "x".into(), base_time()))
            .unwrap();

        let conn = store.conn().unwrap();
        let updated = conn.execute(
            "UPDATE ping_results SET status = 'ONLINE' WHERE id = ?1",
            params![id],
        );
        assert!(updated.is_err());
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = Store::new(tmp.path()).unwrap();
            store
                .insert(&PingResult::failed(&target(6, IpRole::Primary), "x".into(), base_time()))
                .unwrap();
        }
        let store = Store::new(tmp.path()).unwrap();
        assert_eq!(store.count_for_entity(EntityType::Branch, 6).unwrap(), 1);
    }

    #[test]
    fn test_parse_db_time() {
        let t = parse_db_time("2026-03-01 12:00:00.000000000").unwrap();
        assert_eq!(t, base_time());
        assert_eq!(parse_db_time("2026-03-01T12:00:00Z").unwrap(), base_time());
        assert!(parse_db_time("yesterday").is_none());
    }
}
