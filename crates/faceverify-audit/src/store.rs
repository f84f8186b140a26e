//! SQLite-backed audit log of verification attempts.

use crate::record::{AttemptStatus, VerificationRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use faceverify_core::Decision;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit store lock poisoned")]
    LockPoisoned,
}

/// Result of recording an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    /// An attempt with the same ID already exists; nothing was written.
    AlreadyPresent,
}

/// Receives verification outcomes and owns their durable lifecycle.
pub trait AuditRecorder: Send + Sync {
    /// Persist a record. Recording the same `attempt_id` twice is a no-op.
    fn record(&self, record: &VerificationRecord) -> Result<Recorded, AuditError>;
}

/// Attempt counts per status bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub error_attempts: u64,
    pub no_face_attempts: u64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS verification_attempts (
    attempt_id       TEXT PRIMARY KEY,
    staff_id         TEXT NOT NULL,
    decision         TEXT NOT NULL,
    status           TEXT NOT NULL,
    confidence       REAL,
    diagnostic       TEXT NOT NULL,
    threshold        REAL NOT NULL,
    reference_sha256 TEXT,
    probe_sha256     TEXT,
    captured_photo   TEXT,
    reference_photo  TEXT,
    client           TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attempts_staff ON verification_attempts (staff_id, created_at);
CREATE INDEX IF NOT EXISTS idx_attempts_created ON verification_attempts (created_at);
";

const COLUMNS: &str = "attempt_id, staff_id, decision, status, confidence, diagnostic, threshold, \
     reference_sha256, probe_sha256, captured_photo, reference_photo, client, created_at";

/// Audit store in a single SQLite database file.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "audit store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AuditError> {
        self.conn.lock().map_err(|_| AuditError::LockPoisoned)
    }

    pub fn get(&self, attempt_id: Uuid) -> Result<Option<VerificationRecord>, AuditError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM verification_attempts WHERE attempt_id = ?1");
        Ok(conn
            .query_row(&sql, params![attempt_id.to_string()], record_from_row)
            .optional()?)
    }

    /// Most recent attempts first, optionally for one staff member.
    pub fn recent(&self, staff_id: Option<&str>, limit: usize) -> Result<Vec<VerificationRecord>, AuditError> {
        let conn = self.conn()?;
        let limit = limit as i64;
        let rows = match staff_id {
            Some(staff) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM verification_attempts WHERE staff_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![staff, limit], record_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM verification_attempts ORDER BY created_at DESC LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![limit], record_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Counts per status bucket for attempts at or after `since`.
    pub fn stats(&self, since: DateTime<Utc>) -> Result<AttemptStats, AuditError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM verification_attempts WHERE created_at >= ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![timestamp(&since)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = AttemptStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as u64;
            stats.total_attempts += count;
            match status.as_str() {
                "success" => stats.successful_attempts += count,
                "failed" => stats.failed_attempts += count,
                "error" => stats.error_attempts += count,
                "no_face" => stats.no_face_attempts += count,
                other => tracing::warn!(status = other, "unknown attempt status in audit store"),
            }
        }
        Ok(stats)
    }
}

impl AuditRecorder for SqliteAuditStore {
    fn record(&self, record: &VerificationRecord) -> Result<Recorded, AuditError> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT OR IGNORE INTO verification_attempts ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        );
        let changed = conn.execute(
            &sql,
            params![
                record.attempt_id.to_string(),
                record.staff_id,
                record.decision.as_str(),
                record.status.as_str(),
                record.confidence.map(f64::from),
                record.diagnostic,
                f64::from(record.threshold),
                record.reference_sha256,
                record.probe_sha256,
                record.captured_photo.as_ref().map(|p| p.to_string_lossy().into_owned()),
                record.reference_photo.as_ref().map(|p| p.to_string_lossy().into_owned()),
                record.client,
                timestamp(&record.created_at),
            ],
        )?;

        if changed == 0 {
            tracing::debug!(attempt_id = %record.attempt_id, "attempt already recorded");
            Ok(Recorded::AlreadyPresent)
        } else {
            tracing::info!(
                attempt_id = %record.attempt_id,
                staff_id = %record.staff_id,
                decision = %record.decision,
                "attempt recorded"
            );
            Ok(Recorded::Inserted)
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Error, Debug)]
#[error("unknown value {0:?}")]
struct UnknownValue(String);

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationRecord> {
    let attempt_id: String = row.get(0)?;
    let decision: String = row.get(2)?;
    let created_at: String = row.get(12)?;

    let decision = Decision::parse(&decision).ok_or_else(|| conversion_error(2, UnknownValue(decision.clone())))?;

    Ok(VerificationRecord {
        attempt_id: Uuid::parse_str(&attempt_id).map_err(|e| conversion_error(0, e))?,
        staff_id: row.get(1)?,
        decision,
        status: AttemptStatus::from(decision),
        confidence: row.get::<_, Option<f64>>(4)?.map(|c| c as f32),
        diagnostic: row.get(5)?,
        threshold: row.get::<_, f64>(6)? as f32,
        reference_sha256: row.get(7)?,
        probe_sha256: row.get(8)?,
        captured_photo: row.get::<_, Option<String>>(9)?.map(PathBuf::from),
        reference_photo: row.get::<_, Option<String>>(10)?.map(PathBuf::from),
        client: row.get(11)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion_error(12, e))?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use faceverify_core::VerificationOutcome;

    fn record_for(staff: &str, outcome: VerificationOutcome) -> VerificationRecord {
        VerificationRecord::new(Uuid::new_v4(), staff, &outcome, 0.6, Some(&b"ref"[..]), Some(&b"probe"[..]))
    }

    #[test]
    fn test_record_and_get_roundtrip() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let record = record_for("EMP001", VerificationOutcome::matched(0.91, String::new()))
            .with_client(Some("127.0.0.1 curl/8.0".into()))
            .with_evidence(Some(PathBuf::from("/evidence/a.jpg")), None);

        assert_eq!(store.record(&record).unwrap(), Recorded::Inserted);

        let loaded = store.get(record.attempt_id).unwrap().unwrap();
        assert_eq!(loaded.staff_id, "EMP001");
        assert_eq!(loaded.decision, Decision::Matched);
        assert_eq!(loaded.status, AttemptStatus::Success);
        assert!((loaded.confidence.unwrap() - 0.91).abs() < 1e-6);
        assert_eq!(loaded.client.as_deref(), Some("127.0.0.1 curl/8.0"));
        assert_eq!(loaded.captured_photo, Some(PathBuf::from("/evidence/a.jpg")));
        assert_eq!(loaded.reference_photo, None);
        assert_eq!(loaded.probe_sha256, record.probe_sha256);
        assert_eq!(loaded.created_at, record.created_at);
    }

    #[test]
    fn test_record_is_idempotent() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let record = record_for("EMP001", VerificationOutcome::not_matched(0.2, String::new()));

        assert_eq!(store.record(&record).unwrap(), Recorded::Inserted);
        assert_eq!(store.record(&record).unwrap(), Recorded::AlreadyPresent);
        assert_eq!(store.recent(None, 50).unwrap().len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_recent_newest_first_and_filtered() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let base = Utc::now().trunc_subsecs(6);
        for (i, staff) in ["EMP001", "EMP002", "EMP001", "EMP001"].iter().enumerate() {
            let mut record = record_for(staff, VerificationOutcome::matched(0.9, String::new()));
            record.created_at = base + Duration::seconds(i as i64);
            store.record(&record).unwrap();
        }

        let all = store.recent(None, 50).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let mine = store.recent(Some("EMP001"), 2).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.staff_id == "EMP001"));
        assert_eq!(mine[0].created_at, base + Duration::seconds(3));
    }

    #[test]
    fn test_stats_counts_buckets_since() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let outcomes = [
            VerificationOutcome::matched(0.9, String::new()),
            VerificationOutcome::matched(0.8, String::new()),
            VerificationOutcome::not_matched(0.1, String::new()),
            VerificationOutcome::no_face(Decision::NoFaceProbe, "probe image: no face detected"),
            VerificationOutcome::no_face(Decision::NoFaceReference, "reference image: no face detected"),
            VerificationOutcome::processing_error("probe image: decode error"),
        ];
        for outcome in outcomes {
            store.record(&record_for("EMP001", outcome)).unwrap();
        }
        let mut old = record_for("EMP001", VerificationOutcome::matched(0.9, String::new()));
        old.created_at = Utc::now() - Duration::days(60);
        store.record(&old).unwrap();

        let stats = store.stats(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(
            stats,
            AttemptStats {
                total_attempts: 6,
                successful_attempts: 2,
                failed_attempts: 1,
                error_attempts: 1,
                no_face_attempts: 2,
            }
        );
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/audit/attempts.db");
        let store = SqliteAuditStore::open(&path).unwrap();
        store
            .record(&record_for("EMP009", VerificationOutcome::processing_error("timeout")))
            .unwrap();
        assert!(path.exists());

        drop(store);
        let reopened = SqliteAuditStore::open(&path).unwrap();
        assert_eq!(reopened.recent(Some("EMP009"), 10).unwrap().len(), 1);
    }
}
