//! SQLite-backed local persistence
//!
//! One connection serves three small tables:
//! - `entries`: the author's metric entries
//! - `watermarks`: per-author import cursors
//! - `export_outbox`: entries waiting to be exported to the health source
//!
//! The connection sits behind a `std::sync::Mutex` (SQLite connections are
//! not Sync) and all operations are synchronous, matching the engine's
//! treatment of local persistence as fast.

use crate::store::error::{StoreError, StoreResult};
use crate::store::types::{EntrySource, MetricEntry};
use crate::store::{LocalStore, OutboxItem, OutboxStore, Watermark, WatermarkStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id TEXT PRIMARY KEY,
    author_id TEXT NOT NULL,
    value REAL NOT NULL,
    date TEXT NOT NULL,
    source TEXT NOT NULL,
    external_sample_id TEXT,
    date_created TEXT NOT NULL,
    date_modified TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_entries_author ON entries(author_id);

CREATE TABLE IF NOT EXISTS watermarks (
    author_id TEXT PRIMARY KEY,
    last_sample_date TEXT,
    earliest_date TEXT
);

CREATE TABLE IF NOT EXISTS export_outbox (
    entry_id TEXT PRIMARY KEY,
    author_id TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outbox_author ON export_outbox(author_id);
"#;

/// Single-device store for entries, watermarks, and the export outbox
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests, throwaway environments)
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock poisoned: {}", e)))
    }
}

fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<MetricEntry> {
    let id: String = row.get(0)?;
    let date: String = row.get(3)?;
    let source: String = row.get(4)?;
    let date_created: String = row.get(6)?;
    let date_modified: String = row.get(7)?;
    let deleted_at: Option<String> = row.get(8)?;

    Ok(MetricEntry {
        id: parse_uuid(&id)?,
        author_id: row.get(1)?,
        value: row.get(2)?,
        date: parse_datetime(&date)?,
        source: EntrySource::parse(&source).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unknown entry source: {}", source),
                )),
            )
        })?,
        external_sample_id: row.get(5)?,
        date_created: parse_datetime(&date_created)?,
        date_modified: parse_datetime(&date_modified)?,
        deleted_at: deleted_at.as_deref().map(parse_datetime).transpose()?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, author_id, value, date, source, external_sample_id, date_created, date_modified, deleted_at";

impl LocalStore for SqliteStore {
    fn create(&self, entry: &MetricEntry) -> StoreResult<()> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO entries (id, author_id, value, date, source, external_sample_id, \
             date_created, date_modified, deleted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id.to_string(),
                entry.author_id,
                entry.value,
                entry.date.to_rfc3339(),
                entry.source.as_str(),
                entry.external_sample_id,
                entry.date_created.to_rfc3339(),
                entry.date_modified.to_rfc3339(),
                entry.deleted_at.map(|d| d.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateId(entry.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, id: Uuid) -> StoreResult<MetricEntry> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
                params![id.to_string()],
                row_to_entry,
            )
            .optional()?;

        entry.ok_or(StoreError::NotFound(id))
    }

    fn read_all(&self, author_id: &str) -> StoreResult<Vec<MetricEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM entries WHERE author_id = ?1 ORDER BY date ASC",
            ENTRY_COLUMNS
        ))?;

        let entries = stmt
            .query_map(params![author_id], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn update(&self, entry: &MetricEntry) -> StoreResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE entries SET author_id = ?2, value = ?3, date = ?4, source = ?5, \
             external_sample_id = ?6, date_created = ?7, date_modified = ?8, deleted_at = ?9 \
             WHERE id = ?1",
            params![
                entry.id.to_string(),
                entry.author_id,
                entry.value,
                entry.date.to_rfc3339(),
                entry.source.as_str(),
                entry.external_sample_id,
                entry.date_created.to_rfc3339(),
                entry.date_modified.to_rfc3339(),
                entry.deleted_at.map(|d| d.to_rfc3339()),
            ],
        )?;

        if affected == 0 {
            return Err(StoreError::NotFound(entry.id));
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> StoreResult<()> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM entries WHERE id = ?1", params![id.to_string()])?;

        if affected == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn delete_all(&self, author_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM entries WHERE author_id = ?1", params![author_id])?;
        Ok(())
    }

    fn authors(&self) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT author_id FROM entries ORDER BY author_id")?;

        let authors = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(authors)
    }
}

impl WatermarkStore for SqliteStore {
    fn watermark(&self, author_id: &str) -> StoreResult<Watermark> {
        let conn = self.lock()?;
        let mark = conn
            .query_row(
                "SELECT last_sample_date, earliest_date FROM watermarks WHERE author_id = ?1",
                params![author_id],
                |row| {
                    let last: Option<String> = row.get(0)?;
                    let earliest: Option<String> = row.get(1)?;
                    Ok(Watermark {
                        last_sample_date: last.as_deref().map(parse_datetime).transpose()?,
                        earliest_date: earliest.as_deref().map(parse_datetime).transpose()?,
                    })
                },
            )
            .optional()?;

        Ok(mark.unwrap_or_default())
    }

    fn set_watermark(&self, author_id: &str, mark: &Watermark) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO watermarks (author_id, last_sample_date, earliest_date) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(author_id) DO UPDATE SET \
             last_sample_date = excluded.last_sample_date, \
             earliest_date = excluded.earliest_date",
            params![
                author_id,
                mark.last_sample_date.map(|d| d.to_rfc3339()),
                mark.earliest_date.map(|d| d.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn clear_watermark(&self, author_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM watermarks WHERE author_id = ?1", params![author_id])?;
        Ok(())
    }
}

impl OutboxStore for SqliteStore {
    fn enqueue(&self, author_id: &str, entry_id: Uuid) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO export_outbox (entry_id, author_id, attempts, next_attempt_at) \
             VALUES (?1, ?2, 0, ?3)",
            params![entry_id.to_string(), author_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn due(&self, author_id: &str, now: DateTime<Utc>) -> StoreResult<Vec<OutboxItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, author_id, attempts, next_attempt_at FROM export_outbox \
             WHERE author_id = ?1 AND next_attempt_at <= ?2 ORDER BY next_attempt_at ASC",
        )?;

        let items = stmt
            .query_map(params![author_id, now.to_rfc3339()], |row| {
                let entry_id: String = row.get(0)?;
                let next_attempt_at: String = row.get(3)?;
                Ok(OutboxItem {
                    entry_id: parse_uuid(&entry_id)?,
                    author_id: row.get(1)?,
                    attempts: row.get(2)?,
                    next_attempt_at: parse_datetime(&next_attempt_at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn mark_attempt(&self, entry_id: Uuid, next_attempt_at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE export_outbox SET attempts = attempts + 1, next_attempt_at = ?2 \
             WHERE entry_id = ?1",
            params![entry_id.to_string(), next_attempt_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, entry_id: Uuid) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM export_outbox WHERE entry_id = ?1",
            params![entry_id.to_string()],
        )?;
        Ok(())
    }

    fn clear(&self, author_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM export_outbox WHERE author_id = ?1",
            params![author_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn entry(author: &str, day: u32, value: f64) -> MetricEntry {
        MetricEntry::new(
            author,
            value,
            Utc.with_ymd_and_hms(2025, 6, day, 10, 0, 0).unwrap(),
            EntrySource::Manual,
        )
    }

    #[test]
    fn test_create_and_read() {
        let store = store();
        let e = entry("alice", 1, 5000.0);

        store.create(&e).unwrap();
        let read = store.read(e.id).unwrap();

        assert_eq!(read, e);
    }

    #[test]
    fn test_create_duplicate_id() {
        let store = store();
        let e = entry("alice", 1, 5000.0);

        store.create(&e).unwrap();
        let err = store.create(&e).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateId(id) if id == e.id));
    }

    #[test]
    fn test_upsert_falls_back_to_update() {
        let store = store();
        let mut e = entry("alice", 1, 5000.0);

        store.create(&e).unwrap();
        e.value = 6000.0;
        store.upsert(&e).unwrap();

        assert_eq!(store.read(e.id).unwrap().value, 6000.0);
    }

    #[test]
    fn test_read_all_scoped_by_author() {
        let store = store();
        store.create(&entry("alice", 1, 100.0)).unwrap();
        store.create(&entry("alice", 2, 200.0)).unwrap();
        store.create(&entry("bob", 1, 300.0)).unwrap();

        let alice = store.read_all("alice").unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|e| e.author_id == "alice"));

        assert_eq!(store.authors().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_update_unknown_id() {
        let store = store();
        let e = entry("alice", 1, 100.0);

        let err = store.update(&e).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_all_for_author() {
        let store = store();
        store.create(&entry("alice", 1, 100.0)).unwrap();
        let bob = entry("bob", 1, 300.0);
        store.create(&bob).unwrap();

        store.delete_all("alice").unwrap();

        assert!(store.read_all("alice").unwrap().is_empty());
        assert_eq!(store.read_all("bob").unwrap(), vec![bob]);
    }

    #[test]
    fn test_soft_delete_round_trip() {
        let store = store();
        let mut e = entry("alice", 1, 100.0);
        e.deleted_at = Some(Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());

        store.create(&e).unwrap();
        let read = store.read(e.id).unwrap();

        assert_eq!(read.deleted_at, e.deleted_at);
        assert!(!read.is_live());
    }

    #[test]
    fn test_watermark_round_trip() {
        let store = store();

        assert_eq!(store.watermark("alice").unwrap(), Watermark::default());

        let mark = Watermark {
            last_sample_date: Some(Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap()),
            earliest_date: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
        };
        store.set_watermark("alice", &mark).unwrap();
        assert_eq!(store.watermark("alice").unwrap(), mark);

        // Per-author keying
        assert_eq!(store.watermark("bob").unwrap(), Watermark::default());

        store.clear_watermark("alice").unwrap();
        assert_eq!(store.watermark("alice").unwrap(), Watermark::default());
    }

    #[test]
    fn test_outbox_enqueue_is_idempotent() {
        let store = store();
        let id = Uuid::new_v4();

        store.enqueue("alice", id).unwrap();
        store.enqueue("alice", id).unwrap();

        let due = store.due("alice", Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entry_id, id);
        assert_eq!(due[0].attempts, 0);
    }

    #[test]
    fn test_outbox_backoff_scheduling() {
        let store = store();
        let id = Uuid::new_v4();
        store.enqueue("alice", id).unwrap();

        let later = Utc::now() + Duration::minutes(5);
        store.mark_attempt(id, later).unwrap();

        // Not due now, due after the scheduled time
        assert!(store.due("alice", Utc::now()).unwrap().is_empty());
        let due = store.due("alice", later + Duration::seconds(1)).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 1);
    }

    #[test]
    fn test_outbox_remove_and_clear() {
        let store = store();
        let id = Uuid::new_v4();
        store.enqueue("alice", id).unwrap();
        store.enqueue("alice", Uuid::new_v4()).unwrap();

        store.remove(id).unwrap();
        let now = Utc::now() + Duration::seconds(1);
        assert_eq!(store.due("alice", now).unwrap().len(), 1);

        store.clear("alice").unwrap();
        assert!(store.due("alice", now).unwrap().is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stride.db");
        let e = entry("alice", 1, 100.0);

        {
            let store = SqliteStore::open(&path).unwrap();
            store.create(&e).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.read(e.id).unwrap(), e);
    }
}
