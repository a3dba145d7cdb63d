//! SQLite backend for the event store.
//!
//! One database file per namespace. The file holds a single `events` table
//! keyed by `INTEGER PRIMARY KEY AUTOINCREMENT`, which gives the two ordering
//! guarantees the emitter relies on: ids strictly increase and ids are never
//! reused, even after the rows holding them are deleted.
//!
//! All access goes through one connection behind a mutex, so enqueues and
//! removals are serialized against each other and against selections. The
//! running byte total is only changed while that mutex is held.

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;
use crate::store::{encode_payload, EventStore, StoreLimits};
use crate::types::{EmitterEvent, StoreId, StoredEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Current schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Ids per `DELETE ... IN (...)` statement.
const DELETE_CHUNK: usize = 500;

const META_NAMESPACE_KEY: &str = "namespace";

/// SQLite-backed [`EventStore`].
pub struct SqliteEventStore {
    namespace: String,
    path: Option<PathBuf>,
    limits: StoreLimits,
    conn: Mutex<Connection>,
    /// Sum of `byte_size` over all rows, seeded on open.
    total_bytes: AtomicU64,
}

impl SqliteEventStore {
    /// Opens (or creates) the store file for `namespace` at `path`.
    ///
    /// Fails with `InvalidNamespace` if the file was created for a different
    /// namespace, and with `Corrupt` if the file is not a readable database.
    pub fn open(
        path: impl AsRef<Path>,
        namespace: &str,
        limits: StoreLimits,
    ) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(open_error)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(open_error)?;

        let store = Self::from_connection(conn, namespace, Some(path.to_path_buf()), limits)?;
        info!(namespace = %namespace, path = %path.display(), "Opened event store");
        Ok(store)
    }

    /// Creates a store backed by an in-memory SQLite database.
    ///
    /// Same SQL as the file-backed store, nothing survives a drop.
    pub fn in_memory(namespace: &str, limits: StoreLimits) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, namespace, None, limits)
    }

    /// Reads the namespace recorded in an existing store file without
    /// running migrations.
    pub fn read_namespace(path: impl AsRef<Path>) -> StoreResult<Option<String>> {
        let conn = Connection::open(path.as_ref()).map_err(open_error)?;
        let has_meta: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
                [],
                |row| row.get(0),
            )
            .map_err(open_error)?;
        if !has_meta {
            return Ok(None);
        }
        conn.query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![META_NAMESPACE_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(open_error)
    }

    fn from_connection(
        conn: Connection,
        namespace: &str,
        path: Option<PathBuf>,
        limits: StoreLimits,
    ) -> StoreResult<Self> {
        run_migrations(&conn).map_err(open_error)?;
        claim_namespace(&conn, namespace)?;
        let total = total_size(&conn).map_err(open_error)?;

        Ok(Self {
            namespace: namespace.to_string(),
            path,
            limits,
            conn: Mutex::new(conn),
            total_bytes: AtomicU64::new(total),
        })
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Reads one stored event including its insertion timestamp.
    pub fn get(&self, id: StoreId) -> StoreResult<Option<StoredEvent>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, payload, inserted_at FROM events WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(read_error)?;

        match row {
            Some((id, json, inserted_at)) => Ok(Some(StoredEvent {
                store_id: StoreId(id),
                payload: decode_payload(id, &json)?,
                inserted_at: DateTime::<Utc>::from_timestamp_millis(inserted_at)
                    .unwrap_or_default(),
            })),
            None => Ok(None),
        }
    }
}

impl EventStore for SqliteEventStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn enqueue(&self, payload: &Payload) -> StoreResult<StoreId> {
        let json = encode_payload(payload)?;
        let size = json.len() as u64;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_error)?;

        if let Some(limit) = self.limits.max_total_bytes {
            let current = self.total_bytes.load(Ordering::SeqCst);
            if current + size > limit {
                warn!(
                    namespace = %self.namespace,
                    current,
                    incoming = size,
                    limit,
                    "Event store full, rejecting event"
                );
                return Err(StoreError::Overflow {
                    current,
                    incoming: size,
                    limit,
                });
            }
        }

        tx.execute(
            "INSERT INTO events (payload, byte_size, inserted_at) VALUES (?1, ?2, ?3)",
            params![json, size as i64, Utc::now().timestamp_millis()],
        )
        .map_err(write_error)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(write_error)?;
        self.total_bytes.fetch_add(size, Ordering::SeqCst);

        debug!(namespace = %self.namespace, store_id = id, bytes = size, "Enqueued event");
        Ok(StoreId(id))
    }

    fn remove(&self, id: StoreId) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let freed: Option<i64> = conn
            .query_row(
                "DELETE FROM events WHERE id = ?1 RETURNING byte_size",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(write_error)?;
        match freed {
            Some(size) => {
                self.total_bytes.fetch_sub(size as u64, Ordering::SeqCst);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_many(&self, ids: &[StoreId]) -> StoreResult<bool> {
        let unique: BTreeSet<i64> = ids.iter().map(|id| id.0).collect();
        if unique.is_empty() {
            return Ok(true);
        }
        let unique: Vec<i64> = unique.into_iter().collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_error)?;
        let mut affected = 0usize;
        let mut freed: u64 = 0;
        for chunk in unique.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql =
                format!("DELETE FROM events WHERE id IN ({placeholders}) RETURNING byte_size");
            let mut stmt = tx.prepare(&sql).map_err(write_error)?;
            let mut rows = stmt
                .query(params_from_iter(chunk.iter()))
                .map_err(write_error)?;
            while let Some(row) = rows.next().map_err(write_error)? {
                freed += row.get::<_, i64>(0).map_err(write_error)? as u64;
                affected += 1;
            }
        }
        tx.commit().map_err(write_error)?;
        self.total_bytes.fetch_sub(freed, Ordering::SeqCst);

        debug!(
            namespace = %self.namespace,
            requested = unique.len(),
            removed = affected,
            "Removed events"
        );
        Ok(affected == unique.len())
    }

    fn remove_all(&self) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let affected = conn
            .execute("DELETE FROM events", [])
            .map_err(write_error)?;
        self.total_bytes.store(0, Ordering::SeqCst);
        info!(namespace = %self.namespace, removed = affected, "Removed all events");
        Ok(affected > 0)
    }

    fn count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(read_error)?;
        Ok(count as usize)
    }

    fn select_by_count(&self, limit: usize) -> StoreResult<Vec<EmitterEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id, payload, byte_size FROM events ORDER BY id LIMIT ?1")
            .map_err(read_error)?;
        let mut rows = stmt.query(params![limit]).map_err(read_error)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(read_error)? {
            events.push(emitter_event(row)?);
        }
        Ok(events)
    }

    fn select_by_size(&self, byte_limit: u64) -> StoreResult<Vec<EmitterEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id, payload, byte_size FROM events ORDER BY id")
            .map_err(read_error)?;
        let mut rows = stmt.query([]).map_err(read_error)?;

        let mut events = Vec::new();
        let mut total: u64 = 0;
        while let Some(row) = rows.next().map_err(read_error)? {
            let size = row.get::<_, i64>(2).map_err(read_error)? as u64;
            if !events.is_empty() && total + size > byte_limit {
                break;
            }
            total += size;
            events.push(emitter_event(row)?);
            if total > byte_limit {
                // Oversized head, emitted alone.
                break;
            }
        }
        Ok(events)
    }

    fn total_size(&self) -> StoreResult<u64> {
        Ok(self.total_bytes.load(Ordering::SeqCst))
    }

    fn last_inserted_id(&self) -> StoreResult<Option<StoreId>> {
        let conn = self.conn.lock();
        let seq: Option<i64> = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'events'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(read_error)?;
        Ok(seq.filter(|s| *s > 0).map(StoreId))
    }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                inserted_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(version = SCHEMA_VERSION, "Event store schema created");
    } else if version > SCHEMA_VERSION {
        warn!(
            found = version,
            supported = SCHEMA_VERSION,
            "Event store written by a newer schema version"
        );
    }

    Ok(())
}

fn claim_namespace(conn: &Connection, namespace: &str) -> StoreResult<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![META_NAMESPACE_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(open_error)?;

    match existing {
        Some(ns) if ns == namespace => Ok(()),
        Some(ns) => Err(StoreError::InvalidNamespace(format!(
            "store belongs to namespace {ns:?}, not {namespace:?}"
        ))),
        None => {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                params![META_NAMESPACE_KEY, namespace],
            )
            .map_err(write_error)?;
            Ok(())
        }
    }
}

fn total_size(conn: &Connection) -> rusqlite::Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(byte_size), 0) FROM events",
        [],
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

fn emitter_event(row: &Row<'_>) -> StoreResult<EmitterEvent> {
    let id: i64 = row.get(0).map_err(read_error)?;
    let json: String = row.get(1).map_err(read_error)?;
    let size: i64 = row.get(2).map_err(read_error)?;
    Ok(EmitterEvent {
        store_id: StoreId(id),
        payload: decode_payload(id, &json)?,
        byte_size: size as u64,
    })
}

fn decode_payload(id: i64, json: &str) -> StoreResult<Payload> {
    Payload::from_json(json)
        .map_err(|e| StoreError::Corrupt(format!("event {id} has an unreadable payload: {e}")))
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
    )
}

fn write_error(err: rusqlite::Error) -> StoreError {
    if is_corruption(&err) {
        StoreError::Corrupt(err.to_string())
    } else {
        StoreError::Write(err.to_string())
    }
}

fn read_error(err: rusqlite::Error) -> StoreError {
    if is_corruption(&err) {
        StoreError::Corrupt(err.to_string())
    } else {
        StoreError::Read(err.to_string())
    }
}

fn open_error(err: rusqlite::Error) -> StoreError {
    if is_corruption(&err) {
        StoreError::Corrupt(err.to_string())
    } else {
        StoreError::Sqlite(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(n: i64) -> Payload {
        Payload::builder().string("e", "pv").integer("n", n).build()
    }

    #[test]
    fn schema_version_is_recorded() {
        let store = SqliteEventStore::in_memory("ns", StoreLimits::unbounded()).unwrap();
        let conn = store.conn.lock();
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn get_returns_insertion_timestamp() {
        let before = Utc::now().timestamp_millis();
        let store = SqliteEventStore::in_memory("ns", StoreLimits::unbounded()).unwrap();
        let id = store.enqueue(&payload(1)).unwrap();

        let event = store.get(id).unwrap().unwrap();
        assert_eq!(event.payload, payload(1));
        assert!(event.inserted_at.timestamp_millis() >= before);
        assert!(store.get(StoreId(99)).unwrap().is_none());
    }

    #[test]
    fn file_is_bound_to_its_namespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.sqlite");

        drop(SqliteEventStore::open(&path, "first", StoreLimits::unbounded()).unwrap());

        let err = SqliteEventStore::open(&path, "second", StoreLimits::unbounded())
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidNamespace(_)));
        assert_eq!(
            SqliteEventStore::read_namespace(&path).unwrap().as_deref(),
            Some("first")
        );
    }

    #[test]
    fn garbage_file_is_reported_as_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.sqlite");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();

        let err = SqliteEventStore::open(&path, "ns", StoreLimits::unbounded())
            .err()
            .unwrap();
        assert!(err.is_fatal(), "expected corruption, got {err:?}");
    }

    #[test]
    fn unreadable_payload_row_is_corruption() {
        let store = SqliteEventStore::in_memory("ns", StoreLimits::unbounded()).unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO events (payload, byte_size, inserted_at) VALUES ('not json', 8, 0)",
                [],
            )
            .unwrap();

        let err = store.select_by_count(1).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn running_total_is_seeded_on_reopen_and_tracks_removals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.sqlite");
        let limits = StoreLimits::with_max_total_bytes(100);

        let store = SqliteEventStore::open(&path, "ns", limits).unwrap();
        let first = store.enqueue(&payload(1)).unwrap();
        store.enqueue(&payload(2)).unwrap();
        let per_event = payload(1).byte_size().unwrap();
        drop(store);

        let store = SqliteEventStore::open(&path, "ns", limits).unwrap();
        assert_eq!(store.total_size().unwrap(), 2 * per_event);

        assert!(store.remove(first).unwrap());
        assert!(!store.remove(first).unwrap());
        assert_eq!(store.total_size().unwrap(), per_event);

        let sum: i64 = store
            .conn
            .lock()
            .query_row("SELECT SUM(byte_size) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sum as u64, per_event);

        store.remove_all().unwrap();
        assert_eq!(store.total_size().unwrap(), 0);
    }

    #[test]
    fn remove_many_spans_multiple_delete_chunks() {
        let store = SqliteEventStore::in_memory("ns", StoreLimits::unbounded()).unwrap();
        let ids: Vec<StoreId> = (0..(DELETE_CHUNK as i64 + 20))
            .map(|n| store.enqueue(&payload(n)).unwrap())
            .collect();

        assert!(store.remove_many(&ids).unwrap());
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.total_size().unwrap(), 0);
    }
}
