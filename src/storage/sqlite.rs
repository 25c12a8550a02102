//! SQLite-backed event log. Rows are stored as received; `seq` orders them by insertion.
//! Rows written by another process are picked up on the next snapshot. Reads check
//! `PRAGMA data_version` on a side connection and skip the writer lock when nothing changed.

use super::{AppendReport, EventStore, Snapshot};
use crate::error::Result;
use crate::events::{NewEvent, StoredRecord};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Inner {
    conn: Connection,
    /// Highest `seq` folded into the published snapshot
    last_seq: i64,
}

pub struct SqliteEventStore {
    inner: Mutex<Inner>,
    current: RwLock<Arc<Snapshot>>,
    version: AtomicU64,
    /// Second connection to the same file; `None` for private in-memory databases
    observer: Option<Mutex<Connection>>,
    /// `PRAGMA data_version` last seen on `observer`
    seen_data_version: AtomicI64,
    /// Set when a committed append could not be folded into the snapshot yet
    pending: AtomicBool,
}

impl SqliteEventStore {
    /// Open or create DB at path and load existing rows.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let observer = Connection::open(path)?;
        Self::with_connection(conn, Some(observer))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, observer: Option<Connection>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                user_id TEXT,
                event TEXT,
                timestamp TEXT,
                properties TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);
            "#,
        )?;
        let (records, last_seq) = load_after(&conn, 0)?;
        let snapshot = Snapshot::build(0, records);
        info!(
            events = snapshot.len(),
            skipped = snapshot.skipped(),
            "event store opened"
        );
        let seen = match &observer {
            Some(p) => data_version(p)?,
            None => 0,
        };
        Ok(Self {
            inner: Mutex::new(Inner { conn, last_seq }),
            current: RwLock::new(Arc::new(snapshot)),
            version: AtomicU64::new(0),
            observer: observer.map(Mutex::new),
            seen_data_version: AtomicI64::new(seen),
            pending: AtomicBool::new(false),
        })
    }

    /// True when the database may hold rows beyond the published snapshot.
    fn may_have_new_rows(&self) -> Result<bool> {
        if self.pending.load(Ordering::Acquire) {
            return Ok(true);
        }
        let Some(observer) = &self.observer else {
            return Ok(false);
        };
        let current = data_version(&observer.lock())?;
        Ok(self.seen_data_version.swap(current, Ordering::AcqRel) != current)
    }

    /// Fold rows with `seq > last_seq` into a new snapshot. Caller holds the inner lock.
    fn catch_up(&self, inner: &mut Inner) -> Result<u64> {
        let (records, last_seq) = match load_after(&inner.conn, inner.last_seq) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.pending.store(true, Ordering::Release);
                return Err(e);
            }
        };
        self.pending.store(false, Ordering::Release);
        if records.is_empty() {
            return Ok(self.version.load(Ordering::Acquire));
        }
        let version = self.version.load(Ordering::Acquire) + 1;
        let next = Arc::new(self.current.read().extend(version, records));
        *self.current.write() = next;
        inner.last_seq = last_seq;
        self.version.store(version, Ordering::Release);
        Ok(version)
    }
}

fn data_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA data_version", [], |row| row.get(0))?)
}

fn load_after(conn: &Connection, after_seq: i64) -> Result<(Vec<StoredRecord>, i64)> {
    let mut stmt = conn.prepare(
        "SELECT seq, id, user_id, event, timestamp, properties FROM events WHERE seq > ?1 ORDER BY seq",
    )?;
    let mut rows = stmt.query(params![after_seq])?;
    let mut out = Vec::new();
    let mut last = after_seq;
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let id: String = row.get(1)?;
        let properties: Option<String> = row.get(5)?;
        let properties = properties.and_then(|p| match serde_json::from_str(&p) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(seq, error = %e, "ignoring unparseable properties");
                None
            }
        });
        out.push(StoredRecord {
            id,
            raw: NewEvent {
                user_id: row.get(2)?,
                event: row.get(3)?,
                timestamp: row.get(4)?,
                properties,
            },
        });
        last = seq;
    }
    Ok((out, last))
}

impl EventStore for SqliteEventStore {
    fn append(&self, batch: Vec<NewEvent>) -> Result<AppendReport> {
        let mut inner = self.inner.lock();
        let records: Vec<StoredRecord> = batch.into_iter().map(StoredRecord::assign).collect();
        let inserted = records.len();
        {
            let tx = inner.conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO events (id, user_id, event, timestamp, properties) VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for r in &records {
                    let props = r.raw.properties.as_ref().map(|p| p.to_string());
                    stmt.execute(params![
                        r.id,
                        r.raw.user_id,
                        r.raw.event,
                        r.raw.timestamp,
                        props
                    ])?;
                }
            }
            tx.commit()?;
        }
        // The rows are committed; a failed refresh is retried by the next snapshot.
        let version = match self.catch_up(&mut inner) {
            Ok(version) => version,
            Err(e) => {
                warn!(error = %e, inserted, "append committed, snapshot refresh deferred");
                self.version.load(Ordering::Acquire)
            }
        };
        Ok(AppendReport { inserted, version })
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        if self.may_have_new_rows()? {
            let mut inner = self.inner.lock();
            self.catch_up(&mut inner)?;
        }
        Ok(self.current.read().clone())
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        {
            let store = SqliteEventStore::open(&path).unwrap();
            let report = store
                .append(vec![
                    NewEvent::new("u1", "visit", "2024-01-01T00:00:00Z")
                        .with_properties(serde_json::json!({"mobile": true})),
                    NewEvent::new("u2", "visit", "2024-01-01T00:00:00Z"),
                ])
                .unwrap();
            assert_eq!(report.inserted, 2);
            assert_eq!(report.version, 1);
            assert_eq!(store.snapshot().unwrap().len(), 2);
        }
        let store = SqliteEventStore::open(&path).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.version(), 0);
        assert_eq!(snap[0].properties["mobile"], serde_json::json!(true));
    }

    #[test]
    fn external_rows_are_picked_up_and_corrupt_ones_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::open(&path).unwrap();
        assert_eq!(store.snapshot().unwrap().version(), 0);

        let writer = Connection::open(&path).unwrap();
        writer
            .execute_batch(
                r#"
                INSERT INTO events (id, user_id, event, timestamp) VALUES ('a', 'u1', 'visit', '2024-01-01 10:00:00');
                INSERT INTO events (id, user_id, event, timestamp) VALUES ('b', NULL, 'visit', '2024-01-01 10:00:00');
                INSERT INTO events (id, user_id, event, timestamp) VALUES ('c', 'u2', 'visit', 'soon');
                "#,
            )
            .unwrap();

        let snap = store.snapshot().unwrap();
        assert_eq!(snap.version(), 1);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.skipped(), 2);

        // Nothing new: same version, same snapshot.
        let again = store.snapshot().unwrap();
        assert!(Arc::ptr_eq(&snap, &again));
    }

    #[test]
    fn unchanged_reads_skip_the_writer_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteEventStore::open(&dir.path().join("events.db")).unwrap());
        store
            .append(vec![NewEvent::new("u1", "visit", "2024-01-01")])
            .unwrap();
        let settled = store.snapshot().unwrap();

        let guard = store.inner.lock();
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = Arc::clone(&store);
        std::thread::spawn(move || {
            let _ = tx.send(reader.snapshot().map(|s| s.version()));
        });
        let read = rx.recv_timeout(std::time::Duration::from_secs(5));
        drop(guard);
        assert_eq!(read.unwrap().unwrap(), settled.version());
    }

    #[test]
    fn in_memory_store_reads_its_own_appends() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let report = store
            .append(vec![NewEvent::new("u1", "visit", "2024-01-01")])
            .unwrap();
        assert_eq!(report.version, 1);
        assert_eq!(store.snapshot().unwrap().len(), 1);
    }
}
