use anyhow::Context;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod cache;
pub mod drag;
pub mod entities;
pub mod panel;
pub mod pins;
pub mod search;
pub mod storage;

pub use cache::{EntityCache, EntityRepository};
pub use drag::{DragCoordinator, DragOutcome};
pub use entities::EntitySource;
pub use panel::ReferencePanel;
pub use pins::{PinRegistry, ResolvedPin};
pub use search::{FilteredEntities, SearchState};
pub use storage::{MemoryStorage, PinStorage};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

pub fn new_id(prefix: &str) -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{c}", now_ms())
}

#[derive(Debug, Clone)]
pub struct Engine {
    db_path: PathBuf,
}

impl Engine {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        // Cache fetches open several connections at once.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // Durable + fast defaults.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

    /// Highest event sequence number; clients poll this to know when to re-render.
    pub fn get_rev(&self) -> anyhow::Result<i64> {
        let conn = self.open()?;
        let rev: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM event_log", [], |row| row.get(0))?;
        Ok(rev.unwrap_or(0))
    }
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
-- Monotonic revision source for UI sync.
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  subject TEXT,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_ts ON event_log(ts_ms);
CREATE INDEX IF NOT EXISTS idx_event_log_kind ON event_log(kind);

-- Durable key/value store for UI state (pinned entities per chapter, ...).
CREATE TABLE IF NOT EXISTS local_storage (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

-- Narrative entities, one row per (book, kind, id). `position` keeps insertion order.
CREATE TABLE IF NOT EXISTS entities (
  book_id TEXT NOT NULL,
  kind TEXT NOT NULL,
  id TEXT NOT NULL,
  name TEXT NOT NULL,
  image TEXT,
  fields_json TEXT NOT NULL DEFAULT '{}',
  position INTEGER NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (book_id, kind, id)
);

CREATE INDEX IF NOT EXISTS idx_entities_book_kind ON entities(book_id, kind, position);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    Ok(())
}

pub(crate) fn append_event_tx(
    tx: &rusqlite::Transaction<'_>,
    kind: &str,
    subject: Option<&str>,
    payload: serde_json::Value,
) -> anyhow::Result<i64> {
    let ts = now_ms();
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, subject, payload_json) VALUES (?1, ?2, ?3, ?4)",
        (ts, kind, subject, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}

#[cfg(test)]
pub(crate) fn temp_engine() -> Engine {
    let p = std::env::temp_dir().join(format!(
        "lorepin-engine-test-{}-{}.db",
        time::OffsetDateTime::now_utc().unix_timestamp_nanos(),
        ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let engine = Engine::new(p);
    let _ = engine.open().expect("open db");
    engine
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_and_rev_starts_at_zero() {
        let engine = temp_engine();
        let _ = engine.open().unwrap();
        assert_eq!(engine.get_rev().unwrap(), 0);
    }

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_id("panel");
        let b = new_id("panel");
        assert!(a.starts_with("panel-"));
        assert_ne!(a, b);
    }
}
