//! Durable per-key string storage, the backing for persisted pin lists.

use anyhow::Context;
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{append_event_tx, now_ms, Engine};

pub trait PinStorage {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

impl PinStorage for Engine {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.open()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("read local storage key {key}"))?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO local_storage (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at_ms = excluded.updated_at_ms",
            (key, value, now_ms()),
        )
        .with_context(|| format!("write local storage key {key}"))?;
        append_event_tx(
            &tx,
            "storage.written",
            Some(key),
            serde_json::json!({ "key": key }),
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl<T: PinStorage + ?Sized> PinStorage for &T {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).write(key, value)
    }
}

/// In-process storage. Clones share the same map, so a fresh registry built
/// from a clone sees what an earlier one wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, bypassing any serialization.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PinStorage for MemoryStorage {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
