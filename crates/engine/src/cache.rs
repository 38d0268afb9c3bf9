//! Per-book, per-kind entity cache.
//!
//! The cache is shared between every mounted panel and is populated by
//! explicit fetches. Fetches always hit the source; two overlapping fetches for
//! the same slot simply both land, last writer wins. Readers never block on a
//! fetch and see whatever the slot held at the time (empty before the first
//! fetch completes).

use lorepin_protocol::{Entity, EntityType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::entities::EntitySource;
use crate::now_ms;

/// Read-only view of entity data, injected into search and pin resolution.
pub trait EntityRepository {
    fn entities(&self, book_id: &str, kind: EntityType) -> Vec<Entity>;
}

#[derive(Debug, Clone, Default)]
struct CacheSlot {
    entities: Vec<Entity>,
    is_loading: bool,
    last_fetched_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EntityCache {
    slots: Arc<RwLock<HashMap<(String, EntityType), CacheSlot>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, book_id: &str, kind: EntityType) -> Vec<Entity> {
        self.read()
            .get(&(book_id.to_string(), kind))
            .map(|slot| slot.entities.clone())
            .unwrap_or_default()
    }

    pub fn is_loading(&self, book_id: &str, kind: EntityType) -> bool {
        self.read()
            .get(&(book_id.to_string(), kind))
            .is_some_and(|slot| slot.is_loading)
    }

    /// Milliseconds since the epoch of the last successful fetch, 0 if never.
    pub fn last_fetched_ms(&self, book_id: &str, kind: EntityType) -> i64 {
        self.read()
            .get(&(book_id.to_string(), kind))
            .map(|slot| slot.last_fetched_ms)
            .unwrap_or(0)
    }

    /// Replace one slot with fresh data from `source`. On failure the slot
    /// keeps its previous contents.
    pub fn fetch<S: EntitySource + ?Sized>(
        &self,
        source: &S,
        book_id: &str,
        kind: EntityType,
    ) -> anyhow::Result<()> {
        let key = (book_id.to_string(), kind);
        self.write().entry(key.clone()).or_default().is_loading = true;

        let result = source.load_entities(book_id, kind);

        let mut slots = self.write();
        let slot = slots.entry(key).or_default();
        slot.is_loading = false;
        let entities = result?;
        tracing::debug!(book_id, %kind, count = entities.len(), "entity cache refreshed");
        slot.entities = entities;
        slot.last_fetched_ms = now_ms();
        Ok(())
    }

    /// Fetch all five kinds concurrently. Failures are logged per kind and
    /// left to the store layer; the other kinds still land.
    pub fn fetch_all<S: EntitySource + Sync + ?Sized>(&self, source: &S, book_id: &str) {
        std::thread::scope(|scope| {
            for kind in EntityType::ALL {
                scope.spawn(move || {
                    if let Err(err) = self.fetch(source, book_id, kind) {
                        tracing::warn!(book_id, %kind, error = %err, "entity fetch failed");
                    }
                });
            }
        });
    }

    /// Drop every slot for a book; the next read is empty until re-fetched.
    pub fn invalidate(&self, book_id: &str) {
        self.write().retain(|(book, _), _| book != book_id);
    }

    /// Evict one entity from its cached list without touching the source.
    pub fn remove(&self, book_id: &str, kind: EntityType, id: &str) -> bool {
        let mut slots = self.write();
        let Some(slot) = slots.get_mut(&(book_id.to_string(), kind)) else {
            return false;
        };
        let before = slot.entities.len();
        slot.entities.retain(|e| e.id != id);
        slot.entities.len() != before
    }

    /// Seed a slot directly. Used by callers that already hold fresh data.
    pub fn set(&self, book_id: &str, kind: EntityType, entities: Vec<Entity>) {
        let mut slots = self.write();
        let slot = slots.entry((book_id.to_string(), kind)).or_default();
        slot.entities = entities;
        slot.last_fetched_ms = now_ms();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<(String, EntityType), CacheSlot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<(String, EntityType), CacheSlot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntityRepository for EntityCache {
    fn entities(&self, book_id: &str, kind: EntityType) -> Vec<Entity> {
        self.get(book_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temp_engine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
    }

    impl EntitySource for FlakySource {
        fn load_entities(&self, _book_id: &str, kind: EntityType) -> anyhow::Result<Vec<Entity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if kind == EntityType::Faction {
                anyhow::bail!("factions table locked");
            }
            Ok(vec![Entity::new(format!("{kind}-1"), kind.as_str())])
        }
    }

    #[test]
    fn read_before_fetch_is_empty() {
        let cache = EntityCache::new();
        assert!(cache.get("b1", EntityType::Race).is_empty());
        assert!(!cache.is_loading("b1", EntityType::Race));
        assert_eq!(cache.last_fetched_ms("b1", EntityType::Race), 0);
    }

    #[test]
    fn fetch_all_fans_out_and_tolerates_failures() {
        let cache = EntityCache::new();
        let source = FlakySource {
            calls: AtomicUsize::new(0),
        };
        cache.fetch_all(&source, "b1");

        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert_eq!(cache.get("b1", EntityType::Character).len(), 1);
        assert!(cache.get("b1", EntityType::Faction).is_empty());
        assert!(!cache.is_loading("b1", EntityType::Faction));
        assert!(cache.last_fetched_ms("b1", EntityType::Race) > 0);
    }

    #[test]
    fn repeated_fetch_picks_up_store_changes() {
        let engine = temp_engine();
        let cache = EntityCache::new();
        engine
            .upsert_entity("b1", EntityType::Item, &Entity::new("x1", "Sword"))
            .unwrap();
        cache.fetch(&engine, "b1", EntityType::Item).unwrap();
        assert_eq!(cache.get("b1", EntityType::Item).len(), 1);

        engine.delete_entity("b1", EntityType::Item, "x1").unwrap();
        cache.fetch(&engine, "b1", EntityType::Item).unwrap();
        assert!(cache.get("b1", EntityType::Item).is_empty());
    }

    #[test]
    fn remove_and_invalidate() {
        let cache = EntityCache::new();
        cache.set(
            "b1",
            EntityType::Region,
            vec![Entity::new("r1", "North"), Entity::new("r2", "South")],
        );
        cache.set("b2", EntityType::Region, vec![Entity::new("r9", "Far")]);

        assert!(cache.remove("b1", EntityType::Region, "r1"));
        assert!(!cache.remove("b1", EntityType::Region, "r1"));
        assert_eq!(cache.get("b1", EntityType::Region).len(), 1);

        cache.invalidate("b1");
        assert!(cache.get("b1", EntityType::Region).is_empty());
        assert_eq!(cache.get("b2", EntityType::Region).len(), 1);
    }
}
