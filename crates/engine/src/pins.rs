//! Chapter-scoped pin list.
//!
//! Storage holds the chapter's list; several registries may share one key.
//! Every mutation re-reads the stored list, applies the change and rewrites
//! it in full. Loading never fails: malformed data is logged and treated as an
//! empty list. Read and write failures are logged and the in-memory list
//! stays authoritative until storage answers again.

use lorepin_protocol::{pinned_entities_key, Entity, EntityType, Pin};
use std::collections::{HashMap, HashSet};

use crate::cache::EntityRepository;
use crate::storage::PinStorage;

/// A pin joined against live entity data.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPin {
    pub pin: Pin,
    pub entity: Entity,
}

#[derive(Debug)]
pub struct PinRegistry<S> {
    chapter_id: String,
    pins: Vec<Pin>,
    storage: S,
}

impl<S: PinStorage> PinRegistry<S> {
    pub fn load(storage: S, chapter_id: impl Into<String>) -> Self {
        let chapter_id = chapter_id.into();
        let pins = read_pins(&storage, &chapter_id).unwrap_or_else(|err| {
            tracing::warn!(%chapter_id, error = %err, "failed to read pinned entities, starting empty");
            Vec::new()
        });
        Self {
            chapter_id,
            pins,
            storage,
        }
    }

    /// Pick up writes made through other registries on the same chapter.
    /// Keeps the in-memory list if storage can't be read.
    pub fn reload(&mut self) {
        match read_pins(&self.storage, &self.chapter_id) {
            Ok(pins) => self.pins = pins,
            Err(err) => {
                tracing::warn!(chapter_id = %self.chapter_id, error = %err, "failed to reload pinned entities");
            }
        }
    }

    pub fn chapter_id(&self) -> &str {
        &self.chapter_id
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn is_pinned(&self, kind: EntityType, id: &str) -> bool {
        self.pins.iter().any(|p| p.matches(kind, id))
    }

    /// Append unless already pinned. Returns whether the list changed.
    pub fn pin(&mut self, kind: EntityType, id: &str) -> bool {
        self.reload();
        if self.is_pinned(kind, id) {
            return false;
        }
        self.pins.push(Pin::new(kind, id));
        self.persist();
        true
    }

    /// Remove the matching pin. Returns whether the list changed.
    pub fn unpin(&mut self, kind: EntityType, id: &str) -> bool {
        self.reload();
        let Some(pos) = self.pins.iter().position(|p| p.matches(kind, id)) else {
            return false;
        };
        self.pins.remove(pos);
        self.persist();
        true
    }

    /// Replace the whole list. The caller supplies a permutation of the
    /// current pins, so reload first when other writers may exist.
    pub fn reorder(&mut self, new_order: Vec<Pin>) {
        self.pins = new_order;
        self.persist();
    }

    /// Per pin, the live entity or `None` if it is gone from the cache.
    pub fn resolve_all(
        &self,
        repo: &dyn EntityRepository,
        book_id: &str,
    ) -> Vec<(Pin, Option<Entity>)> {
        let mut by_kind: HashMap<EntityType, Vec<Entity>> = HashMap::new();
        self.pins
            .iter()
            .map(|pin| {
                let list = by_kind
                    .entry(pin.kind)
                    .or_insert_with(|| repo.entities(book_id, pin.kind));
                let entity = list.iter().find(|e| e.id == pin.id).cloned();
                (pin.clone(), entity)
            })
            .collect()
    }

    /// The materialized view: pins whose entity still exists, in pin order.
    /// Stale pins stay in the list until explicitly unpinned.
    pub fn resolve(&self, repo: &dyn EntityRepository, book_id: &str) -> Vec<ResolvedPin> {
        self.resolve_all(repo, book_id)
            .into_iter()
            .filter_map(|(pin, entity)| entity.map(|entity| ResolvedPin { pin, entity }))
            .collect()
    }

    fn persist(&self) {
        let key = pinned_entities_key(&self.chapter_id);
        let result = serde_json::to_string(&self.pins)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.write(&key, &json));
        if let Err(err) = result {
            tracing::warn!(chapter_id = %self.chapter_id, error = %err, "failed to persist pinned entities");
        }
    }
}

/// Only a storage error is an `Err`; a missing or malformed value is empty.
fn read_pins<S: PinStorage>(storage: &S, chapter_id: &str) -> anyhow::Result<Vec<Pin>> {
    let key = pinned_entities_key(chapter_id);
    let Some(raw) = storage.read(&key)? else {
        return Ok(Vec::new());
    };
    Ok(parse_pins(&raw).unwrap_or_else(|err| {
        tracing::warn!(chapter_id, error = %err, "malformed pinned entities, starting empty");
        Vec::new()
    }))
}

/// Decode a persisted pin list. The top level must be a JSON array; entries
/// that don't decode as pins, and repeats of an earlier pin, are skipped.
pub fn parse_pins(raw: &str) -> anyhow::Result<Vec<Pin>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let serde_json::Value::Array(items) = value else {
        anyhow::bail!("pinned entities is not an array");
    };

    let mut seen = HashSet::new();
    let mut pins = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Pin>(item) {
            Ok(pin) => {
                if seen.insert(pin.clone()) {
                    pins.push(pin);
                } else {
                    tracing::warn!(key = %pin.key(), "dropping duplicate pin");
                }
            }
            Err(err) => tracing::warn!(error = %err, "skipping malformed pin entry"),
        }
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityCache;
    use crate::storage::MemoryStorage;
    use crate::temp_engine;

    struct BrokenStorage;

    impl PinStorage for BrokenStorage {
        fn read(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("disk on fire")
        }

        fn write(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    fn stored(storage: &MemoryStorage, chapter: &str) -> Vec<Pin> {
        let raw = storage
            .read(&pinned_entities_key(chapter))
            .unwrap()
            .unwrap_or_default();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn pin_is_idempotent() {
        let storage = MemoryStorage::new();
        let mut reg = PinRegistry::load(storage.clone(), "ch1");
        assert!(reg.pin(EntityType::Character, "c1"));
        assert!(!reg.pin(EntityType::Character, "c1"));
        assert!(reg.pin(EntityType::Race, "c1"));
        assert!(!reg.pin(EntityType::Character, "c1"));

        assert_eq!(
            reg.pins(),
            [
                Pin::new(EntityType::Character, "c1"),
                Pin::new(EntityType::Race, "c1")
            ]
        );
        assert_eq!(stored(&storage, "ch1"), reg.pins());
    }

    #[test]
    fn unpin_missing_is_a_noop() {
        let storage = MemoryStorage::new();
        let mut reg = PinRegistry::load(storage.clone(), "ch1");
        reg.pin(EntityType::Item, "x1");
        assert!(!reg.unpin(EntityType::Item, "x2"));
        assert!(!reg.unpin(EntityType::Region, "x1"));
        assert_eq!(reg.len(), 1);

        assert!(reg.unpin(EntityType::Item, "x1"));
        assert!(reg.is_empty());
        assert!(stored(&storage, "ch1").is_empty());
    }

    #[test]
    fn reorder_survives_reload() {
        let storage = MemoryStorage::new();
        let mut reg = PinRegistry::load(storage.clone(), "ch1");
        reg.pin(EntityType::Character, "a");
        reg.pin(EntityType::Region, "b");
        reg.pin(EntityType::Item, "c");

        let order = vec![
            Pin::new(EntityType::Item, "c"),
            Pin::new(EntityType::Character, "a"),
            Pin::new(EntityType::Region, "b"),
        ];
        reg.reorder(order.clone());

        let fresh = PinRegistry::load(storage, "ch1");
        assert_eq!(fresh.pins(), order.as_slice());
    }

    #[test]
    fn empty_chapter_then_restart_on_sqlite() {
        let engine = temp_engine();
        let mut reg = PinRegistry::load(engine.clone(), "ch-new");
        assert!(reg.is_empty());
        reg.pin(EntityType::Character, "c1");
        drop(reg);

        let reg = PinRegistry::load(engine, "ch-new");
        assert_eq!(reg.pins(), [Pin::new(EntityType::Character, "c1")]);
    }

    #[test]
    fn chapters_do_not_share_pins() {
        let storage = MemoryStorage::new();
        let mut a = PinRegistry::load(storage.clone(), "ch1");
        a.pin(EntityType::Faction, "f1");
        let b = PinRegistry::load(storage, "ch2");
        assert!(b.is_empty());
    }

    #[test]
    fn malformed_storage_loads_empty() {
        let storage = MemoryStorage::new();
        for raw in ["not json", r#"{"type":"item","id":"x"}"#, "42", ""] {
            storage.insert_raw(pinned_entities_key("ch1"), raw);
            assert!(PinRegistry::load(storage.clone(), "ch1").is_empty(), "{raw:?}");
        }
    }

    #[test]
    fn bad_entries_and_duplicates_are_skipped() {
        let pins = parse_pins(
            r#"[{"type":"item","id":"x"},{"type":"dragon","id":"d"},7,{"type":"item","id":"x"},{"type":"race","id":"r"}]"#,
        )
        .unwrap();
        assert_eq!(
            pins,
            [Pin::new(EntityType::Item, "x"), Pin::new(EntityType::Race, "r")]
        );
    }

    #[test]
    fn storage_failures_are_soft() {
        let mut reg = PinRegistry::load(BrokenStorage, "ch1");
        assert!(reg.is_empty());
        assert!(reg.pin(EntityType::Item, "x1"));
        assert!(reg.is_pinned(EntityType::Item, "x1"));
    }

    #[test]
    fn registries_on_one_chapter_keep_each_others_pins() {
        let storage = MemoryStorage::new();
        let mut a = PinRegistry::load(storage.clone(), "ch1");
        let mut b = PinRegistry::load(storage.clone(), "ch1");

        assert!(a.pin(EntityType::Character, "c1"));
        assert!(b.pin(EntityType::Region, "r1"));
        assert!(!b.pin(EntityType::Character, "c1"));
        assert!(a.unpin(EntityType::Region, "r1"));

        assert_eq!(stored(&storage, "ch1"), [Pin::new(EntityType::Character, "c1")]);
        b.reload();
        assert_eq!(b.pins(), a.pins());
    }

    #[test]
    fn reload_keeps_list_when_storage_fails() {
        let mut reg = PinRegistry::load(BrokenStorage, "ch1");
        reg.pin(EntityType::Item, "x1");
        reg.reload();
        assert_eq!(reg.pins(), [Pin::new(EntityType::Item, "x1")]);
    }

    #[test]
    fn stale_pin_is_hidden_but_kept() {
        let storage = MemoryStorage::new();
        let cache = EntityCache::new();
        cache.set(
            "b1",
            EntityType::Item,
            vec![Entity::new("X1", "Amulet"), Entity::new("X2", "Ring")],
        );
        let mut reg = PinRegistry::load(storage.clone(), "ch1");
        reg.pin(EntityType::Item, "X1");
        reg.pin(EntityType::Item, "X2");
        assert_eq!(reg.resolve(&cache, "b1").len(), 2);

        cache.remove("b1", EntityType::Item, "X1");
        let view = reg.resolve(&cache, "b1");
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].entity.name, "Ring");

        let all = reg.resolve_all(&cache, "b1");
        assert_eq!(all[0], (Pin::new(EntityType::Item, "X1"), None));

        let raw = PinRegistry::load(storage, "ch1");
        assert!(raw.is_pinned(EntityType::Item, "X1"));
    }

    #[test]
    fn stale_pin_comes_back_when_entity_reappears() {
        let cache = EntityCache::new();
        let mut reg = PinRegistry::load(MemoryStorage::new(), "ch1");
        reg.pin(EntityType::Race, "r1");
        assert!(reg.resolve(&cache, "b1").is_empty());

        cache.set("b1", EntityType::Race, vec![Entity::new("r1", "Dwarves")]);
        assert_eq!(reg.resolve(&cache, "b1")[0].entity.name, "Dwarves");
    }
}
