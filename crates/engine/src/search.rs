use lorepin_protocol::{Entity, EntityType, TypeFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::EntityRepository;

/// Transient search box + type selector state of one panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    #[serde(default)]
    pub term: String,
    #[serde(default, rename = "type")]
    pub selected: TypeFilter,
}

impl SearchState {
    pub fn new(term: impl Into<String>, selected: TypeFilter) -> Self {
        Self {
            term: term.into(),
            selected,
        }
    }

    pub fn filter(&self, repo: &dyn EntityRepository, book_id: &str) -> FilteredEntities {
        filter_entities(repo, book_id, &self.term, self.selected)
    }
}

/// One possibly-empty list per kind, each in cache order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredEntities {
    by_kind: BTreeMap<EntityType, Vec<Entity>>,
}

impl FilteredEntities {
    pub fn get(&self, kind: EntityType) -> &[Entity] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(Vec::is_empty)
    }

    pub fn total(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// Kinds in canonical order, empties included.
    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &[Entity])> + '_ {
        EntityType::ALL.into_iter().map(|k| (k, self.get(k)))
    }
}

pub fn matches_term(name: &str, term: &str) -> bool {
    term.is_empty() || name.to_lowercase().contains(&term.to_lowercase())
}

pub fn filter_entities(
    repo: &dyn EntityRepository,
    book_id: &str,
    term: &str,
    selected: TypeFilter,
) -> FilteredEntities {
    let mut by_kind = BTreeMap::new();
    for kind in EntityType::ALL {
        let list = if selected.includes(kind) {
            repo.entities(book_id, kind)
                .into_iter()
                .filter(|e| matches_term(&e.name, term))
                .collect()
        } else {
            Vec::new()
        };
        by_kind.insert(kind, list);
    }
    FilteredEntities { by_kind }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityCache;

    fn seeded() -> EntityCache {
        let cache = EntityCache::new();
        cache.set(
            "b1",
            EntityType::Character,
            vec![
                Entity::new("c1", "Elara"),
                Entity::new("c2", "Kael"),
                Entity::new("c3", "Elandor"),
            ],
        );
        cache.set("b1", EntityType::Race, vec![Entity::new("r1", "Elves")]);
        cache.set("b1", EntityType::Item, vec![Entity::new("i1", "Lantern")]);
        cache
    }

    fn names(list: &[Entity]) -> Vec<&str> {
        list.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn case_insensitive_substring_keeps_cache_order() {
        let cache = seeded();
        let out = filter_entities(&cache, "b1", "ela", TypeFilter::All);
        assert_eq!(names(out.get(EntityType::Character)), ["Elara", "Elandor"]);
        assert!(out.get(EntityType::Race).is_empty());

        let out = filter_entities(&cache, "b1", "ELA", TypeFilter::All);
        assert_eq!(out.get(EntityType::Character).len(), 2);
    }

    #[test]
    fn empty_term_matches_everything() {
        let cache = seeded();
        let out = SearchState::default().filter(&cache, "b1");
        assert_eq!(out.total(), 5);
        assert!(!out.is_empty());
    }

    #[test]
    fn type_selector_empties_other_kinds() {
        let cache = seeded();
        for term in ["", "el", "zzz"] {
            let out = filter_entities(&cache, "b1", term, TypeFilter::Only(EntityType::Race));
            for kind in [
                EntityType::Character,
                EntityType::Region,
                EntityType::Faction,
                EntityType::Item,
            ] {
                assert!(out.get(kind).is_empty(), "{kind} should be empty for {term:?}");
            }
        }
        let out = filter_entities(&cache, "b1", "el", TypeFilter::Only(EntityType::Race));
        assert_eq!(names(out.get(EntityType::Race)), ["Elves"]);
    }

    #[test]
    fn unknown_book_yields_empty_lists() {
        let cache = seeded();
        let out = filter_entities(&cache, "nope", "", TypeFilter::All);
        assert!(out.is_empty());
        assert_eq!(out.iter().count(), 5);
    }
}
