use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod view;

pub use view::{
    DragOverlay, EntityListRow, EntitySection, PanelLayout, PanelView, PinnedCard, PinnedColumns,
};

/// The five kinds of narrative entity a chapter can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Character,
    Region,
    Faction,
    Item,
    Race,
}

impl EntityType {
    /// Canonical display order for the searchable list.
    pub const ALL: [EntityType; 5] = [
        EntityType::Character,
        EntityType::Region,
        EntityType::Faction,
        EntityType::Item,
        EntityType::Race,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Region => "region",
            EntityType::Faction => "faction",
            EntityType::Item => "item",
            EntityType::Race => "race",
        }
    }

    /// i18n key for the section header.
    pub fn plural_label_key(&self) -> String {
        format!("entity_types_plural.{}", self.as_str())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown entity type: {0:?}")]
    EntityType(String),
    #[error("malformed composite key: {0:?}")]
    CompositeKey(String),
}

impl FromStr for EntityType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(EntityType::Character),
            "region" => Ok(EntityType::Region),
            "faction" => Ok(EntityType::Faction),
            "item" => Ok(EntityType::Item),
            "race" => Ok(EntityType::Race),
            other => Err(ParseError::EntityType(other.to_string())),
        }
    }
}

/// Type selector for the searchable list: every kind, or exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(EntityType),
}

impl TypeFilter {
    pub fn includes(&self, kind: EntityType) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(k) => *k == kind,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeFilter::All => "all",
            TypeFilter::Only(k) => k.as_str(),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(TypeFilter::All);
        }
        s.parse().map(TypeFilter::Only)
    }
}

impl Serialize for TypeFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TypeFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A chapter's reference to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pin {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub id: String,
}

impl Pin {
    pub fn new(kind: EntityType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn matches(&self, kind: EntityType, id: &str) -> bool {
        self.kind == kind && self.id == id
    }

    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.kind, &self.id)
    }
}

/// `"{type}-{id}"`, the identity of a pinned card during drag and render.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(String);

impl CompositeKey {
    pub fn new(kind: EntityType, id: &str) -> Self {
        Self(format!("{}-{id}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits at the first `-`: kind names never contain one, ids may.
    pub fn parts(&self) -> Result<(EntityType, &str), ParseError> {
        let (kind, id) = self
            .0
            .split_once('-')
            .ok_or_else(|| ParseError::CompositeKey(self.0.clone()))?;
        if id.is_empty() {
            return Err(ParseError::CompositeKey(self.0.clone()));
        }
        let kind = kind
            .parse()
            .map_err(|_| ParseError::CompositeKey(self.0.clone()))?;
        Ok((kind, id))
    }
}

impl FromStr for CompositeKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = CompositeKey(s.to_string());
        key.parts()?;
        Ok(key)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A narrative entity as read from the store. Only `id` and `name` are
/// interpreted here; everything else rides along in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: None,
            fields: serde_json::Map::new(),
        }
    }

    /// Short blurb shown on a pinned card.
    pub fn summary(&self) -> Option<&str> {
        ["description", "summary", "basicDescription"]
            .iter()
            .filter_map(|k| self.fields.get(*k))
            .filter_map(|v| v.as_str())
            .find(|s| !s.is_empty())
    }
}

pub fn pinned_entities_key(chapter_id: &str) -> String {
    format!("pinnedEntities_{chapter_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_serializes_with_type_field() {
        let pin = Pin::new(EntityType::Item, "X1");
        let json = serde_json::to_string(&pin).unwrap();
        assert_eq!(json, r#"{"type":"item","id":"X1"}"#);
    }

    #[test]
    fn composite_key_keeps_dashes_in_id() {
        let key = CompositeKey::new(EntityType::Region, "a-b-c");
        assert_eq!(key.as_str(), "region-a-b-c");
        assert_eq!(key.parts().unwrap(), (EntityType::Region, "a-b-c"));
    }

    #[test]
    fn composite_key_rejects_unknown_kind() {
        assert!("planet-1".parse::<CompositeKey>().is_err());
        assert!("race-".parse::<CompositeKey>().is_err());
        assert!("race".parse::<CompositeKey>().is_err());
    }

    #[test]
    fn type_filter_round_trips_through_strings() {
        assert_eq!("all".parse::<TypeFilter>().unwrap(), TypeFilter::All);
        let f: TypeFilter = serde_json::from_str(r#""race""#).unwrap();
        assert_eq!(f, TypeFilter::Only(EntityType::Race));
        assert!(f.includes(EntityType::Race));
        assert!(!f.includes(EntityType::Item));
        assert!(serde_json::from_str::<TypeFilter>(r#""dragon""#).is_err());
    }

    #[test]
    fn summary_falls_back_through_description_fields() {
        let mut e = Entity::new("c1", "Elara");
        assert_eq!(e.summary(), None);
        e.fields
            .insert("basicDescription".into(), serde_json::json!("tall"));
        assert_eq!(e.summary(), Some("tall"));
        e.fields.insert("description".into(), serde_json::json!(""));
        assert_eq!(e.summary(), Some("tall"));
        e.fields
            .insert("summary".into(), serde_json::json!("a ranger"));
        assert_eq!(e.summary(), Some("a ranger"));
    }

    #[test]
    fn storage_key_format() {
        assert_eq!(pinned_entities_key("ch-9"), "pinnedEntities_ch-9");
    }
}
