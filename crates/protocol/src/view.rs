//! Render model for the entity reference panel.
//!
//! Everything here is derived state: the engine recomputes a fresh `PanelView`
//! from the pin list, the entity caches and the transient panel state on every
//! call, and the web shell renders it as-is.

use serde::{Deserialize, Serialize};

use crate::{CompositeKey, EntityType, TypeFilter};

pub const PANEL_WIDTH_WITH_LIST: u32 = 1000;
pub const PANEL_WIDTH_WITHOUT_LIST: u32 = 600;
pub const LIST_COLUMN_WIDTH: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelLayout {
    pub list_visible: bool,
    pub panel_width: u32,
    pub list_width: u32,
}

impl PanelLayout {
    pub fn for_visibility(list_visible: bool) -> Self {
        Self {
            list_visible,
            panel_width: if list_visible {
                PANEL_WIDTH_WITH_LIST
            } else {
                PANEL_WIDTH_WITHOUT_LIST
            },
            list_width: if list_visible { LIST_COLUMN_WIDTH } else { 0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityListRow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub pinned: bool,
}

/// One collapsible per-kind group in the left column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySection {
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub label_key: String,
    pub count: usize,
    pub open: bool,
    pub rows: Vec<EntityListRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedCard {
    pub key: CompositeKey,
    #[serde(rename = "type")]
    pub kind: EntityType,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Rendered at reduced opacity while it is the card being dragged.
    pub dragging: bool,
    /// Rendered with the drop indicator.
    pub drop_target: bool,
}

/// Even indices go left, odd indices go right.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinnedColumns {
    pub left: Vec<PinnedCard>,
    pub right: Vec<PinnedCard>,
}

impl PinnedColumns {
    pub fn split(cards: Vec<PinnedCard>) -> Self {
        let mut columns = PinnedColumns::default();
        for (i, card) in cards.into_iter().enumerate() {
            if i % 2 == 0 {
                columns.left.push(card);
            } else {
                columns.right.push(card);
            }
        }
        columns
    }

    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Floating copy of the dragged card that follows the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DragOverlay {
    pub card: PinnedCard,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelView {
    pub book_id: String,
    pub chapter_id: String,
    pub layout: PanelLayout,
    pub search_term: String,
    pub selected_type: TypeFilter,
    pub sections: Vec<EntitySection>,
    /// True when every filtered list is empty.
    pub list_empty: bool,
    /// Raw pin list length, stale pins included.
    pub pinned_count: usize,
    pub pinned: PinnedColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<DragOverlay>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str) -> PinnedCard {
        PinnedCard {
            key: CompositeKey::new(EntityType::Character, id),
            kind: EntityType::Character,
            id: id.to_string(),
            name: id.to_uppercase(),
            image: None,
            summary: None,
            fields: serde_json::Map::new(),
            dragging: false,
            drop_target: false,
        }
    }

    #[test]
    fn split_alternates_columns() {
        let cols = PinnedColumns::split(vec![card("a"), card("b"), card("c")]);
        let left: Vec<_> = cols.left.iter().map(|c| c.id.as_str()).collect();
        let right: Vec<_> = cols.right.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(left, ["a", "c"]);
        assert_eq!(right, ["b"]);
        assert_eq!(cols.len(), 3);
    }

    #[test]
    fn layout_tracks_list_visibility() {
        assert_eq!(PanelLayout::for_visibility(true).panel_width, 1000);
        let hidden = PanelLayout::for_visibility(false);
        assert_eq!(hidden.panel_width, 600);
        assert_eq!(hidden.list_width, 0);
    }
}
