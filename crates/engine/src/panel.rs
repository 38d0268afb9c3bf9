//! Reference panel controller: search + pins + drag state for one mounted
//! panel, rendered on demand into a [`PanelView`].

use lorepin_protocol::{
    CompositeKey, DragOverlay, Entity, EntityListRow, EntitySection, EntityType, PanelLayout,
    PanelView, Pin, PinnedCard, PinnedColumns, TypeFilter,
};
use std::collections::BTreeSet;

use crate::cache::EntityRepository;
use crate::drag::{DragCoordinator, DragOutcome};
use crate::pins::{PinRegistry, ResolvedPin};
use crate::search::SearchState;
use crate::storage::PinStorage;

#[derive(Debug)]
pub struct ReferencePanel<S> {
    book_id: String,
    registry: PinRegistry<S>,
    search: SearchState,
    collapsed: BTreeSet<EntityType>,
    list_visible: bool,
    drag: DragCoordinator,
}

impl<S: PinStorage> ReferencePanel<S> {
    /// Mount a panel: loads the chapter's pins. Sections start open and the
    /// searchable list starts visible.
    pub fn mount(storage: S, book_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            registry: PinRegistry::load(storage, chapter_id),
            search: SearchState::default(),
            collapsed: BTreeSet::new(),
            list_visible: true,
            drag: DragCoordinator::new(),
        }
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn chapter_id(&self) -> &str {
        self.registry.chapter_id()
    }

    pub fn registry(&self) -> &PinRegistry<S> {
        &self.registry
    }

    pub fn search(&self) -> &SearchState {
        &self.search
    }

    pub fn drag(&self) -> &DragCoordinator {
        &self.drag
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search.term = term.into();
    }

    pub fn set_selected_type(&mut self, selected: TypeFilter) {
        self.search.selected = selected;
    }

    pub fn set_search(&mut self, search: SearchState) {
        self.search = search;
    }

    pub fn is_section_open(&self, kind: EntityType) -> bool {
        !self.collapsed.contains(&kind)
    }

    /// Flip one kind's section. Returns the new open state.
    pub fn toggle_section(&mut self, kind: EntityType) -> bool {
        if !self.collapsed.remove(&kind) {
            self.collapsed.insert(kind);
        }
        self.is_section_open(kind)
    }

    pub fn is_list_visible(&self) -> bool {
        self.list_visible
    }

    pub fn toggle_list(&mut self) -> bool {
        self.list_visible = !self.list_visible;
        self.list_visible
    }

    /// Re-read the chapter's pins so writes from other panels show up.
    pub fn sync_pins(&mut self) {
        self.registry.reload();
    }

    pub fn pin(&mut self, kind: EntityType, id: &str) -> bool {
        self.registry.pin(kind, id)
    }

    pub fn unpin(&mut self, kind: EntityType, id: &str) -> bool {
        self.registry.unpin(kind, id)
    }

    pub fn is_pinned(&self, kind: EntityType, id: &str) -> bool {
        self.registry.is_pinned(kind, id)
    }

    /// Start dragging a pinned card. Returns false (and stays idle) if `key`
    /// is not one of this chapter's pins.
    pub fn drag_start(&mut self, key: CompositeKey, width: Option<f32>) -> bool {
        if !self.holds(&key) {
            return false;
        }
        self.drag.on_drag_start(key, width);
        true
    }

    pub fn drag_over(&mut self, key: Option<CompositeKey>) {
        self.drag.on_drag_over(key);
    }

    /// Finish the drag. Returns whether the pin order changed.
    pub fn drag_end(&mut self, target: Option<CompositeKey>) -> bool {
        self.registry.reload();
        match self.drag.on_drag_end(target, self.registry.pins()) {
            DragOutcome::Reordered(order) => {
                self.registry.reorder(order);
                true
            }
            DragOutcome::NoOp => false,
        }
    }

    pub fn drag_cancel(&mut self) {
        self.drag.cancel();
    }

    pub fn pointer_down(&mut self, key: CompositeKey, x: f32, y: f32, width: Option<f32>) {
        if self.holds(&key) {
            self.drag.pointer_down(key, x, y, width);
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32, over: Option<CompositeKey>) {
        self.drag.pointer_move(x, y, over);
    }

    pub fn pointer_up(&mut self, over: Option<CompositeKey>) -> bool {
        self.registry.reload();
        match self.drag.pointer_up(over, self.registry.pins()) {
            DragOutcome::Reordered(order) => {
                self.registry.reorder(order);
                true
            }
            DragOutcome::NoOp => false,
        }
    }

    fn holds(&self, key: &CompositeKey) -> bool {
        self.registry.pins().iter().any(|p| &p.key() == key)
    }

    pub fn view(&self, repo: &dyn EntityRepository) -> PanelView {
        let filtered = self.search.filter(repo, &self.book_id);
        let sections = filtered
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, list)| EntitySection {
                kind,
                label_key: kind.plural_label_key(),
                count: list.len(),
                open: self.is_section_open(kind),
                rows: list
                    .iter()
                    .map(|e| EntityListRow {
                        id: e.id.clone(),
                        name: e.name.clone(),
                        image: e.image.clone(),
                        pinned: self.is_pinned(kind, &e.id),
                    })
                    .collect(),
            })
            .collect();

        let resolved = self.registry.resolve(repo, &self.book_id);
        let active = self.drag.active_id();
        let over = self.drag.over_id();

        // A dragged pin whose entity vanished simply has no overlay.
        let overlay = active.and_then(|key| {
            resolved
                .iter()
                .find(|r| &r.pin.key() == key)
                .map(|r| DragOverlay {
                    card: card(&r.pin, &r.entity, false, false),
                    width: self.drag.overlay_width(),
                })
        });

        let cards = resolved
            .iter()
            .map(|ResolvedPin { pin, entity }| {
                let key = pin.key();
                let dragging = active == Some(&key);
                let drop_target = !dragging && over == Some(&key);
                card(pin, entity, dragging, drop_target)
            })
            .collect();

        PanelView {
            book_id: self.book_id.clone(),
            chapter_id: self.chapter_id().to_string(),
            layout: PanelLayout::for_visibility(self.list_visible),
            search_term: self.search.term.clone(),
            selected_type: self.search.selected,
            list_empty: filtered.is_empty(),
            sections,
            pinned_count: self.registry.len(),
            pinned: PinnedColumns::split(cards),
            overlay,
        }
    }
}

fn card(pin: &Pin, entity: &Entity, dragging: bool, drop_target: bool) -> PinnedCard {
    PinnedCard {
        key: pin.key(),
        kind: pin.kind,
        id: pin.id.clone(),
        name: entity.name.clone(),
        image: entity.image.clone(),
        summary: entity.summary().map(str::to_string),
        fields: entity.fields.clone(),
        dragging,
        drop_target,
    }
}
