//! Drag-to-reorder over pinned cards.
//!
//! Dropping card A onto card B swaps their two positions; nothing else
//! moves. Gesture recognition is reduced to three inputs (`on_drag_start`,
//! `on_drag_over`, `on_drag_end`); the pointer and keyboard helpers below feed
//! those inputs.

use lorepin_protocol::{CompositeKey, Pin};

/// Pointer travel, in CSS pixels, before a press becomes a drag.
pub const POINTER_ACTIVATION_DISTANCE: f32 = 8.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragOutcome {
    NoOp,
    Reordered(Vec<Pin>),
}

#[derive(Debug, Clone, PartialEq)]
struct PendingPress {
    key: CompositeKey,
    origin: (f32, f32),
    width: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DragCoordinator {
    pending: Option<PendingPress>,
    active: Option<CompositeKey>,
    over: Option<CompositeKey>,
    overlay_width: Option<f32>,
}

impl DragCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_id(&self) -> Option<&CompositeKey> {
        self.active.as_ref()
    }

    pub fn over_id(&self) -> Option<&CompositeKey> {
        self.over.as_ref()
    }

    /// On-screen width of the dragged card, captured at drag start.
    pub fn overlay_width(&self) -> Option<f32> {
        self.overlay_width
    }

    /// Idle -> Dragging. A start while already dragging replaces the source.
    pub fn on_drag_start(&mut self, key: CompositeKey, width: Option<f32>) {
        self.pending = None;
        self.active = Some(key);
        self.over = None;
        self.overlay_width = width;
    }

    /// Track whatever card is under the pointer. Ignored when idle.
    pub fn on_drag_over(&mut self, key: Option<CompositeKey>) {
        if self.active.is_some() {
            self.over = key;
        }
    }

    /// Dragging -> Idle. Swaps source and target in `pins` when both are
    /// present and distinct.
    pub fn on_drag_end(&mut self, target: Option<CompositeKey>, pins: &[Pin]) -> DragOutcome {
        let source = self.active.take();
        self.reset();
        match (source, target) {
            (Some(source), Some(target)) => swap_pins(pins, &source, &target)
                .map(DragOutcome::Reordered)
                .unwrap_or(DragOutcome::NoOp),
            _ => DragOutcome::NoOp,
        }
    }

    pub fn cancel(&mut self) {
        self.reset();
    }

    /// Pointer press on a card. Nothing is dragged until the pointer travels
    /// past [`POINTER_ACTIVATION_DISTANCE`].
    pub fn pointer_down(&mut self, key: CompositeKey, x: f32, y: f32, width: Option<f32>) {
        if self.active.is_some() {
            return;
        }
        self.pending = Some(PendingPress {
            key,
            origin: (x, y),
            width,
        });
    }

    pub fn pointer_move(&mut self, x: f32, y: f32, over: Option<CompositeKey>) {
        if let Some(press) = &self.pending {
            let (ox, oy) = press.origin;
            if (x - ox).hypot(y - oy) < POINTER_ACTIVATION_DISTANCE {
                return;
            }
            let press = press.clone();
            self.on_drag_start(press.key, press.width);
        }
        self.on_drag_over(over);
    }

    /// Release. A press that never activated is a click, not a drop.
    pub fn pointer_up(&mut self, over: Option<CompositeKey>, pins: &[Pin]) -> DragOutcome {
        if self.active.is_none() {
            self.reset();
            return DragOutcome::NoOp;
        }
        self.on_drag_end(over, pins)
    }

    /// Keyboard pick-up activates immediately.
    pub fn key_pick_up(&mut self, key: CompositeKey, width: Option<f32>) {
        self.on_drag_start(key, width);
    }

    /// Keyboard drop onto the current `over` target.
    pub fn key_drop(&mut self, pins: &[Pin]) -> DragOutcome {
        let target = self.over.clone();
        self.on_drag_end(target, pins)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.active = None;
        self.over = None;
        self.overlay_width = None;
    }
}

/// Exchange the positions of `source` and `target`. `None` when they are the
/// same card or either is not in the list.
pub fn swap_pins(pins: &[Pin], source: &CompositeKey, target: &CompositeKey) -> Option<Vec<Pin>> {
    if source == target {
        return None;
    }
    let from = pins.iter().position(|p| &p.key() == source)?;
    let to = pins.iter().position(|p| &p.key() == target)?;
    let mut out = pins.to_vec();
    out.swap(from, to);
    Some(out)
}
