use std::time::Instant;

use crate::codec::Position;

/// Server-side events surfaced to playback and the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    FloorChangeUp,
    FloorChangeDown,
    CancelWalk,
}

impl EventKind {
    pub fn is_floor_change(&self) -> bool {
        matches!(self, EventKind::FloorChangeUp | EventKind::FloorChangeDown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::FloorChangeUp => "floor_change_up",
            EventKind::FloorChangeDown => "floor_change_down",
            EventKind::CancelWalk => "cancel_walk",
        }
    }
}

/// One entry in the world model's event ring.
#[derive(Debug, Clone, Copy)]
pub struct ServerEvent {
    pub at: Instant,
    pub kind: EventKind,
    /// Player position when the event was observed (post-change for
    /// floor changes).
    pub pos: Position,
}
