//! Per-slot resource lifecycle.
//!
//! ```text
//! Empty --Uploaded--> BufferReady --Bound--> Drawable --Invalidated-->
//!   MarkedForRetirement --Unbound--> DrawableRetired --Reclaimed--> Empty
//! ```
//!
//! The producer drives `Uploaded`, `Invalidated` and `Reclaimed` (it owns
//! buffers); the consumer drives `Bound` and `Unbound` (it owns drawables).

use std::fmt;

/// Lifecycle state of one slot within one generation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Empty = 0,
    BufferReady = 1,
    Drawable = 2,
    MarkedForRetirement = 4,
    DrawableRetired = 8,
}

/// Something that happened to a slot's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotEvent {
    /// Producer uploaded a new buffer.
    Uploaded,
    /// Consumer built a drawable from the buffer.
    Bound,
    /// Producer flagged the drawable for teardown.
    Invalidated,
    /// Consumer destroyed the drawable.
    Unbound,
    /// Producer released the buffer.
    Reclaimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal slot transition: {event:?} while {from:?}")]
pub struct TransitionError {
    pub from: SlotStatus,
    pub event: SlotEvent,
}

impl SlotStatus {
    /// The state machine. Anything not listed is rejected.
    pub fn next(self, event: SlotEvent) -> Result<SlotStatus, TransitionError> {
        use SlotEvent::*;
        use SlotStatus::*;

        match (self, event) {
            (Empty, Uploaded) => Ok(BufferReady),
            (BufferReady, Bound) => Ok(Drawable),
            (Drawable, Invalidated) => Ok(MarkedForRetirement),
            (MarkedForRetirement, Unbound) => Ok(DrawableRetired),
            (DrawableRetired, Reclaimed) => Ok(Empty),
            (from, event) => Err(TransitionError { from, event }),
        }
    }

    pub fn from_raw(raw: u8) -> Option<SlotStatus> {
        match raw {
            0 => Some(SlotStatus::Empty),
            1 => Some(SlotStatus::BufferReady),
            2 => Some(SlotStatus::Drawable),
            4 => Some(SlotStatus::MarkedForRetirement),
            8 => Some(SlotStatus::DrawableRetired),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Whether a buffer handle is attached in this state.
    pub fn holds_buffer(self) -> bool {
        self != SlotStatus::Empty
    }

    /// Whether a drawable handle is attached in this state.
    pub fn holds_drawable(self) -> bool {
        matches!(
            self,
            SlotStatus::Drawable | SlotStatus::MarkedForRetirement
        )
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotStatus::Empty => "empty",
            SlotStatus::BufferReady => "buffer-ready",
            SlotStatus::Drawable => "drawable",
            SlotStatus::MarkedForRetirement => "marked-for-retirement",
            SlotStatus::DrawableRetired => "drawable-retired",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [SlotStatus; 5] = [
        SlotStatus::Empty,
        SlotStatus::BufferReady,
        SlotStatus::Drawable,
        SlotStatus::MarkedForRetirement,
        SlotStatus::DrawableRetired,
    ];

    const ALL_EVENTS: [SlotEvent; 5] = [
        SlotEvent::Uploaded,
        SlotEvent::Bound,
        SlotEvent::Invalidated,
        SlotEvent::Unbound,
        SlotEvent::Reclaimed,
    ];

    #[test]
    fn full_cycle_returns_to_empty() {
        let mut status = SlotStatus::Empty;
        for event in ALL_EVENTS {
            status = status.next(event).unwrap();
        }
        assert_eq!(status, SlotStatus::Empty);
    }

    #[test]
    fn exactly_one_event_per_status() {
        for status in ALL_STATUSES {
            let legal = ALL_EVENTS
                .iter()
                .filter(|e| status.next(**e).is_ok())
                .count();
            assert_eq!(legal, 1, "{status} should accept exactly one event");
        }
    }

    #[test]
    fn rejected_transition_reports_context() {
        let err = SlotStatus::Empty.next(SlotEvent::Bound).unwrap_err();
        assert_eq!(err.from, SlotStatus::Empty);
        assert_eq!(err.event, SlotEvent::Bound);
        assert!(err.to_string().contains("Bound"));
    }

    #[test]
    fn raw_round_trip() {
        for status in ALL_STATUSES {
            assert_eq!(SlotStatus::from_raw(status.raw()), Some(status));
        }
        assert_eq!(SlotStatus::from_raw(3), None);
    }

    #[test]
    fn handle_ownership_by_state() {
        assert!(!SlotStatus::Empty.holds_buffer());
        assert!(SlotStatus::DrawableRetired.holds_buffer());
        assert!(!SlotStatus::DrawableRetired.holds_drawable());
        assert!(SlotStatus::MarkedForRetirement.holds_drawable());
    }
}
