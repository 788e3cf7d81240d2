//! Status transition detection.

use chrono::{DateTime, Utc};

use crate::db::{Status, TransitionEvent};

/// Decides whether a new observation changes a target's status.
///
/// The "old" status must always come from the stored current state so
/// that a transition is recorded exactly once.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionDetector {
    /// Emit an event for the first check after registration (CHECKING -> X).
    pub fire_on_first_check: bool,
}

impl TransitionDetector {
    pub fn new(fire_on_first_check: bool) -> Self {
        Self { fire_on_first_check }
    }

    pub fn detect(
        &self,
        target_name: &str,
        old_status: Status,
        new_status: Status,
        at: DateTime<Utc>,
    ) -> Option<TransitionEvent> {
        if old_status == new_status {
            return None;
        }
        if !old_status.is_observed() && !self.fire_on_first_check {
            return None;
        }
        Some(TransitionEvent {
            target_name: target_name.to_string(),
            old_status,
            new_status,
            changed_at: at,
        })
    }
}
