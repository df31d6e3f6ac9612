//! Per-door state bookkeeping.

use chrono::Duration;

use crate::types::{DoorState, Timestamp};

/// Result of feeding one sensor reading to a [`StateTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Whether the reading differs from the previously held state.
    pub changed: bool,
    /// On a transition: how long the *previous* state was held.
    /// Otherwise: how long the current state has been held so far.
    pub duration: Duration,
}

/// Current state of one door and when it last changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTracker {
    state: DoorState,
    last_transition: Timestamp,
}

impl StateTracker {
    /// Seed the tracker from the first reading. Time in state counts from `now`.
    pub fn new(initial: DoorState, now: Timestamp) -> Self {
        Self {
            state: initial,
            last_transition: now,
        }
    }

    pub fn state(&self) -> DoorState {
        self.state
    }

    pub fn last_transition(&self) -> Timestamp {
        self.last_transition
    }

    /// Time spent in the current state as of `now`, clamped at zero.
    pub fn time_in_state(&self, now: Timestamp) -> Duration {
        (now - self.last_transition).max(Duration::zero())
    }

    /// Record a reading taken at `now`.
    pub fn observe(&mut self, reading: DoorState, now: Timestamp) -> TransitionOutcome {
        let duration = self.time_in_state(now);

        if reading != self.state {
            self.state = reading;
            self.last_transition = now;
            return TransitionOutcome {
                changed: true,
                duration,
            };
        }

        TransitionOutcome {
            changed: false,
            duration,
        }
    }
}
