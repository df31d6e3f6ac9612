//! One monitored door: its configuration, state tracker and escalation cursor.

use crate::door::DoorConfig;
use crate::escalation::{EscalationCursor, EscalationEngine, FiredAlert};
use crate::status::DoorSnapshot;
use crate::tracker::{StateTracker, TransitionOutcome};
use crate::types::{DoorState, Timestamp};

/// Everything the poll loop keeps per door.
#[derive(Debug, Clone)]
pub struct DoorMonitor {
    config: DoorConfig,
    tracker: StateTracker,
    cursor: EscalationCursor,
}

impl DoorMonitor {
    /// Start monitoring from an initial reading. Nothing fires for the
    /// initial state; thresholds are measured from `now`.
    pub fn new(config: DoorConfig, initial: DoorState, now: Timestamp) -> Self {
        Self {
            config,
            tracker: StateTracker::new(initial, now),
            cursor: EscalationCursor::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DoorConfig {
        &self.config
    }

    pub fn cursor(&self) -> EscalationCursor {
        self.cursor
    }

    /// Record a reading and return the observation plus any alerts to deliver.
    pub fn observe(&mut self, reading: DoorState, now: Timestamp) -> (TransitionOutcome, Vec<FiredAlert>) {
        let outcome = self.tracker.observe(reading, now);
        let fired = EscalationEngine::tick(&self.config, &mut self.cursor, self.tracker.state(), outcome);
        (outcome, fired)
    }

    /// Point-in-time view for status queries and heartbeat lines.
    pub fn snapshot(&self) -> DoorSnapshot {
        DoorSnapshot {
            name: self.config.name.clone(),
            state: self.tracker.state(),
            last_transition: self.tracker.last_transition(),
            cursor: self.cursor.next_rule_index(),
        }
    }
}
