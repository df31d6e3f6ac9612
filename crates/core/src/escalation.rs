//! Escalation engine: decides which alert (if any) fires for a door on a tick.
//!
//! Each door owns an [`EscalationCursor`] pointing at its next pending
//! rule. A rule fires when the door has held the rule's state for longer
//! than the rule's threshold; the cursor then advances by exactly one.
//! When the door changes state the cursor returns to zero, and if any rule
//! had fired a reset notice goes to the recipients of the last fired rule.
//!
//! Only one rule can fire per tick. If a long poll gap pushes the time in
//! state past several thresholds at once, the later rules wait for later
//! ticks and are never fired for the skipped window (no catch-up).

use chrono::Duration;

use crate::door::DoorConfig;
use crate::tracker::TransitionOutcome;
use crate::types::DoorState;

/// Index of the next pending alert rule for one door.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationCursor {
    next_rule_index: usize,
}

impl EscalationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_rule_index(&self) -> usize {
        self.next_rule_index
    }
}

/// Whether a fired alert escalates or cancels an escalation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Escalation,
    Reset,
}

/// An alert that should be delivered to every listed recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredAlert {
    pub door: String,
    pub kind: AlertKind,
    /// Door state at the time the alert fired.
    pub state: DoorState,
    /// Whole seconds in `state`; always 0 for a reset.
    pub duration_secs: i64,
    pub subject: String,
    pub body: String,
    /// Index of the rule whose recipients are targeted.
    pub rule_index: usize,
    pub recipients: Vec<String>,
}

/// Stateless decision logic; all state lives in the caller's cursor.
pub struct EscalationEngine;

impl EscalationEngine {
    /// Evaluate one tick for a door.
    ///
    /// `state` is the door's state after the observation was recorded.
    /// Returns the reset notice (if the door just transitioned mid-chain)
    /// followed by at most one escalation.
    pub fn tick(
        door: &DoorConfig,
        cursor: &mut EscalationCursor,
        state: DoorState,
        observation: TransitionOutcome,
    ) -> Vec<FiredAlert> {
        let mut fired = Vec::new();

        let time_in_state = if observation.changed {
            if cursor.next_rule_index > 0 {
                let last = cursor.next_rule_index - 1;
                fired.push(FiredAlert {
                    door: door.name.clone(),
                    kind: AlertKind::Reset,
                    state,
                    duration_secs: 0,
                    subject: door.name.clone(),
                    body: format!("{} is now {}", door.name, state),
                    rule_index: last,
                    recipients: door.alerts[last].recipients.clone(),
                });
            }
            cursor.next_rule_index = 0;
            Duration::zero()
        } else {
            observation.duration
        };

        if let Some(rule) = door.alerts.get(cursor.next_rule_index) {
            if exceeds(time_in_state, rule.threshold_secs) && state == rule.state {
                let secs = time_in_state.num_seconds();
                fired.push(FiredAlert {
                    door: door.name.clone(),
                    kind: AlertKind::Escalation,
                    state,
                    duration_secs: secs,
                    subject: door.name.clone(),
                    body: format!("{} has been {} for {} seconds!", door.name, state, secs),
                    rule_index: cursor.next_rule_index,
                    recipients: rule.recipients.clone(),
                });
                cursor.next_rule_index += 1;
            }
        }

        fired
    }
}

/// Strict `elapsed > threshold` at millisecond resolution, saturating on huge thresholds.
fn exceeds(elapsed: Duration, threshold_secs: u64) -> bool {
    let threshold_ms = i64::try_from(threshold_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    elapsed.num_milliseconds() > threshold_ms
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::AlertRule;

    fn rule(state: DoorState, threshold_secs: u64, recipient: &str) -> AlertRule {
        AlertRule {
            state,
            threshold_secs,
            recipients: vec![recipient.to_string()],
        }
    }

    fn door(alerts: Vec<AlertRule>) -> DoorConfig {
        DoorConfig {
            name: "Garage".to_string(),
            pin: 15,
            alerts,
        }
    }

    fn steady(secs: i64) -> TransitionOutcome {
        TransitionOutcome {
            changed: false,
            duration: Duration::seconds(secs),
        }
    }

    fn transition(prior_secs: i64) -> TransitionOutcome {
        TransitionOutcome {
            changed: true,
            duration: Duration::seconds(prior_secs),
        }
    }

    #[test]
    fn nothing_fires_below_threshold() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(10)).is_empty());
        assert_eq!(cursor.next_rule_index(), 0);
    }

    #[test]
    fn fires_when_threshold_strictly_exceeded() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(11));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::Escalation);
        assert_eq!(fired[0].body, "Garage has been open for 11 seconds!");
        assert_eq!(fired[0].subject, "Garage");
        assert_eq!(fired[0].recipients, vec!["sms:+1".to_string()]);
        assert_eq!(cursor.next_rule_index(), 1);
    }

    #[test]
    fn sub_second_overshoot_fires() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        let obs = TransitionOutcome {
            changed: false,
            duration: Duration::milliseconds(10_500),
        };
        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Open, obs);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].duration_secs, 10);
    }

    #[test]
    fn wrong_state_does_not_fire() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Closed, steady(500)).is_empty());
    }

    #[test]
    fn at_most_one_rule_per_tick() {
        let d = door(vec![
            rule(DoorState::Open, 10, "sms:+1"),
            rule(DoorState::Open, 20, "sms:+2"),
        ]);
        let mut cursor = EscalationCursor::new();
        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(25));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_index, 0);
        assert_eq!(cursor.next_rule_index(), 1);

        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(26));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].rule_index, 1);
        assert_eq!(cursor.next_rule_index(), 2);
    }

    #[test]
    fn exhausted_chain_stays_quiet() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(11));
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(5000)).is_empty());
        assert_eq!(cursor.next_rule_index(), 1);
    }

    #[test]
    fn transition_without_fired_rule_sends_no_reset() {
        let d = door(vec![rule(DoorState::Open, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Open, transition(300));
        assert!(fired.is_empty());
        assert_eq!(cursor.next_rule_index(), 0);
    }

    #[test]
    fn transition_mid_chain_resets_using_last_fired_rule() {
        let d = door(vec![
            rule(DoorState::Open, 10, "sms:+1"),
            rule(DoorState::Open, 20, "email:b@example.com"),
            rule(DoorState::Open, 30, "tweet"),
        ]);
        let mut cursor = EscalationCursor::new();
        EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(11));
        EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(21));
        assert_eq!(cursor.next_rule_index(), 2);

        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Closed, transition(25));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AlertKind::Reset);
        assert_eq!(fired[0].body, "Garage is now closed");
        assert_eq!(fired[0].duration_secs, 0);
        assert_eq!(fired[0].rule_index, 1);
        assert_eq!(fired[0].recipients, vec!["email:b@example.com".to_string()]);
        assert_eq!(cursor.next_rule_index(), 0);
    }

    #[test]
    fn transition_ignores_prior_duration_for_thresholds() {
        // Closed-state rule must not fire just because the door was open a long time.
        let d = door(vec![rule(DoorState::Closed, 10, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        let fired = EscalationEngine::tick(&d, &mut cursor, DoorState::Closed, transition(1000));
        assert!(fired.is_empty());
    }

    #[test]
    fn huge_threshold_does_not_overflow() {
        let d = door(vec![rule(DoorState::Open, u64::MAX, "sms:+1")]);
        let mut cursor = EscalationCursor::new();
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(86_400 * 365)).is_empty());
    }

    #[test]
    fn door_without_rules_never_fires() {
        let d = door(Vec::new());
        let mut cursor = EscalationCursor::new();
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Open, steady(1_000_000)).is_empty());
        assert!(EscalationEngine::tick(&d, &mut cursor, DoorState::Closed, transition(5)).is_empty());
    }
}
