//! Read-only status rendering: chat status replies and heartbeat log lines.

use crate::duration::format_duration;
use crate::types::{DoorState, Timestamp};

/// Reply sent for any chat command other than `status`.
pub const UNRECOGNIZED_COMMAND_REPLY: &str =
    "I don't understand that command. Valid commands are: status";

/// Point-in-time view of one door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorSnapshot {
    pub name: String,
    pub state: DoorState,
    pub last_transition: Timestamp,
    /// Escalation cursor (index of the next pending rule).
    pub cursor: usize,
}

impl DoorSnapshot {
    /// Whole seconds in the current state as of `now`, clamped at zero.
    pub fn seconds_in_state(&self, now: Timestamp) -> u64 {
        u64::try_from((now - self.last_transition).num_seconds()).unwrap_or(0)
    }

    /// `"open (5 minutes)"`.
    pub fn describe(&self, now: Timestamp) -> String {
        format!("{} ({})", self.state, format_duration(self.seconds_in_state(now)))
    }
}

/// Map of door name to `"state (duration)"`, in configuration order.
pub fn status_entries(doors: &[DoorSnapshot], now: Timestamp) -> Vec<(String, String)> {
    doors
        .iter()
        .map(|d| (d.name.clone(), d.describe(now)))
        .collect()
}

/// One-line status reply: `"Left: open (5 minutes) / Right: closed (2 hours)"`.
pub fn status_report(doors: &[DoorSnapshot], now: Timestamp) -> String {
    status_entries(doors, now)
        .into_iter()
        .map(|(name, description)| format!("{name}: {description}"))
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Answer a chat command. Only `status` (any case) is understood.
pub fn respond_to_command(command: &str, doors: &[DoorSnapshot], now: Timestamp) -> String {
    if command.trim().eq_ignore_ascii_case("status") {
        status_report(doors, now)
    } else {
        UNRECOGNIZED_COMMAND_REPLY.to_string()
    }
}

/// Periodic heartbeat: `"<health>, Left: open/1/42, Right: closed/0/900"`.
pub fn heartbeat_line(host_health: &str, doors: &[DoorSnapshot], now: Timestamp) -> String {
    let mut line = host_health.to_string();
    for d in doors {
        line.push_str(&format!(
            ", {}: {}/{}/{}",
            d.name,
            d.state,
            d.cursor,
            d.seconds_in_state(now)
        ));
    }
    line
}
