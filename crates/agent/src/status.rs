//! Read-only status queries over the latest door snapshots.

use chrono::Utc;
use doorwatch_core::status::{respond_to_command, status_entries, DoorSnapshot};
use doorwatch_core::Timestamp;
use doorwatch_events::jabber::{bare_jid, CommandResponder};
use tokio::sync::watch;

/// Answers `status` commands from allow-listed chat users.
///
/// Reads the snapshot the poll loop published after its last tick, so an
/// answer may lag the sensors by up to one tick.
pub struct StatusQueryService {
    doors: watch::Receiver<Vec<DoorSnapshot>>,
    authorized: Vec<String>,
}

impl StatusQueryService {
    /// `authorized` holds bare JIDs; comparison ignores case and resource.
    pub fn new(doors: watch::Receiver<Vec<DoorSnapshot>>, authorized: Vec<String>) -> Self {
        Self { doors, authorized }
    }

    /// Door name to `"state (duration)"`, in configuration order.
    pub fn query(&self, now: Timestamp) -> Vec<(String, String)> {
        status_entries(&self.doors.borrow(), now)
    }

    pub fn is_authorized(&self, from: &str) -> bool {
        let sender = bare_jid(from);
        self.authorized.iter().any(|id| id.eq_ignore_ascii_case(sender))
    }

    /// Reply to `body` from `from`, or `None` if the sender is not allowed.
    pub fn handle_command(&self, from: &str, body: &str, now: Timestamp) -> Option<String> {
        if !self.is_authorized(from) {
            tracing::info!(from, body, "Ignoring command from unauthorized sender");
            return None;
        }
        let reply = respond_to_command(body, &self.doors.borrow(), now);
        tracing::info!(from, command = body.trim(), reply = %reply, "Answered chat command");
        Some(reply)
    }
}

impl CommandResponder for StatusQueryService {
    fn respond(&self, from: &str, body: &str) -> Option<String> {
        self.handle_command(from, body, Utc::now())
    }
}
