//! Recipient routing and background dispatch.
//!
//! [`RecipientDispatcher`] turns a recipient identifier into a channel send
//! and swallows every failure after logging it: a failed send is a missed
//! notification, never an error for the caller. [`DispatchPool`] runs those
//! dispatches on background tasks so a slow channel cannot delay the poll
//! loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use doorwatch_core::{RecipientRef, Scheme};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::channel::{AlertContext, NotificationChannel};

/// Marker that identifies a return-to-normal notice in the message body.
const RESET_MARKER: &str = "is now";

/// What happened to a single dispatch. Returned for logging and tests;
/// callers are not expected to act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Intentionally not sent (light toggles are skipped for resets).
    Suppressed,
    /// The identifier did not parse.
    Rejected,
    /// No channel is registered for the scheme.
    NoChannel,
    /// The channel reported an error.
    Failed,
}

// ---------------------------------------------------------------------------
// RecipientDispatcher
// ---------------------------------------------------------------------------

/// Routes alerts to channels by recipient scheme.
#[derive(Default)]
pub struct RecipientDispatcher {
    channels: HashMap<Scheme, Arc<dyn NotificationChannel>>,
}

impl RecipientDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `channel` as the handler for `schemes`.
    pub fn with_channel(mut self, schemes: &[Scheme], channel: Arc<dyn NotificationChannel>) -> Self {
        for scheme in schemes {
            self.channels.insert(*scheme, Arc::clone(&channel));
        }
        self
    }

    /// Schemes with a registered channel.
    pub fn registered_schemes(&self) -> Vec<Scheme> {
        let mut schemes: Vec<Scheme> = self.channels.keys().copied().collect();
        schemes.sort_by_key(|s| s.keyword());
        schemes
    }

    /// Deliver `alert` to one recipient identifier. Never fails.
    pub async fn dispatch(&self, recipient: &str, alert: &AlertContext) -> DispatchOutcome {
        let parsed = match RecipientRef::parse(recipient) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(recipient, error = %e, "Unrecognized recipient, nothing sent");
                return DispatchOutcome::Rejected;
            }
        };

        if parsed.scheme.is_light() && alert.body.contains(RESET_MARKER) {
            tracing::info!(recipient, door = %alert.door, "Skipping light toggle for reset notice");
            return DispatchOutcome::Suppressed;
        }

        let Some(channel) = self.channels.get(&parsed.scheme) else {
            tracing::error!(recipient, scheme = %parsed.scheme, "No channel registered for scheme");
            return DispatchOutcome::NoChannel;
        };

        match channel.send(&parsed, alert).await {
            Ok(()) => {
                tracing::info!(
                    channel = channel.name(),
                    recipient,
                    door = %alert.door,
                    "Alert sent"
                );
                DispatchOutcome::Sent
            }
            Err(e) => {
                tracing::error!(
                    channel = channel.name(),
                    recipient,
                    door = %alert.door,
                    error = %e,
                    "Alert delivery failed"
                );
                DispatchOutcome::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchPool
// ---------------------------------------------------------------------------

/// Default number of sends allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default upper bound on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Background executor for dispatches with bounded concurrency.
///
/// Each submitted dispatch runs on its own task, waits for one of
/// `concurrency` permits, and is abandoned (logged) if it exceeds the
/// send timeout. Ordering between sends is not preserved.
pub struct DispatchPool {
    dispatcher: Arc<RecipientDispatcher>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    send_timeout: Duration,
}

impl DispatchPool {
    pub fn new(dispatcher: Arc<RecipientDispatcher>, concurrency: usize, send_timeout: Duration) -> Self {
        Self {
            dispatcher,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tracker: TaskTracker::new(),
            send_timeout,
        }
    }

    /// Queue one dispatch. Must be called from within a Tokio runtime.
    ///
    /// Submissions after [`shutdown`](Self::shutdown) has started are dropped.
    pub fn submit(&self, recipient: String, alert: AlertContext) {
        if self.tracker.is_closed() {
            tracing::warn!(recipient = %recipient, door = %alert.door, "Dispatch pool closed, alert dropped");
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let permits = Arc::clone(&self.permits);
        let send_timeout = self.send_timeout;

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if tokio::time::timeout(send_timeout, dispatcher.dispatch(&recipient, &alert))
                .await
                .is_err()
            {
                tracing::error!(
                    recipient = %recipient,
                    door = %alert.door,
                    timeout_secs = send_timeout.as_secs(),
                    "Alert delivery timed out"
                );
            }
        });
    }

    /// Number of dispatches still running or waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every submitted dispatch has finished, without closing
    /// the pool. Test support: polls, so production code uses `shutdown`.
    #[doc(hidden)]
    pub async fn wait_idle(&self) {
        while !self.tracker.is_empty() {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop accepting work and wait up to `grace` for in-flight sends.
    ///
    /// Returns `true` if everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, grace_secs = grace.as_secs(), "Waiting for in-flight alerts");
        }
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
