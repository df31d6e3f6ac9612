//! Persistent XMPP session over WebSocket.
//!
//! The session serves two purposes: it is the `jabber:` notification
//! channel, and it is the surface through which authorized users ask for
//! door status. [`spawn`] starts the session task and returns a
//! [`JabberHandle`] for sending; inbound chat commands are answered by a
//! [`CommandResponder`] supplied by the caller.

pub mod session;
pub mod stanza;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::env_nonempty;

pub use session::ReconnectConfig;
pub use stanza::{bare_jid, Jid};

/// Resource bound when `JABBER_ID` carries none.
pub const DEFAULT_RESOURCE: &str = "doorwatch";

/// Outgoing queue depth. Sends wait when it is full.
const OUTGOING_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JabberError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Server closed the stream")]
    Closed,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// JabberConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JabberConfig {
    pub jid: Jid,
    pub password: String,
    /// RFC 7395 endpoint, e.g. `wss://xmpp.example.com:5443/ws`.
    pub ws_url: String,
    /// Bare JIDs allowed to query status.
    pub authorized_ids: Vec<String>,
}

impl JabberConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if the id, password or endpoint is missing, or the id
    /// is not a valid JID.
    ///
    /// | Variable               | Required | Default |
    /// |------------------------|----------|---------|
    /// | `JABBER_ID`            | yes      |         |
    /// | `JABBER_PASSWORD`      | yes      |         |
    /// | `JABBER_WS_URL`        | yes      |         |
    /// | `JABBER_AUTHORIZED_IDS`| no       | empty   |
    pub fn from_env() -> Option<Self> {
        let raw_id = env_nonempty("JABBER_ID")?;
        let Some(jid) = Jid::parse(&raw_id) else {
            tracing::warn!(jabber_id = %raw_id, "JABBER_ID is not a valid JID, jabber disabled");
            return None;
        };
        Some(Self {
            jid,
            password: env_nonempty("JABBER_PASSWORD")?,
            ws_url: env_nonempty("JABBER_WS_URL")?,
            authorized_ids: env_nonempty("JABBER_AUTHORIZED_IDS")
                .map(|v| parse_id_list(&v))
                .unwrap_or_default(),
        })
    }

    pub fn resource(&self) -> &str {
        self.jid.resource.as_deref().unwrap_or(DEFAULT_RESOURCE)
    }
}

/// Comma-separated list of JIDs, reduced to bare form.
pub fn parse_id_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| bare_jid(s.trim()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// CommandResponder
// ---------------------------------------------------------------------------

/// Answers inbound chat messages.
pub trait CommandResponder: Send + Sync {
    /// `from` is the sender's full JID. Return `None` to stay silent.
    fn respond(&self, from: &str, body: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// JabberHandle / JabberChannel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: String,
    pub body: String,
}

/// Sending side of a running session.
#[derive(Debug, Clone)]
pub struct JabberHandle {
    outgoing: mpsc::Sender<OutgoingMessage>,
    connected: Arc<AtomicBool>,
}

impl JabberHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a message. Fails without queueing while the session is down.
    pub async fn send(&self, to: &str, body: &str) -> Result<(), DeliveryError> {
        if !self.is_connected() {
            return Err(DeliveryError::NotConnected("jabber"));
        }
        self.outgoing
            .send(OutgoingMessage {
                to: to.to_string(),
                body: body.to_string(),
            })
            .await
            .map_err(|_| DeliveryError::NotConnected("jabber"))
    }
}

/// The `jabber:` notification channel.
pub struct JabberChannel {
    handle: Option<JabberHandle>,
}

impl JabberChannel {
    pub fn new(handle: Option<JabberHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl NotificationChannel for JabberChannel {
    fn name(&self) -> &'static str {
        "jabber"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let handle = self.handle.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "jabber",
            reason: "JABBER_ID, JABBER_PASSWORD or JABBER_WS_URL not set",
        })?;
        tracing::info!(to = %recipient.address, body = %alert.body, "Sending jabber message");
        handle.send(&recipient.address, &alert.body).await
    }
}

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

/// Start the session task. It connects, answers commands and reconnects
/// with backoff until `cancel` fires, then closes the stream.
pub fn spawn(
    config: JabberConfig,
    responder: Arc<dyn CommandResponder>,
    cancel: CancellationToken,
) -> (JabberHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(OUTGOING_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));
    let handle = JabberHandle {
        outgoing: tx,
        connected: Arc::clone(&connected),
    };
    let task = tokio::spawn(session::run(
        config,
        ReconnectConfig::default(),
        responder,
        rx,
        connected,
        cancel,
    ));
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use doorwatch_core::{AlertKind, DoorState, Scheme};

    fn alert() -> AlertContext {
        AlertContext {
            door: "Garage".into(),
            kind: AlertKind::Escalation,
            state: DoorState::Open,
            duration_secs: 60,
            subject: "Garage".into(),
            body: "Garage has been open for 60 seconds!".into(),
        }
    }

    fn recipient() -> RecipientRef {
        RecipientRef {
            scheme: Scheme::Jabber,
            address: "alice@example.com".into(),
        }
    }

    #[test]
    fn id_list_is_trimmed_and_bare() {
        assert_eq!(
            parse_id_list(" alice@example.com/phone , bob@example.com,,"),
            vec!["alice@example.com".to_string(), "bob@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn unconfigured_channel_reports_not_configured() {
        let channel = JabberChannel::new(None);
        assert_matches!(
            channel.send(&recipient(), &alert()).await,
            Err(DeliveryError::NotConfigured { channel: "jabber", .. })
        );
    }

    #[tokio::test]
    async fn disconnected_session_skips_send() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = JabberHandle {
            outgoing: tx,
            connected: Arc::new(AtomicBool::new(false)),
        };
        let channel = JabberChannel::new(Some(handle));
        assert_matches!(
            channel.send(&recipient(), &alert()).await,
            Err(DeliveryError::NotConnected("jabber"))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connected_session_queues_message() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = JabberHandle {
            outgoing: tx,
            connected: Arc::new(AtomicBool::new(true)),
        };
        JabberChannel::new(Some(handle))
            .send(&recipient(), &alert())
            .await
            .unwrap();
        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.to, "alice@example.com");
        assert_eq!(queued.body, "Garage has been open for 60 seconds!");
    }
}
