//! The uniform send capability shared by every notification channel.

use async_trait::async_trait;
use doorwatch_core::{AlertKind, DoorState, FiredAlert, RecipientRef};

/// What a channel needs to know about the alert being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertContext {
    pub door: String,
    pub kind: AlertKind,
    pub state: DoorState,
    /// Whole seconds the door has held `state` (0 for a reset).
    pub duration_secs: i64,
    pub subject: String,
    pub body: String,
}

impl From<&FiredAlert> for AlertContext {
    fn from(alert: &FiredAlert) -> Self {
        Self {
            door: alert.door.clone(),
            kind: alert.kind,
            state: alert.state,
            duration_secs: alert.duration_secs,
            subject: alert.subject.clone(),
            body: alert.body.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for a single failed send.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Credentials or addresses for the channel are missing.
    #[error("{channel} not configured: {reason}")]
    NotConfigured {
        channel: &'static str,
        reason: &'static str,
    },

    /// The channel needs a live session and does not have one.
    #[error("{0} session is not connected")]
    NotConnected(&'static str),

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote service returned a non-2xx status code.
    #[error("{channel} returned HTTP {status}: {body}")]
    HttpStatus {
        channel: &'static str,
        status: u16,
        body: String,
    },

    /// The remote service accepted the request but reported a failure.
    #[error("{channel} API error: {message}")]
    Api {
        channel: &'static str,
        message: String,
    },

    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    EmailBuild(String),
}

// ---------------------------------------------------------------------------
// NotificationChannel
// ---------------------------------------------------------------------------

/// A notification delivery mechanism.
///
/// Implementations check their own configuration on every call and
/// report a missing credential as [`DeliveryError::NotConfigured`], so a
/// channel that is configured later (e.g. after a restart) needs no
/// special handling.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one alert to one recipient.
    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError>;
}
