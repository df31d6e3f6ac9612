//! Email alerts via SMTP.
//!
//! [`EmailChannel`] wraps the `lettre` async SMTP transport to send
//! plain-text alert emails. If `EMAIL_FROM` is not set,
//! [`EmailConfig::from_env`] returns `None` and every send reports the
//! channel as not configured.

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::env_nonempty;

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

const DEFAULT_SMTP_HOST: &str = "localhost";
const DEFAULT_SMTP_PORT: u16 = 25;
/// `1` is high priority; `3` normal; `5` low.
const DEFAULT_PRIORITY: &str = "1";

/// Configuration for the SMTP email channel.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Use STARTTLS instead of a plain connection.
    pub starttls: bool,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Value of the `X-Priority` header.
    pub priority: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable         | Required | Default     |
    /// |------------------|----------|-------------|
    /// | `EMAIL_FROM`     | yes      |             |
    /// | `SMTP_HOST`      | no       | `localhost` |
    /// | `SMTP_PORT`      | no       | `25`        |
    /// | `SMTP_STARTTLS`  | no       | `false`     |
    /// | `SMTP_USER`      | no       |             |
    /// | `SMTP_PASSWORD`  | no       |             |
    /// | `EMAIL_PRIORITY` | no       | `1`         |
    pub fn from_env() -> Option<Self> {
        let from_address = env_nonempty("EMAIL_FROM")?;
        Some(Self {
            smtp_host: env_nonempty("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port: env_nonempty("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            starttls: env_nonempty("SMTP_STARTTLS")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            from_address,
            priority: env_nonempty("EMAIL_PRIORITY").unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
            smtp_user: env_nonempty("SMTP_USER"),
            smtp_password: env_nonempty("SMTP_PASSWORD"),
        })
    }

    /// SMTP login is attempted only when both halves are present.
    fn credentials(&self) -> Option<Credentials> {
        match (&self.smtp_user, &self.smtp_password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Assemble the alert email.
pub fn build_message(config: &EmailConfig, to: &str, alert: &AlertContext) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(config.from_address.parse()?)
        .to(to.parse()?)
        .subject(alert.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .raw_header(HeaderValue::new(
            HeaderName::new_from_ascii_str("X-Priority"),
            config.priority.clone(),
        ))
        .body(alert.body.clone())
        .map_err(|e| DeliveryError::EmailBuild(e.to_string()))
}

// ---------------------------------------------------------------------------
// EmailChannel
// ---------------------------------------------------------------------------

pub struct EmailChannel {
    config: Option<EmailConfig>,
}

impl EmailChannel {
    pub fn new(config: Option<EmailConfig>) -> Self {
        Self { config }
    }

    fn transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port);

        if let Some(credentials) = config.credentials() {
            builder = builder.credentials(credentials);
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "email",
            reason: "EMAIL_FROM not set",
        })?;

        tracing::info!(
            to = %recipient.address,
            subject = %alert.subject,
            body = %alert.body,
            "Sending email"
        );
        let email = build_message(config, &recipient.address, alert)?;
        Self::transport(config)?.send(email).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use doorwatch_core::{AlertKind, DoorState, Scheme};

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 25,
            starttls: false,
            from_address: "garage@example.com".into(),
            priority: "1".into(),
            smtp_user: None,
            smtp_password: None,
        }
    }

    fn alert() -> AlertContext {
        AlertContext {
            door: "Garage".into(),
            kind: AlertKind::Escalation,
            state: DoorState::Open,
            duration_secs: 600,
            subject: "Garage".into(),
            body: "Garage has been open for 600 seconds!".into(),
        }
    }

    #[test]
    fn message_carries_priority_and_subject() {
        let msg = build_message(&config(), "someone@example.com", &alert()).unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("X-Priority: 1"));
        assert!(raw.contains("Subject: Garage"));
        assert!(raw.contains("To: someone@example.com"));
        assert!(raw.contains("Garage has been open for 600 seconds!"));
    }

    #[test]
    fn bad_address_is_rejected() {
        let result = build_message(&config(), "not an address", &alert());
        assert_matches!(result, Err(DeliveryError::Address(_)));
    }

    #[test]
    fn credentials_need_user_and_password() {
        let mut cfg = config();
        cfg.smtp_user = Some("user".into());
        assert!(cfg.credentials().is_none());
        cfg.smtp_password = Some("pass".into());
        assert!(cfg.credentials().is_some());
    }

    #[tokio::test]
    async fn unconfigured_channel_reports_not_configured() {
        let channel = EmailChannel::new(None);
        let recipient = RecipientRef {
            scheme: Scheme::Email,
            address: "someone@example.com".into(),
        };
        let result = channel.send(&recipient, &alert()).await;
        assert_matches!(result, Err(DeliveryError::NotConfigured { channel: "email", .. }));
    }
}
