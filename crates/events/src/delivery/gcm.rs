//! Topic push notifications through the legacy FCM HTTP endpoint.

use async_trait::async_trait;
use doorwatch_core::{DoorState, RecipientRef};

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

#[derive(Debug, Clone)]
pub struct GcmConfig {
    /// Legacy server key.
    pub key: String,
    /// Topic path, e.g. `/topics/garage`.
    pub topic: String,
}

impl GcmConfig {
    /// Returns `None` unless both `GCM_KEY` and `GCM_TOPIC` are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            key: env_nonempty("GCM_KEY")?,
            topic: env_nonempty("GCM_TOPIC")?,
        })
    }
}

/// `{"to": topic, "data": {"message": body, "status": "1"|"0"}}`.
pub fn push_payload(topic: &str, state: DoorState, body: &str) -> serde_json::Value {
    let status = if state == DoorState::Open { "1" } else { "0" };
    serde_json::json!({
        "to": topic,
        "data": { "message": body, "status": status },
    })
}

pub struct GcmChannel {
    client: reqwest::Client,
    config: Option<GcmConfig>,
}

impl GcmChannel {
    pub fn new(client: reqwest::Client, config: Option<GcmConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationChannel for GcmChannel {
    fn name(&self) -> &'static str {
        "gcm"
    }

    async fn send(&self, _recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "gcm",
            reason: "GCM_KEY or GCM_TOPIC not set",
        })?;

        tracing::info!(topic = %config.topic, state = %alert.state, body = %alert.body, "Sending push");
        let response = self
            .client
            .post(SEND_URL)
            .header(reqwest::header::AUTHORIZATION, format!("key={}", config.key))
            .json(&push_payload(&config.topic, alert.state, &alert.body))
            .send()
            .await?;
        check_status("gcm", response).await?;
        Ok(())
    }
}
