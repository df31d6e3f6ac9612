//! IFTTT Maker (Webhooks) triggers. The recipient address is the event name.

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use serde::Serialize;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const MAKER_BASE: &str = "https://maker.ifttt.com/trigger";

#[derive(Debug, Clone)]
pub struct IftttConfig {
    pub key: String,
}

impl IftttConfig {
    /// Returns `None` unless `IFTTT_KEY` is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            key: env_nonempty("IFTTT_KEY")?,
        })
    }
}

/// The three ingredient values a Maker trigger accepts.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TriggerValues {
    pub value1: String,
    pub value2: String,
    pub value3: String,
}

impl From<&AlertContext> for TriggerValues {
    fn from(alert: &AlertContext) -> Self {
        Self {
            value1: alert.subject.clone(),
            value2: alert.state.to_string(),
            value3: alert.duration_secs.to_string(),
        }
    }
}

pub fn trigger_url(event: &str, key: &str) -> String {
    format!("{MAKER_BASE}/{event}/with/key/{key}")
}

pub struct IftttChannel {
    client: reqwest::Client,
    config: Option<IftttConfig>,
}

impl IftttChannel {
    pub fn new(client: reqwest::Client, config: Option<IftttConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationChannel for IftttChannel {
    fn name(&self) -> &'static str {
        "ifttt"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "ifttt",
            reason: "IFTTT_KEY not set",
        })?;

        let values = TriggerValues::from(alert);
        tracing::info!(
            event = %recipient.address,
            value1 = %values.value1,
            value2 = %values.value2,
            value3 = %values.value3,
            "Sending IFTTT trigger"
        );
        let response = self
            .client
            .post(trigger_url(&recipient.address, &config.key))
            .json(&values)
            .send()
            .await?;
        check_status("ifttt", response).await?;
        Ok(())
    }
}
