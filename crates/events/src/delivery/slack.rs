//! Slack messages posted by a bot user. The recipient address is a channel
//! id or name.

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use serde::Deserialize;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
}

impl SlackConfig {
    /// Returns `None` unless `SLACK_BOT_TOKEN` is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            bot_token: env_nonempty("SLACK_BOT_TOKEN")?,
        })
    }
}

/// Slack answers HTTP 200 even on failure; the body says what happened.
#[derive(Debug, Deserialize)]
pub struct SlackResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlackResponse {
    pub fn into_result(self) -> Result<(), DeliveryError> {
        if self.ok {
            Ok(())
        } else {
            Err(DeliveryError::Api {
                channel: "slack",
                message: self.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

pub struct SlackChannel {
    client: reqwest::Client,
    config: Option<SlackConfig>,
}

impl SlackChannel {
    pub fn new(client: reqwest::Client, config: Option<SlackConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "slack",
            reason: "SLACK_BOT_TOKEN not set",
        })?;

        tracing::info!(channel_id = %recipient.address, state = %alert.state, body = %alert.body, "Sending Slack message");
        let response = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&config.bot_token)
            .json(&serde_json::json!({ "channel": recipient.address, "text": alert.body }))
            .send()
            .await?;
        let reply: SlackResponse = check_status("slack", response).await?.json().await?;
        reply.into_result()
    }
}
