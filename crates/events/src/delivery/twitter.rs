//! Twitter status updates and direct messages (API v2).
//!
//! Both operations authenticate with an OAuth 2 user-context bearer token.
//! Every text is prefixed with the local time because Twitter rejects a
//! status identical to a recent one, and door alerts repeat a lot.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use doorwatch_core::duration::truncate;
use doorwatch_core::{RecipientRef, Scheme};
use serde::Deserialize;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const TWITTER_API_BASE: &str = "https://api.twitter.com/2";

/// Longest text posted, including the timestamp prefix.
pub const MAX_TWEET_CHARS: usize = 140;

#[derive(Debug, Clone)]
pub struct TwitterConfig {
    pub access_token: String,
}

impl TwitterConfig {
    /// Returns `None` unless `TWITTER_ACCESS_TOKEN` is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_token: env_nonempty("TWITTER_ACCESS_TOKEN")?,
        })
    }
}

/// `"2024-05-01 18:30:00: <body>"`, truncated to [`MAX_TWEET_CHARS`].
pub fn stamped_text(now: NaiveDateTime, body: &str) -> String {
    let text = format!("{}: {body}", now.format("%Y-%m-%d %H:%M:%S"));
    truncate(&text, MAX_TWEET_CHARS)
}

#[derive(Debug, Deserialize)]
struct UserLookup {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: String,
}

pub struct TwitterChannel {
    client: reqwest::Client,
    config: Option<TwitterConfig>,
}

impl TwitterChannel {
    pub fn new(client: reqwest::Client, config: Option<TwitterConfig>) -> Self {
        Self { client, config }
    }

    async fn post_status(&self, config: &TwitterConfig, text: &str) -> Result<(), DeliveryError> {
        tracing::info!(text, "Updating Twitter status");
        let response = self
            .client
            .post(format!("{TWITTER_API_BASE}/tweets"))
            .bearer_auth(&config.access_token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        check_status("twitter", response).await?;
        Ok(())
    }

    /// Numeric addresses are user ids; anything else is a handle to look up.
    async fn resolve_user(&self, config: &TwitterConfig, user: &str) -> Result<String, DeliveryError> {
        let handle = user.trim_start_matches('@');
        if !handle.is_empty() && handle.chars().all(|c| c.is_ascii_digit()) {
            return Ok(handle.to_string());
        }
        let response = self
            .client
            .get(format!("{TWITTER_API_BASE}/users/by/username/{handle}"))
            .bearer_auth(&config.access_token)
            .send()
            .await?;
        let lookup: UserLookup = check_status("twitter", response).await?.json().await?;
        lookup.data.map(|d| d.id).ok_or_else(|| DeliveryError::Api {
            channel: "twitter",
            message: format!("unknown user {handle}"),
        })
    }

    async fn direct_message(&self, config: &TwitterConfig, user: &str, text: &str) -> Result<(), DeliveryError> {
        tracing::info!(user, text, "Sending Twitter DM");
        let user_id = self.resolve_user(config, user).await?;
        let response = self
            .client
            .post(format!("{TWITTER_API_BASE}/dm_conversations/with/{user_id}/messages"))
            .bearer_auth(&config.access_token)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;
        check_status("twitter", response).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TwitterChannel {
    fn name(&self) -> &'static str {
        "twitter"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "twitter",
            reason: "TWITTER_ACCESS_TOKEN not set",
        })?;

        let text = stamped_text(chrono::Local::now().naive_local(), &alert.body);
        match recipient.scheme {
            Scheme::TwitterDm => self.direct_message(config, &recipient.address, &text).await,
            _ => self.post_status(config, &text).await,
        }
    }
}
