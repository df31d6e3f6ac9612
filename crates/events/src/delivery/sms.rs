//! SMS alerts through the Twilio REST API.

use async_trait::async_trait;
use doorwatch_core::duration::truncate;
use doorwatch_core::RecipientRef;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Longest SMS body sent; longer bodies are truncated with `...`.
pub const MAX_SMS_CHARS: usize = 140;

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sending phone number in E.164 form.
    pub from_number: String,
}

impl SmsConfig {
    /// | Variable              | Required |
    /// |-----------------------|----------|
    /// | `TWILIO_ACCOUNT`      | yes      |
    /// | `TWILIO_TOKEN`        | yes      |
    /// | `TWILIO_PHONE_NUMBER` | yes      |
    pub fn from_env() -> Option<Self> {
        Some(Self {
            account_sid: env_nonempty("TWILIO_ACCOUNT")?,
            auth_token: env_nonempty("TWILIO_TOKEN")?,
            from_number: env_nonempty("TWILIO_PHONE_NUMBER")?,
        })
    }

    fn messages_url(&self) -> String {
        format!("{TWILIO_API_BASE}/Accounts/{}/Messages.json", self.account_sid)
    }
}

/// Form fields for the Twilio Messages resource.
pub fn sms_form(from: &str, to: &str, body: &str) -> [(&'static str, String); 3] {
    [
        ("To", to.to_string()),
        ("From", from.to_string()),
        ("Body", truncate(body, MAX_SMS_CHARS)),
    ]
}

pub struct SmsChannel {
    client: reqwest::Client,
    config: Option<SmsConfig>,
}

impl SmsChannel {
    pub fn new(client: reqwest::Client, config: Option<SmsConfig>) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "sms",
            reason: "TWILIO_ACCOUNT, TWILIO_TOKEN or TWILIO_PHONE_NUMBER not set",
        })?;

        tracing::info!(to = %recipient.address, body = %alert.body, "Sending SMS");
        let response = self
            .client
            .post(config.messages_url())
            .basic_auth(&config.account_sid, Some(&config.auth_token))
            .form(&sms_form(&config.from_number, &recipient.address, &alert.body))
            .send()
            .await?;
        check_status("sms", response).await?;
        Ok(())
    }
}
