//! Pushbullet notes. The recipient address is the account's access token,
//! so the channel itself needs no configuration.

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use serde::Serialize;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::check_status;

const PUSHES_URL: &str = "https://api.pushbullet.com/v2/pushes";

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct NotePush<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'a str,
    pub body: &'a str,
}

impl<'a> NotePush<'a> {
    pub fn new(title: &'a str, body: &'a str) -> Self {
        Self {
            kind: "note",
            title,
            body,
        }
    }
}

pub struct PushbulletChannel {
    client: reqwest::Client,
}

impl PushbulletChannel {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationChannel for PushbulletChannel {
    fn name(&self) -> &'static str {
        "pushbullet"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        tracing::info!(title = %alert.subject, body = %alert.body, "Sending Pushbullet note");
        let response = self
            .client
            .post(PUSHES_URL)
            .basic_auth(&recipient.address, Some(""))
            .json(&NotePush::new(&alert.subject, &alert.body))
            .send()
            .await?;
        check_status("pushbullet", response).await?;
        Ok(())
    }
}
