//! Webex (formerly Cisco Spark) room messages.
//!
//! The recipient address is a room title. The room is looked up on every
//! send and created when missing, so renaming or deleting a room on the
//! Webex side needs no restart.

use async_trait::async_trait;
use doorwatch_core::RecipientRef;
use serde::Deserialize;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

const WEBEX_API_BASE: &str = "https://webexapis.com/v1";

#[derive(Debug, Clone)]
pub struct SparkConfig {
    pub access_token: String,
}

impl SparkConfig {
    /// Returns `None` unless `SPARK_ACCESS_TOKEN` is set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_token: env_nonempty("SPARK_ACCESS_TOKEN")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Room {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct RoomList {
    #[serde(default)]
    items: Vec<Room>,
}

/// First room whose title matches exactly.
pub fn find_room<'a>(rooms: &'a [Room], title: &str) -> Option<&'a Room> {
    rooms.iter().find(|r| r.title == title)
}

pub struct SparkChannel {
    client: reqwest::Client,
    config: Option<SparkConfig>,
}

impl SparkChannel {
    pub fn new(client: reqwest::Client, config: Option<SparkConfig>) -> Self {
        Self { client, config }
    }

    async fn list_rooms(&self, config: &SparkConfig) -> Result<Vec<Room>, DeliveryError> {
        let response = self
            .client
            .get(format!("{WEBEX_API_BASE}/rooms"))
            .bearer_auth(&config.access_token)
            .send()
            .await?;
        let list: RoomList = check_status("spark", response).await?.json().await?;
        Ok(list.items)
    }

    async fn create_room(&self, config: &SparkConfig, title: &str) -> Result<Room, DeliveryError> {
        let response = self
            .client
            .post(format!("{WEBEX_API_BASE}/rooms"))
            .bearer_auth(&config.access_token)
            .json(&serde_json::json!({ "title": title }))
            .send()
            .await?;
        Ok(check_status("spark", response).await?.json().await?)
    }

    async fn room_id(&self, config: &SparkConfig, title: &str) -> Result<String, DeliveryError> {
        let rooms = self.list_rooms(config).await?;
        if let Some(room) = find_room(&rooms, title) {
            return Ok(room.id.clone());
        }
        tracing::info!(room = title, "Room not found, creating it");
        Ok(self.create_room(config, title).await?.id)
    }
}

#[async_trait]
impl NotificationChannel for SparkChannel {
    fn name(&self) -> &'static str {
        "spark"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "spark",
            reason: "SPARK_ACCESS_TOKEN not set",
        })?;

        tracing::info!(room = %recipient.address, body = %alert.body, "Sending Spark message");
        let room_id = self.room_id(config, &recipient.address).await?;
        let response = self
            .client
            .post(format!("{WEBEX_API_BASE}/messages"))
            .bearer_auth(&config.access_token)
            .json(&serde_json::json!({ "roomId": room_id, "text": alert.body }))
            .send()
            .await?;
        check_status("spark", response).await?;
        Ok(())
    }
}
