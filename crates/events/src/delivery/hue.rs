//! Philips Hue light control through the bridge's v1 REST API.
//!
//! The recipient address names a group or a light; groups are matched
//! first. One light may be designated the alert light (`HUE_LIGHT_NAME`):
//! switching it on saves its current state and applies the alert colour,
//! and switching it off restores what was saved.

use std::collections::HashMap;

use async_trait::async_trait;
use doorwatch_core::{RecipientRef, Scheme};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::channel::{AlertContext, DeliveryError, NotificationChannel};
use crate::http::{check_status, env_nonempty};

// ---------------------------------------------------------------------------
// HueConfig
// ---------------------------------------------------------------------------

/// Colour applied to the alert light when it is switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertColour {
    pub hue: u16,
    pub sat: u8,
    pub bri: u8,
}

impl Default for AlertColour {
    /// Saturated red at full brightness.
    fn default() -> Self {
        Self {
            hue: 0,
            sat: 254,
            bri: 254,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HueConfig {
    /// Bridge host or IP address.
    pub bridge_address: String,
    /// Whitelisted bridge user id.
    pub user_id: String,
    pub alert_light: Option<String>,
    pub alert_colour: AlertColour,
}

impl HueConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable             | Required | Default |
    /// |----------------------|----------|---------|
    /// | `HUE_BRIDGE_ADDRESS` | yes      |         |
    /// | `HUE_USER_ID`        | yes      |         |
    /// | `HUE_LIGHT_NAME`     | no       |         |
    /// | `HUE_LIGHT_HUE`      | no       | `0`     |
    /// | `HUE_LIGHT_SAT`      | no       | `254`   |
    /// | `HUE_LIGHT_BRI`      | no       | `254`   |
    pub fn from_env() -> Option<Self> {
        let defaults = AlertColour::default();
        Some(Self {
            bridge_address: env_nonempty("HUE_BRIDGE_ADDRESS")?,
            user_id: env_nonempty("HUE_USER_ID")?,
            alert_light: env_nonempty("HUE_LIGHT_NAME"),
            alert_colour: AlertColour {
                hue: parse_env("HUE_LIGHT_HUE").unwrap_or(defaults.hue),
                sat: parse_env("HUE_LIGHT_SAT").unwrap_or(defaults.sat),
                bri: parse_env("HUE_LIGHT_BRI").unwrap_or(defaults.bri),
            },
        })
    }

    fn api_base(&self) -> String {
        let address = self.bridge_address.trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{address}/api/{}", self.user_id)
        } else {
            format!("http://{address}/api/{}", self.user_id)
        }
    }

    fn is_alert_light(&self, name: &str) -> bool {
        self.alert_light.as_deref() == Some(name)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Bridge resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct Light {
    pub name: String,
    pub state: LightState,
}

#[derive(Debug, Deserialize)]
pub struct Group {
    pub name: String,
}

/// Id of the resource whose name matches exactly.
pub fn find_by_name<'a, T>(resources: &'a HashMap<String, T>, name: &str, name_of: impl Fn(&T) -> &str) -> Option<&'a str> {
    resources
        .iter()
        .find(|(_, r)| name_of(r) == name)
        .map(|(id, _)| id.as_str())
}

/// The bridge answers every write with a list of `success`/`error` entries.
pub fn check_bridge_reply(reply: &serde_json::Value) -> Result<(), DeliveryError> {
    let errors: Vec<String> = reply
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("error"))
        .map(|e| {
            e.get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown error")
                .to_string()
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DeliveryError::Api {
            channel: "hue",
            message: errors.join("; "),
        })
    }
}

/// State to write when switching a light on. Colour fields are only sent
/// for the alert light; other lights keep whatever colour they had.
pub fn on_state(colour: Option<AlertColour>) -> LightState {
    match colour {
        Some(c) => LightState {
            on: true,
            hue: Some(c.hue),
            sat: Some(c.sat),
            bri: Some(c.bri),
        },
        None => LightState {
            on: true,
            ..Default::default()
        },
    }
}

/// Writes that put the alert light back the way it was saved. The colour
/// goes first while the light is still on, since the bridge rejects colour
/// changes on a light that is off; the on/off switch follows.
pub fn restore_writes(saved: LightState) -> Vec<LightState> {
    let mut writes = Vec::with_capacity(2);
    if saved.hue.is_some() || saved.sat.is_some() || saved.bri.is_some() {
        writes.push(LightState { on: true, ..saved });
    }
    writes.push(LightState {
        on: saved.on,
        ..Default::default()
    });
    writes
}

// ---------------------------------------------------------------------------
// HueChannel
// ---------------------------------------------------------------------------

pub struct HueChannel {
    client: reqwest::Client,
    config: Option<HueConfig>,
    /// State of the alert light before it was switched on, if held.
    saved: Mutex<Option<LightState>>,
}

impl HueChannel {
    pub fn new(client: reqwest::Client, config: Option<HueConfig>) -> Self {
        Self {
            client,
            config,
            saved: Mutex::new(None),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, config: &HueConfig, resource: &str) -> Result<T, DeliveryError> {
        let response = self
            .client
            .get(format!("{}/{resource}", config.api_base()))
            .send()
            .await?;
        Ok(check_status("hue", response).await?.json().await?)
    }

    async fn put(&self, config: &HueConfig, path: &str, body: &impl Serialize) -> Result<(), DeliveryError> {
        let response = self
            .client
            .put(format!("{}/{path}", config.api_base()))
            .json(body)
            .send()
            .await?;
        let reply: serde_json::Value = check_status("hue", response).await?.json().await?;
        check_bridge_reply(&reply)
    }

    /// Returns `false` when no group carries `name`.
    async fn switch_group(&self, config: &HueConfig, name: &str, on: bool) -> Result<bool, DeliveryError> {
        let groups: HashMap<String, Group> = self.get(config, "groups").await?;
        let Some(id) = find_by_name(&groups, name, |g| g.name.as_str()) else {
            return Ok(false);
        };
        self.put(config, &format!("groups/{id}/action"), &serde_json::json!({ "on": on }))
            .await?;
        tracing::info!(group = name, on, "Hue group switched");
        Ok(true)
    }

    async fn switch_light(&self, config: &HueConfig, name: &str, on: bool) -> Result<(), DeliveryError> {
        let lights: HashMap<String, Light> = self.get(config, "lights").await?;
        let Some(id) = find_by_name(&lights, name, |l| l.name.as_str()) else {
            return Err(DeliveryError::Api {
                channel: "hue",
                message: format!("no group or light named {name}"),
            });
        };
        let current = lights[id].state;
        let alert_light = config.is_alert_light(name);

        let mut restoring = false;
        let writes = if on {
            if alert_light {
                let mut saved = self.saved.lock().await;
                if saved.is_none() {
                    *saved = Some(current);
                }
            }
            vec![on_state(alert_light.then_some(config.alert_colour))]
        } else {
            if !current.on {
                return Ok(());
            }
            let saved = if alert_light { *self.saved.lock().await } else { None };
            match saved {
                Some(saved) => {
                    restoring = true;
                    restore_writes(saved)
                }
                None => vec![LightState {
                    on: false,
                    ..Default::default()
                }],
            }
        };

        for write in &writes {
            self.put(config, &format!("lights/{id}/state"), write).await?;
        }
        // Saved state is only dropped once the light is back to it.
        if restoring {
            *self.saved.lock().await = None;
        }

        let switched_on = writes.last().is_some_and(|w| w.on);
        tracing::info!(light = name, on = switched_on, restored = restoring, "Hue light switched");
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for HueChannel {
    fn name(&self) -> &'static str {
        "hue"
    }

    async fn send(&self, recipient: &RecipientRef, alert: &AlertContext) -> Result<(), DeliveryError> {
        let config = self.config.as_ref().ok_or(DeliveryError::NotConfigured {
            channel: "hue",
            reason: "HUE_BRIDGE_ADDRESS or HUE_USER_ID not set",
        })?;

        let on = recipient.scheme == Scheme::HueOn;
        tracing::info!(target_name = %recipient.address, on, state = %alert.state, "Sending Hue command");
        if self.switch_group(config, &recipient.address, on).await? {
            return Ok(());
        }
        self.switch_light(config, &recipient.address, on).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
