//! Door and alert-rule configuration model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::recipient::RecipientRef;
use crate::types::DoorState;

/// One step of a door's escalation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    /// State in which the timer accrues.
    pub state: DoorState,
    /// Seconds the door must continuously hold `state` before this rule fires.
    #[serde(alias = "time")]
    pub threshold_secs: u64,
    /// Recipient identifiers, e.g. `sms:+15551234567` or `tweet`.
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// A monitored door as configured at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorConfig {
    /// Stable display name, unique across the configured set.
    pub name: String,
    /// Sensor handle (GPIO pin number) read by the agent's sensor reader.
    pub pin: u32,
    /// Ordered escalation chain. Index order is escalation order.
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

impl DoorConfig {
    /// Recipient strings across all rules that do not parse.
    pub fn invalid_recipients(&self) -> Vec<(String, CoreError)> {
        self.alerts
            .iter()
            .flat_map(|rule| rule.recipients.iter())
            .filter_map(|raw| RecipientRef::parse(raw).err().map(|e| (raw.clone(), e)))
            .collect()
    }
}

/// Validate a configured door set.
///
/// Rejects an empty set, blank names and duplicate names. Unparseable
/// recipients are not an error here; see [`DoorConfig::invalid_recipients`].
pub fn validate_doors(doors: &[DoorConfig]) -> Result<(), CoreError> {
    if doors.is_empty() {
        return Err(CoreError::Validation("no doors configured".into()));
    }

    let mut seen = HashSet::new();
    for door in doors {
        let name = door.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation(format!(
                "door on pin {} has an empty name",
                door.pin
            )));
        }
        if !seen.insert(name) {
            return Err(CoreError::Validation(format!("duplicate door name '{name}'")));
        }
    }

    Ok(())
}
