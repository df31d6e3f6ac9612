//! Process settings from the environment and the JSON door file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use doorwatch_core::door::validate_doors;
use doorwatch_core::{CoreError, DoorConfig};
use serde::Deserialize;

use crate::poll::HeartbeatSchedule;

const DEFAULT_DOOR_FILE: &str = "/usr/local/etc/doorwatch.json";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_HEARTBEAT_INITIAL_TICKS: u32 = 5;
const DEFAULT_HEARTBEAT_INTERVAL_TICKS: u32 = 600;
const DEFAULT_DISPATCH_CONCURRENCY: usize = 8;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Failed to read door configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid door configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Doors(#[from] CoreError),
}

// ---------------------------------------------------------------------------
// LogFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines; anything else is text.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Daemon settings. Channel credentials are loaded separately by each
/// channel's own `from_env`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub door_file: PathBuf,
    pub poll_interval: Duration,
    pub heartbeat: HeartbeatSchedule,
    pub dispatch_concurrency: usize,
    pub send_timeout: Duration,
    pub shutdown_grace: Duration,
    pub gpio_root: PathBuf,
}

impl AgentConfig {
    /// Load settings from environment variables.
    ///
    /// | Env Var                    | Default                         |
    /// |----------------------------|---------------------------------|
    /// | `DOORWATCH_CONFIG`         | `/usr/local/etc/doorwatch.json` |
    /// | `POLL_INTERVAL_MS`         | `1000`                          |
    /// | `HEARTBEAT_INITIAL_TICKS`  | `5`                             |
    /// | `HEARTBEAT_INTERVAL_TICKS` | `600`                           |
    /// | `DISPATCH_CONCURRENCY`     | `8`                             |
    /// | `SEND_TIMEOUT_SECS`        | `30`                            |
    /// | `SHUTDOWN_GRACE_SECS`      | `10`                            |
    /// | `GPIO_SYSFS_ROOT`          | `/sys/class/gpio`               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            door_file: get("DOORWATCH_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOOR_FILE)),
            poll_interval: Duration::from_millis(positive(
                "POLL_INTERVAL_MS",
                get("POLL_INTERVAL_MS"),
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            heartbeat: HeartbeatSchedule {
                initial_ticks: positive(
                    "HEARTBEAT_INITIAL_TICKS",
                    get("HEARTBEAT_INITIAL_TICKS"),
                    DEFAULT_HEARTBEAT_INITIAL_TICKS,
                )?,
                interval_ticks: positive(
                    "HEARTBEAT_INTERVAL_TICKS",
                    get("HEARTBEAT_INTERVAL_TICKS"),
                    DEFAULT_HEARTBEAT_INTERVAL_TICKS,
                )?,
            },
            dispatch_concurrency: positive(
                "DISPATCH_CONCURRENCY",
                get("DISPATCH_CONCURRENCY"),
                DEFAULT_DISPATCH_CONCURRENCY,
            )?,
            send_timeout: Duration::from_secs(positive(
                "SEND_TIMEOUT_SECS",
                get("SEND_TIMEOUT_SECS"),
                DEFAULT_SEND_TIMEOUT_SECS,
            )?),
            shutdown_grace: Duration::from_secs(positive(
                "SHUTDOWN_GRACE_SECS",
                get("SHUTDOWN_GRACE_SECS"),
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            gpio_root: get("GPIO_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_ROOT)),
        })
    }
}

/// Parse a positive integer setting, falling back to `default` when unset.
fn positive<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            key,
            expected: "a positive integer",
            value: raw,
        }),
    }
}

// ---------------------------------------------------------------------------
// Door file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DoorFile {
    doors: Vec<DoorConfig>,
}

/// Parse and validate the door set from JSON text.
pub fn parse_doors(path: &Path, text: &str) -> Result<Vec<DoorConfig>, ConfigError> {
    let file: DoorFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate_doors(&file.doors)?;

    for door in &file.doors {
        for (recipient, error) in door.invalid_recipients() {
            tracing::warn!(door = %door.name, recipient = %recipient, error = %error, "Invalid recipient in configuration");
        }
    }
    Ok(file.doors)
}

/// Read the door file at `path`.
pub fn load_doors(path: &Path) -> Result<Vec<DoorConfig>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_doors(path, &text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use doorwatch_core::DoorState;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.door_file, PathBuf::from(DEFAULT_DOOR_FILE));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.heartbeat.initial_ticks, 5);
        assert_eq!(config.heartbeat.interval_ticks, 600);
        assert_eq!(config.dispatch_concurrency, 8);
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.gpio_root, PathBuf::from("/sys/class/gpio"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("DOORWATCH_CONFIG", "/tmp/doors.json"),
            ("POLL_INTERVAL_MS", "250"),
            ("HEARTBEAT_INTERVAL_TICKS", "60"),
            ("DISPATCH_CONCURRENCY", " 2 "),
        ]))
        .unwrap();
        assert_eq!(config.door_file, PathBuf::from("/tmp/doors.json"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.heartbeat.interval_ticks, 60);
        assert_eq!(config.dispatch_concurrency, 2);
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        assert_matches!(
            AgentConfig::from_lookup(lookup(&[("POLL_INTERVAL_MS", "0")])),
            Err(ConfigError::InvalidValue { key: "POLL_INTERVAL_MS", .. })
        );
        assert_matches!(
            AgentConfig::from_lookup(lookup(&[("SEND_TIMEOUT_SECS", "soon")])),
            Err(ConfigError::InvalidValue { key: "SEND_TIMEOUT_SECS", .. })
        );
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Text);
        assert_eq!(LogFormat::parse(None), LogFormat::Text);
    }

    const DOORS_JSON: &str = r#"{
        "doors": [
            {
                "name": "Left",
                "pin": 15,
                "alerts": [
                    {"state": "open", "time": 120, "recipients": ["sms:+11112223333", "tweet"]},
                    {"state": "open", "time": 600, "recipients": ["bogus:foo"]}
                ]
            },
            {"name": "Right", "pin": 16}
        ]
    }"#;

    #[test]
    fn load_doors_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DOORS_JSON.as_bytes()).unwrap();

        let doors = load_doors(file.path()).unwrap();
        assert_eq!(doors.len(), 2);
        assert_eq!(doors[0].alerts[0].state, DoorState::Open);
        assert_eq!(doors[0].alerts[0].threshold_secs, 120);
        // Invalid recipients are kept; they are reported again at dispatch.
        assert_eq!(doors[0].alerts[1].recipients, vec!["bogus:foo".to_string()]);
        assert!(doors[1].alerts.is_empty());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(load_doors(&dir.path().join("absent.json")), Err(ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert_matches!(
            parse_doors(Path::new("doors.json"), r#"{"doors": [{"name": "Left"}]}"#),
            Err(ConfigError::Parse { .. })
        );
    }

    #[test]
    fn duplicate_names_fail_validation() {
        let text = r#"{"doors": [{"name": "A", "pin": 1}, {"name": "A", "pin": 2}]}"#;
        assert_matches!(parse_doors(Path::new("doors.json"), text), Err(ConfigError::Doors(_)));
    }
}
