//! Door sensor reading.
//!
//! Each door has a reed switch wired to a GPIO input. [`SysfsGpio`] reads
//! it through the kernel's sysfs GPIO interface: a high level means the
//! door is open.

use std::path::{Path, PathBuf};

use doorwatch_core::{DoorConfig, DoorState};

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("GPIO {pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("GPIO {pin}: unexpected value {value:?}")]
    BadValue { pin: u32, value: String },
}

/// Yields the current state of a door. Reads must be quick; they run
/// inline in the poll loop.
pub trait SensorReader: Send {
    fn read(&self, door: &DoorConfig) -> Result<DoorState, SensorError>;
}

/// Sysfs GPIO reader rooted at e.g. `/sys/class/gpio`.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    /// Export each pin that is not yet exported and set it as an input.
    pub fn prepare(&self, pins: &[u32]) -> Result<(), SensorError> {
        for &pin in pins {
            let io = |source| SensorError::Io { pin, source };
            let dir = self.pin_dir(pin);
            if !dir.exists() {
                tracing::info!(pin, "Exporting GPIO pin");
                write_value(&self.root.join("export"), &pin.to_string()).map_err(io)?;
            }
            write_value(&dir.join("direction"), "in").map_err(io)?;
        }
        Ok(())
    }
}

fn write_value(path: &Path, value: &str) -> std::io::Result<()> {
    std::fs::write(path, value)
}

/// Map a sysfs `value` file's contents to a door state.
pub fn parse_level(pin: u32, raw: &str) -> Result<DoorState, SensorError> {
    match raw.trim() {
        "1" => Ok(DoorState::Open),
        "0" => Ok(DoorState::Closed),
        other => Err(SensorError::BadValue {
            pin,
            value: other.to_string(),
        }),
    }
}

impl SensorReader for SysfsGpio {
    fn read(&self, door: &DoorConfig) -> Result<DoorState, SensorError> {
        let raw = std::fs::read_to_string(self.pin_dir(door.pin).join("value"))
            .map_err(|source| SensorError::Io { pin: door.pin, source })?;
        parse_level(door.pin, &raw)
    }
}
