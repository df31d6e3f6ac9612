//! Host health for the heartbeat line: CPU and GPU temperature, uptime.
//!
//! Every probe is optional. A missing thermal zone, a host without
//! `vcgencmd` or an unreadable `/proc/uptime` renders as `unknown` rather
//! than failing the heartbeat.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use doorwatch_core::duration::format_uptime;
use regex::Regex;
use tokio::process::Command;

/// Upper bound on the GPU temperature command.
const GPU_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

static TEMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)").expect("valid regex"));

/// One health sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostHealth {
    pub cpu_temp: Option<f64>,
    pub gpu_temp: Option<f64>,
    pub uptime_secs: Option<u64>,
}

impl fmt::Display for HostHealth {
    /// `CPU temp: 45.1, GPU temp: 44.0, Uptime: 3 days, 4:05:06`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU temp: ")?;
        match self.cpu_temp {
            Some(t) => write!(f, "{t:.1}")?,
            None => write!(f, "unknown")?,
        }
        write!(f, ", GPU temp: ")?;
        match self.gpu_temp {
            Some(t) => write!(f, "{t:.1}")?,
            None => write!(f, "unknown")?,
        }
        write!(f, ", Uptime: ")?;
        match self.uptime_secs {
            Some(secs) => write!(f, "{}", format_uptime(secs)),
            None => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Thermal zone files hold millidegrees Celsius.
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|m| m / 1000.0)
}

/// `vcgencmd measure_temp` prints `temp=44.0'C`.
pub fn parse_vcgencmd(output: &str) -> Option<f64> {
    TEMP_RE.captures(output)?.get(1)?.as_str().parse().ok()
}

/// First field of `/proc/uptime`, truncated to whole seconds.
pub fn parse_uptime(raw: &str) -> Option<u64> {
    let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs as u64)
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Reads health probes from the host.
#[derive(Debug, Clone)]
pub struct HealthCollector {
    thermal_zone: PathBuf,
    uptime: PathBuf,
    /// Program and arguments printing the GPU temperature; `None` skips it.
    gpu_command: Option<(String, Vec<String>)>,
}

impl Default for HealthCollector {
    fn default() -> Self {
        Self {
            thermal_zone: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            uptime: PathBuf::from("/proc/uptime"),
            gpu_command: Some(("vcgencmd".to_string(), vec!["measure_temp".to_string()])),
        }
    }
}

impl HealthCollector {
    pub fn new(thermal_zone: impl Into<PathBuf>, uptime: impl Into<PathBuf>, gpu_command: Option<(String, Vec<String>)>) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            uptime: uptime.into(),
            gpu_command,
        }
    }

    pub async fn collect(&self) -> HostHealth {
        HostHealth {
            cpu_temp: read_file(&self.thermal_zone).await.as_deref().and_then(parse_millidegrees),
            gpu_temp: self.gpu_temp().await,
            uptime_secs: read_file(&self.uptime).await.as_deref().and_then(parse_uptime),
        }
    }

    async fn gpu_temp(&self) -> Option<f64> {
        let (program, args) = self.gpu_command.as_ref()?;
        let result = tokio::time::timeout(
            GPU_COMMAND_TIMEOUT,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => parse_vcgencmd(&String::from_utf8_lossy(&output.stdout)),
            Ok(Ok(output)) => {
                tracing::debug!(status = %output.status, "GPU temperature command failed");
                None
            }
            Ok(Err(e)) => {
                tracing::debug!(program = %program, error = %e, "GPU temperature command unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(program = %program, "GPU temperature command timed out");
                None
            }
        }
    }
}

async fn read_file(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}
