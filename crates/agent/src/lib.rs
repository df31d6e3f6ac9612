//! The doorwatch daemon.
//!
//! Reads door sensors on a fixed tick, feeds the readings to the core
//! escalation logic and hands fired alerts to the dispatch pool. Also
//! answers status queries from the instant-message session.

pub mod config;
pub mod health;
pub mod poll;
pub mod sensor;
pub mod status;

pub use config::{AgentConfig, ConfigError, LogFormat};
pub use health::{HealthCollector, HostHealth};
pub use poll::{wait_for_stop, HeartbeatSchedule, PollLoop, StopReason, TickReport};
pub use sensor::{SensorError, SensorReader, SysfsGpio};
pub use status::StatusQueryService;
