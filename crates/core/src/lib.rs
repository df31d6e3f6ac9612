//! Door monitoring domain logic for doorwatch.
//!
//! Everything in this crate is pure (no I/O, no clocks): callers pass in
//! observed sensor states and timestamps and get back the alerts that
//! should be delivered. The agent crate wires it to real sensors and the
//! events crate delivers what it produces.

pub mod door;
pub mod duration;
pub mod error;
pub mod escalation;
pub mod monitor;
pub mod recipient;
pub mod status;
pub mod tracker;
pub mod types;

pub use door::{AlertRule, DoorConfig};
pub use error::CoreError;
pub use escalation::{AlertKind, EscalationCursor, EscalationEngine, FiredAlert};
pub use monitor::DoorMonitor;
pub use recipient::{RecipientRef, Scheme};
pub use tracker::{StateTracker, TransitionOutcome};
pub use types::{DoorState, Timestamp};
