//! Notification delivery for doorwatch.
//!
//! - [`NotificationChannel`]: the single send capability every channel
//!   adapter implements.
//! - [`RecipientDispatcher`]: parses recipient identifiers and routes an
//!   alert to the matching channel, logging (never propagating) failures.
//! - [`DispatchPool`]: runs dispatches on background tasks with bounded
//!   concurrency and a per-send timeout.
//! - [`delivery`]: HTTP and SMTP channel adapters.
//! - [`jabber`]: persistent XMPP session used both as a channel and as
//!   the inbound status-command surface.

pub mod channel;
pub mod delivery;
pub mod dispatcher;
pub mod http;
pub mod jabber;

pub use channel::{AlertContext, DeliveryError, NotificationChannel};
pub use dispatcher::{DispatchOutcome, DispatchPool, RecipientDispatcher};
