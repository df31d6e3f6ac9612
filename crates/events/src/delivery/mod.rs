//! External delivery channels for door alerts.
//!
//! One adapter per channel kind, each implementing
//! [`NotificationChannel`](crate::NotificationChannel). Adapters that need
//! credentials take an optional config loaded from the environment and
//! report themselves as not configured on every send when it is absent.

pub mod email;
pub mod gcm;
pub mod hue;
pub mod ifttt;
pub mod pushbullet;
pub mod slack;
pub mod sms;
pub mod spark;
pub mod twitter;

pub use email::{EmailChannel, EmailConfig};
pub use gcm::{GcmChannel, GcmConfig};
pub use hue::{HueChannel, HueConfig};
pub use ifttt::{IftttChannel, IftttConfig};
pub use pushbullet::PushbulletChannel;
pub use slack::{SlackChannel, SlackConfig};
pub use sms::{SmsChannel, SmsConfig};
pub use spark::{SparkChannel, SparkConfig};
pub use twitter::{TwitterChannel, TwitterConfig};
