//! Recipient identifier parsing.
//!
//! Alert rules name their recipients with strings of the form
//! `scheme:address` (e.g. `sms:+15551234567`) or a bare keyword for
//! schemes that carry no address (`tweet`, `gcm`). [`RecipientRef::parse`]
//! turns such a string into a tagged value once, at dispatch entry, so
//! channel adapters never slice strings themselves.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Notification channel kinds addressable from an alert rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Email,
    Sms,
    TwitterDm,
    Tweet,
    Jabber,
    Pushbullet,
    Ifttt,
    Spark,
    Gcm,
    Slack,
    HueOn,
    HueOff,
}

impl Scheme {
    /// Every scheme, in no particular order.
    pub const ALL: [Scheme; 12] = [
        Self::Email,
        Self::Sms,
        Self::TwitterDm,
        Self::Tweet,
        Self::Jabber,
        Self::Pushbullet,
        Self::Ifttt,
        Self::Spark,
        Self::Gcm,
        Self::Slack,
        Self::HueOn,
        Self::HueOff,
    ];

    /// The identifier keyword, without the `:` separator.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::TwitterDm => "twitter_dm",
            Self::Tweet => "tweet",
            Self::Jabber => "jabber",
            Self::Pushbullet => "pushbullet",
            Self::Ifttt => "ifttt",
            Self::Spark => "spark",
            Self::Gcm => "gcm",
            Self::Slack => "slack",
            Self::HueOn => "hue_on",
            Self::HueOff => "hue_off",
        }
    }

    /// Bare schemes are written as the keyword alone and have no address.
    pub fn is_bare(&self) -> bool {
        matches!(self, Self::Tweet | Self::Gcm)
    }

    /// Whether this scheme drives the smart-light channel.
    pub fn is_light(&self) -> bool {
        matches!(self, Self::HueOn | Self::HueOff)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed recipient: which channel, and where within it.
///
/// `address` is empty for bare schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRef {
    pub scheme: Scheme,
    pub address: String,
}

impl RecipientRef {
    /// Parse a recipient identifier.
    ///
    /// Bare keywords must match exactly. Prefixed schemes are matched
    /// longest prefix first, so a future scheme that extends another
    /// keyword cannot be shadowed by it.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let raw = raw.trim();

        if let Some(scheme) = Scheme::ALL
            .iter()
            .find(|s| s.is_bare() && s.keyword() == raw)
        {
            return Ok(Self {
                scheme: *scheme,
                address: String::new(),
            });
        }

        let mut prefixed: Vec<Scheme> = Scheme::ALL.iter().copied().filter(|s| !s.is_bare()).collect();
        prefixed.sort_by_key(|s| std::cmp::Reverse(s.keyword().len()));

        for scheme in prefixed {
            let Some(rest) = raw.strip_prefix(scheme.keyword()) else {
                continue;
            };
            let Some(address) = rest.strip_prefix(':') else {
                continue;
            };
            if address.is_empty() {
                return Err(CoreError::MissingAddress(raw.to_string()));
            }
            return Ok(Self {
                scheme,
                address: address.to_string(),
            });
        }

        Err(CoreError::UnknownScheme(raw.to_string()))
    }
}

impl FromStr for RecipientRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecipientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme.is_bare() {
            f.write_str(self.scheme.keyword())
        } else {
            write!(f, "{}:{}", self.scheme.keyword(), self.address)
        }
    }
}
