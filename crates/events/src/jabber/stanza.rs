//! XMPP stanzas for the WebSocket binding (RFC 7395).
//!
//! Over WebSocket every frame carries exactly one complete top-level
//! element, so incoming frames are inspected with a handful of regexes
//! instead of a streaming XML parser. Only the stanzas the session needs
//! are understood: stream features, SASL outcome, bind result, pings and
//! messages.

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

const FRAMING_NS: &str = "urn:ietf:params:xml:ns:xmpp-framing";
const SASL_NS: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
const BIND_NS: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// Id used for the resource-binding request.
pub const BIND_ID: &str = "bind_1";

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

static OPEN_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<([A-Za-z_:][-A-Za-z0-9_:.]*)([^>]*?)/?>").expect("valid regex"));

static BODY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<body(?:\s[^>]*)?>(.*?)</body>").expect("valid regex"));

static JID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<jid(?:\s[^>]*)?>(.*?)</jid>").expect("valid regex"));

// ---------------------------------------------------------------------------
// Jid
// ---------------------------------------------------------------------------

/// A parsed `local@domain/resource` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub local: String,
    pub domain: String,
    pub resource: Option<String>,
}

impl Jid {
    /// Parse a full or bare JID. The local part is required because the
    /// session authenticates as a user.
    pub fn parse(s: &str) -> Option<Self> {
        let (bare, resource) = match s.trim().split_once('/') {
            Some((bare, res)) if !res.is_empty() => (bare, Some(res.to_string())),
            Some((bare, _)) => (bare, None),
            None => (s.trim(), None),
        };
        let (local, domain) = bare.split_once('@')?;
        if local.is_empty() || domain.is_empty() {
            return None;
        }
        Some(Self {
            local: local.to_string(),
            domain: domain.to_string(),
            resource,
        })
    }

    pub fn bare(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

/// Strip the resource from a JID string (`a@b/c` becomes `a@b`).
pub fn bare_jid(jid: &str) -> &str {
    jid.split_once('/').map_or(jid, |(bare, _)| bare)
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

pub fn open(domain: &str) -> String {
    format!(r#"<open xmlns="{FRAMING_NS}" to="{}" version="1.0"/>"#, escape(domain))
}

pub fn close() -> String {
    format!(r#"<close xmlns="{FRAMING_NS}"/>"#)
}

/// SASL PLAIN: base64 of `\0local\0password`.
pub fn auth_plain(local: &str, password: &str) -> String {
    let token = STANDARD.encode(format!("\0{local}\0{password}"));
    format!(r#"<auth xmlns="{SASL_NS}" mechanism="PLAIN">{token}</auth>"#)
}

pub fn bind(resource: &str) -> String {
    format!(
        r#"<iq type="set" id="{BIND_ID}"><bind xmlns="{BIND_NS}"><resource>{}</resource></bind></iq>"#,
        escape(resource)
    )
}

pub fn presence() -> String {
    "<presence/>".to_string()
}

pub fn chat_message(to: &str, body: &str) -> String {
    format!(
        r#"<message xmlns="jabber:client" to="{}" type="chat"><body>{}</body></message>"#,
        escape(to),
        escape(body)
    )
}

fn pong(id: &str, to: Option<&str>) -> String {
    match to {
        Some(to) => format!(r#"<iq type="result" id="{}" to="{}"/>"#, escape(id), escape(to)),
        None => format!(r#"<iq type="result" id="{}"/>"#, escape(id)),
    }
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Name and attributes of the top-level element of a frame.
fn root(frame: &str) -> Option<(&str, &str)> {
    let caps = OPEN_TAG_RE.captures(frame)?;
    Some((caps.get(1)?.as_str(), caps.get(2).map_or("", |m| m.as_str())))
}

fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if caps.get(1)?.as_str() != name {
            return None;
        }
        caps.get(2).or_else(|| caps.get(3)).map(|m| unescape(m.as_str()))
    })
}

/// Local element name with any `stream:` style prefix removed.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

pub fn is_features(frame: &str) -> bool {
    root(frame).is_some_and(|(name, _)| local_name(name) == "features")
}

pub fn offers_plain(features: &str) -> bool {
    features.contains("<mechanism>PLAIN</mechanism>")
}

pub fn offers_bind(features: &str) -> bool {
    features.contains(BIND_NS)
}

/// `Some(true)` on SASL success, `Some(false)` on failure, `None` otherwise.
pub fn sasl_outcome(frame: &str) -> Option<bool> {
    match root(frame).map(|(name, _)| local_name(name)) {
        Some("success") => Some(true),
        Some("failure") => Some(false),
        _ => None,
    }
}

/// Outcome of the bind request: the bound JID, or an error description.
pub fn bind_result(frame: &str) -> Option<Result<String, String>> {
    let (name, attrs) = root(frame)?;
    if local_name(name) != "iq" || attr(attrs, "id").as_deref() != Some(BIND_ID) {
        return None;
    }
    if attr(attrs, "type").as_deref() == Some("error") {
        return Some(Err(frame.to_string()));
    }
    let jid = JID_RE
        .captures(frame)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .unwrap_or_default();
    Some(Ok(jid))
}

pub fn is_close(frame: &str) -> bool {
    root(frame).is_some_and(|(name, _)| local_name(name) == "close")
}

/// Reply to an XEP-0199 ping, if the frame is one.
pub fn ping_reply(frame: &str) -> Option<String> {
    let (name, attrs) = root(frame)?;
    if local_name(name) != "iq" || attr(attrs, "type").as_deref() != Some("get") || !frame.contains("urn:xmpp:ping") {
        return None;
    }
    let id = attr(attrs, "id")?;
    let from = attr(attrs, "from");
    Some(pong(&id, from.as_deref()))
}

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub from: String,
    /// `chat`, `normal`, `groupchat`, `headline` or `error`.
    pub kind: String,
    pub body: String,
}

impl IncomingMessage {
    /// Only one-to-one messages are answered.
    pub fn is_conversational(&self) -> bool {
        matches!(self.kind.as_str(), "chat" | "normal")
    }
}

/// Parse a `<message>` frame that carries a body.
pub fn parse_message(frame: &str) -> Option<IncomingMessage> {
    let (name, attrs) = root(frame)?;
    if local_name(name) != "message" {
        return None;
    }
    let body = BODY_RE.captures(frame)?.get(1)?.as_str();
    Some(IncomingMessage {
        from: attr(attrs, "from")?,
        kind: attr(attrs, "type").unwrap_or_else(|| "normal".to_string()),
        body: unescape(body),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
