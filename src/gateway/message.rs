//! The universal in-flight message record.
//!
//! A `MsgQueueItem` is what moves through the router channels, the broker
//! queues and the protocol sinks. Broker payloads are the canonical JSON of
//! this type with the delivery handle omitted; the handle is re-attached on
//! consumption.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::broker::Delivery;

/// Message type carried end to end. Immutable once the message is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgKind {
    Sms,
    Mms,
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgKind::Sms => write!(f, "sms"),
            MsgKind::Mms => write!(f, "mms"),
        }
    }
}

/// One MIME part of an MMS envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsPart {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Parsed MM4 envelope: transfer headers plus payload parts. Opaque to the
/// router; only the MM4 sink and carrier handlers look inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsEnvelope {
    pub headers: Vec<(String, String)>,
    pub parts: Vec<MmsPart>,
}

impl MmsEnvelope {
    /// First header value with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Concatenated text of all `text/*` parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if part.content_type.starts_with("text/") {
                out.push_str(&String::from_utf8_lossy(&part.body));
            }
        }
        out
    }
}

/// Message content: a UTF-8 body for SMS, an envelope for MMS.
///
/// Untagged so that SMS payloads serialize as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsgContent {
    Text(String),
    Envelope(MmsEnvelope),
}

impl MsgContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MsgContent::Text(s) => Some(s),
            MsgContent::Envelope(_) => None,
        }
    }

    pub fn as_envelope(&self) -> Option<&MmsEnvelope> {
        match self {
            MsgContent::Text(_) => None,
            MsgContent::Envelope(env) => Some(env),
        }
    }
}

/// The in-flight message record.
///
/// `delivery` is present iff the message entered through the broker; its
/// presence selects the failure policy (reject-with-requeue vs republish).
#[derive(Clone, Serialize, Deserialize)]
pub struct MsgQueueItem {
    /// Correlation id attached at ingress.
    pub log_id: String,

    #[serde(rename = "type")]
    pub kind: MsgKind,

    pub from: String,

    pub to: String,

    pub content: MsgContent,

    /// Broker delivery handle; never serialized.
    #[serde(skip)]
    pub delivery: Option<Arc<dyn Delivery>>,

    /// Pre-resolved carrier tag, if routing already happened upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl MsgQueueItem {
    pub fn sms(from: impl Into<String>, to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            log_id: next_log_id(),
            kind: MsgKind::Sms,
            from: from.into(),
            to: to.into(),
            content: MsgContent::Text(body.into()),
            delivery: None,
            route: None,
        }
    }

    pub fn mms(from: impl Into<String>, to: impl Into<String>, envelope: MmsEnvelope) -> Self {
        Self {
            log_id: next_log_id(),
            kind: MsgKind::Mms,
            from: from.into(),
            to: to.into(),
            content: MsgContent::Envelope(envelope),
            delivery: None,
            route: None,
        }
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Whether the message entered through the broker.
    pub fn is_broker_born(&self) -> bool {
        self.delivery.is_some()
    }

    /// Canonical JSON payload for broker queues.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

// Equality ignores the delivery handle so that a republished copy compares
// equal to its origin.
impl PartialEq for MsgQueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.log_id == other.log_id
            && self.kind == other.kind
            && self.from == other.from
            && self.to == other.to
            && self.content == other.content
            && self.route == other.route
    }
}

// Manual Debug keeps the trait-object handle out of the derive.
impl fmt::Debug for MsgQueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgQueueItem")
            .field("log_id", &self.log_id)
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("broker_born", &self.is_broker_born())
            .field("route", &self.route)
            .finish()
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// Allocate a process-unique correlation id.
pub fn next_log_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{millis:x}-{seq:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sms_round_trips_through_json() {
        let msg = MsgQueueItem::sms("+15550999", "+15550001", "hi");
        let payload = msg.to_json().unwrap();
        let decoded = MsgQueueItem::from_json(&payload).unwrap();
        assert_eq!(msg, decoded);
        assert!(!decoded.is_broker_born());
    }

    #[test]
    fn sms_content_serializes_as_plain_string() {
        let msg = MsgQueueItem::sms("a", "b", "hello");
        let value: serde_json::Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["content"], serde_json::json!("hello"));
        assert_eq!(value["type"], serde_json::json!("sms"));
    }

    #[test]
    fn mms_round_trips_through_json() {
        let envelope = MmsEnvelope {
            headers: vec![("X-Mms-Message-Type".into(), "MM4_forward.REQ".into())],
            parts: vec![MmsPart {
                content_type: "text/plain".into(),
                body: b"picture day".to_vec(),
            }],
        };
        let msg = MsgQueueItem::mms("+15550999", "+15550001", envelope);
        let decoded = MsgQueueItem::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.content.as_envelope().unwrap().text(), "picture day");
    }

    #[test]
    fn log_ids_are_unique() {
        let a = next_log_id();
        let b = next_log_id();
        assert_ne!(a, b);
    }
}
