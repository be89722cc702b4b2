//! Upstream carrier adapters.
//!
//! One handler per carrier tag, polymorphic over a two-operation capability:
//! send an SMS, send an MMS. The router only ever sees the trait.

mod twilio;

pub use twilio::TwilioHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::gateway::MmsEnvelope;

/// An SMS ready for an upstream API call.
#[derive(Debug, Clone)]
pub struct OutboundSms {
    pub from: String,
    pub to: String,
    pub body: String,
}

/// An MMS ready for an upstream API call.
#[derive(Debug, Clone)]
pub struct OutboundMms {
    pub from: String,
    pub to: String,
    pub envelope: MmsEnvelope,
}

#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("carrier request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("carrier rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unknown carrier: {0}")]
    Unknown(String),

    #[error("message not sendable via this carrier: {0}")]
    Unsendable(String),
}

/// Vendor capability interface.
#[async_trait]
pub trait CarrierHandler: Send + Sync {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<(), CarrierError>;

    async fn send_mms(&self, mms: &OutboundMms) -> Result<(), CarrierError>;
}

/// Tag-keyed handler registry. An unknown tag is an error at routing time.
#[derive(Default)]
pub struct Carriers {
    handlers: HashMap<String, Arc<dyn CarrierHandler>>,
}

impl Carriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>, handler: Arc<dyn CarrierHandler>) {
        self.handlers.insert(tag.into(), handler);
    }

    pub fn get(&self, tag: &str) -> Result<Arc<dyn CarrierHandler>, CarrierError> {
        self.handlers
            .get(tag)
            .cloned()
            .ok_or_else(|| CarrierError::Unknown(tag.to_string()))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
