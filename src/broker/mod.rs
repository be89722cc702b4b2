//! Broker adapter: durable queues `client` and `carrier`.
//!
//! The router publishes and consumes through the narrow [`Broker`] trait and
//! settles consumed messages through [`Delivery`] handles. The in-process
//! implementation lives in [`memory`]; a transport-backed adapter would fill
//! the same traits.

mod consumer;
mod memory;

pub use consumer::spawn_consumer;
pub use memory::MemoryBroker;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Queue feeding messages back toward connected clients.
pub const CLIENT_QUEUE: &str = "client";

/// Queue feeding messages toward upstream carriers.
pub const CARRIER_QUEUE: &str = "carrier";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("queue closed: {0}")]
    Closed(String),

    #[error("consumer already attached to queue: {0}")]
    ConsumerTaken(String),

    #[error("delivery already settled")]
    AlreadySettled,
}

/// A consumed payload with its settlement handle.
pub type DeliveryStream = mpsc::UnboundedReceiver<(Vec<u8>, Arc<dyn Delivery>)>;

/// Narrow broker capability the router depends on.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fire-and-forget publish onto a queue.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Attach the (single) consumer for a queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;
}

/// Settlement token for one consumed message. Supports exactly one terminal
/// call; later calls fail with [`BrokerError::AlreadySettled`].
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn ack(&self, multiple: bool) -> Result<(), BrokerError>;

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), BrokerError>;
}
