//! In-process broker backed by per-queue unbounded channels.
//!
//! At-least-once: reject/nack with `requeue` pushes the payload back onto
//! its queue, so an unsettled failure is always redelivered. A settled flag
//! on each delivery enforces the single-terminal-action contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use super::{Broker, BrokerError, Delivery, DeliveryStream};

struct Queue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// Broker living inside the gateway process. Durability is bounded by the
/// process lifetime; the trait seam is what a transport-backed adapter
/// replaces.
pub struct MemoryBroker {
    queues: HashMap<String, Queue>,
}

impl MemoryBroker {
    pub fn new(queue_names: &[&str]) -> Arc<Self> {
        let mut queues = HashMap::new();
        for name in queue_names {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(
                name.to_string(),
                Queue {
                    tx,
                    rx: Mutex::new(Some(rx)),
                },
            );
        }
        Arc::new(Self { queues })
    }

    fn queue(&self, name: &str) -> Result<&Queue, BrokerError> {
        self.queues
            .get(name)
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let q = self.queue(queue)?;
        trace!(queue, bytes = payload.len(), "publish");
        q.tx
            .send(payload)
            .map_err(|_| BrokerError::Closed(queue.to_string()))
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let q = self.queue(queue)?;
        let mut raw_rx = q
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| BrokerError::ConsumerTaken(queue.to_string()))?;

        let requeue_tx = q.tx.clone();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            while let Some(payload) = raw_rx.recv().await {
                let delivery: Arc<dyn Delivery> = Arc::new(MemoryDelivery {
                    payload: payload.clone(),
                    requeue_tx: requeue_tx.clone(),
                    settled: AtomicBool::new(false),
                });
                if out_tx.send((payload, delivery)).is_err() {
                    debug!(queue = %queue_name, "consumer dropped, stopping relay");
                    break;
                }
            }
        });

        Ok(out_rx)
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    requeue_tx: mpsc::UnboundedSender<Vec<u8>>,
    settled: AtomicBool,
}

impl MemoryDelivery {
    fn settle(&self) -> Result<(), BrokerError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AlreadySettled);
        }
        Ok(())
    }

    fn redeliver(&self) {
        // A closed queue means shutdown; the payload is gone with the process.
        let _ = self.requeue_tx.send(self.payload.clone());
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    async fn ack(&self, _multiple: bool) -> Result<(), BrokerError> {
        self.settle()
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.settle()?;
        if requeue {
            self.redeliver();
        }
        Ok(())
    }

    async fn nack(&self, _multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        self.settle()?;
        if requeue {
            self.redeliver();
        }
        Ok(())
    }
}
