//! Queue subscription tasks feeding the router channels.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::MsgQueueItem;
use crate::telemetry::counters;

use super::Broker;

/// Spawn the consumer task for one queue. Each payload is decoded into a
/// `MsgQueueItem`, gets its delivery handle attached, and is forwarded to
/// the router channel.
pub fn spawn_consumer(
    broker: Arc<dyn Broker>,
    queue: &'static str,
    router_tx: mpsc::Sender<MsgQueueItem>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match broker.consume(queue).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(queue, error = %e, "failed to attach queue consumer");
                return;
            }
        };

        info!(queue, "queue consumer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!(queue, "queue consumer shutting down");
                    break;
                }

                next = stream.recv() => {
                    let Some((payload, delivery)) = next else {
                        debug!(queue, "queue stream ended");
                        break;
                    };

                    let msg = match MsgQueueItem::from_json(&payload) {
                        Ok(msg) => msg.with_delivery(delivery),
                        Err(e) => {
                            // Poison payload: it can never route, so park it
                            // out of the queue rather than redeliver forever.
                            warn!(queue, error = %e, "undecodable payload discarded");
                            counters::inc_broker_decode_errors();
                            let _ = delivery.reject(false).await;
                            continue;
                        }
                    };

                    counters::inc_broker_consumed();
                    if router_tx.send(msg).await.is_err() {
                        debug!(queue, "router channel closed");
                        break;
                    }
                }
            }
        }
    })
}
