//! The central dispatcher.
//!
//! Two structurally identical loops drain the input channels; only the
//! direction of resolution differs. Every message leaves through exactly one
//! terminal action: sink into a protocol, ack, reject/requeue, or republish
//! onto the opposite queue.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, CARRIER_QUEUE, CLIENT_QUEUE};
use crate::carrier::{Carriers, OutboundMms, OutboundSms};
use crate::gateway::{AddressIndex, MsgKind, MsgQueueItem};
use crate::telemetry::counters;

use super::routes::{RouteKind, RouteTable};

/// Errors surfaced by the protocol sinks. All of them are transient from the
/// router's point of view: the message gets requeued.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no bound session for {0}")]
    NotBound(String),

    #[error("no MM4 peer for {0}")]
    NoPeer(String),

    #[error("peer send failed: {0}")]
    PeerSendFailed(String),
}

/// Delivery into live client connections (SMPP sessions, MM4 peers).
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send_smpp(&self, msg: &MsgQueueItem) -> Result<(), SinkError>;

    async fn send_mm4(&self, msg: &MsgQueueItem) -> Result<(), SinkError>;
}

/// The routing engine. Construct with [`Router::new`], then either drive
/// single messages (tests) or [`Router::spawn`] the channel loops.
pub struct Router {
    index: Arc<AddressIndex>,
    sink: Arc<dyn ClientSink>,
    broker: Arc<dyn Broker>,
    carriers: Arc<Carriers>,
    routes: RouteTable,
}

impl Router {
    pub fn new(
        index: Arc<AddressIndex>,
        sink: Arc<dyn ClientSink>,
        broker: Arc<dyn Broker>,
        carriers: Arc<Carriers>,
        routes: RouteTable,
    ) -> Arc<Self> {
        Arc::new(Self {
            index,
            sink,
            broker,
            carriers,
            routes,
        })
    }

    /// Spawn the two channel loops. Each is a single logical consumer;
    /// carrier dispatches fan out into per-message tasks so a slow HTTP
    /// call does not head-of-line block routing.
    pub fn spawn(
        self: &Arc<Self>,
        client_rx: mpsc::Receiver<MsgQueueItem>,
        carrier_rx: mpsc::Receiver<MsgQueueItem>,
        shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let client = {
            let router = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(router.client_loop(client_rx, shutdown))
        };
        let carrier = {
            let router = self.clone();
            tokio::spawn(router.carrier_loop(carrier_rx, shutdown))
        };
        (client, carrier)
    }

    async fn client_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<MsgQueueItem>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("client router started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("client router shutting down");
                    break;
                }

                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.route_client_bound(msg).await;
                }
            }
        }
    }

    async fn carrier_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<MsgQueueItem>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("carrier router started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!("carrier router shutting down");
                    break;
                }

                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let router = self.clone();
                    tokio::spawn(async move {
                        router.route_carrier_bound(msg).await;
                    });
                }
            }
        }
    }

    /// Client-bound resolution: in-process client delivery first, then the
    /// carrier bounce, otherwise unroutable.
    pub async fn route_client_bound(&self, msg: MsgQueueItem) {
        counters::inc_routed();

        if self.index.client_of(&msg.to).is_some() {
            let result = match msg.kind {
                MsgKind::Sms => self.sink.send_smpp(&msg).await,
                MsgKind::Mms => self.sink.send_mm4(&msg).await,
            };
            match result {
                Ok(()) => {
                    debug!(log_id = %msg.log_id, to = %msg.to, kind = %msg.kind, "delivered to client");
                    counters::inc_delivered_client();
                    self.ack(&msg).await;
                }
                Err(e) => {
                    warn!(log_id = %msg.log_id, to = %msg.to, error = %e, "client delivery failed, requeueing");
                    self.requeue(msg, CLIENT_QUEUE).await;
                }
            }
            return;
        }

        if let Some(carrier) = self.index.outbound_carrier(&msg.from) {
            debug!(log_id = %msg.log_id, carrier = %carrier, "bouncing to carrier queue");
            self.publish_onward(msg, CARRIER_QUEUE).await;
            return;
        }

        warn!(log_id = %msg.log_id, from = %msg.from, to = %msg.to, "unroutable message");
        counters::inc_unroutable();
        self.drop_error(&msg).await;
    }

    /// Carrier-bound resolution: pick the carrier tag, find a route, invoke
    /// the handler.
    pub async fn route_carrier_bound(&self, msg: MsgQueueItem) {
        counters::inc_routed();

        let carrier = msg
            .route
            .clone()
            .or_else(|| self.index.outbound_carrier(&msg.from))
            .or_else(|| self.index.carrier_of(&msg.to).ok());

        let Some(route) = self.routes.resolve(carrier.as_deref(), &msg.to) else {
            warn!(log_id = %msg.log_id, to = %msg.to, carrier = ?carrier, "no route for message");
            counters::inc_unroutable();
            self.drop_error(&msg).await;
            return;
        };

        match route.kind {
            RouteKind::Smpp => match self.sink.send_smpp(&msg).await {
                Ok(()) => {
                    counters::inc_delivered_client();
                    self.ack(&msg).await;
                }
                Err(e) => {
                    warn!(log_id = %msg.log_id, endpoint = %route.endpoint, error = %e, "smpp route failed, requeueing");
                    self.requeue(msg, CARRIER_QUEUE).await;
                }
            },
            RouteKind::Carrier => {
                let handler = match self.carriers.get(&route.endpoint) {
                    Ok(handler) => handler,
                    Err(e) => {
                        error!(log_id = %msg.log_id, error = %e, "carrier handler missing");
                        counters::inc_unroutable();
                        self.drop_error(&msg).await;
                        return;
                    }
                };

                let result = match msg.kind {
                    MsgKind::Sms => {
                        let sms = OutboundSms {
                            from: msg.from.clone(),
                            to: msg.to.clone(),
                            body: msg.content.as_text().unwrap_or_default().to_string(),
                        };
                        handler.send_sms(&sms).await
                    }
                    MsgKind::Mms => {
                        let mms = OutboundMms {
                            from: msg.from.clone(),
                            to: msg.to.clone(),
                            envelope: msg.content.as_envelope().cloned().unwrap_or_default(),
                        };
                        handler.send_mms(&mms).await
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(log_id = %msg.log_id, carrier = %route.endpoint, "dispatched to carrier");
                        counters::inc_delivered_carrier();
                        self.ack(&msg).await;
                    }
                    Err(e) => {
                        warn!(log_id = %msg.log_id, carrier = %route.endpoint, error = %e, "carrier dispatch failed, requeueing");
                        self.requeue(msg, CARRIER_QUEUE).await;
                    }
                }
            }
        }
    }

    /// Terminal: the message was sinked. Settle the broker delivery if one
    /// produced it.
    async fn ack(&self, msg: &MsgQueueItem) {
        if let Some(delivery) = &msg.delivery {
            if let Err(e) = delivery.ack(false).await {
                warn!(log_id = %msg.log_id, error = %e, "broker ack failed");
                counters::inc_broker_errors();
            }
        }
    }

    /// Terminal: transient failure. Broker-born messages stay in the broker
    /// via reject-with-requeue; locally-born messages are persisted into it.
    async fn requeue(&self, msg: MsgQueueItem, origin: &'static str) {
        counters::inc_requeued();

        if let Some(delivery) = &msg.delivery {
            if let Err(e) = delivery.reject(true).await {
                warn!(log_id = %msg.log_id, error = %e, "broker reject failed");
                counters::inc_broker_errors();
            }
            return;
        }

        self.publish_back(&msg, origin).await;
    }

    /// Terminal: publish the message onward to the opposite queue. Acks the
    /// inbound delivery on success so redelivery stops once the handoff is
    /// durable.
    async fn publish_onward(&self, msg: MsgQueueItem, queue: &'static str) {
        let payload = match msg.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(log_id = %msg.log_id, error = %e, "serialization failed");
                counters::inc_serialize_errors();
                self.drop_error(&msg).await;
                return;
            }
        };

        match self.broker.publish(queue, payload).await {
            Ok(()) => {
                counters::inc_published();
                self.ack(&msg).await;
            }
            Err(e) => {
                error!(log_id = %msg.log_id, queue, error = %e, "broker publish failed");
                counters::inc_broker_errors();
                self.drop_error(&msg).await;
            }
        }
    }

    /// Republish a locally-born message onto its originating queue.
    async fn publish_back(&self, msg: &MsgQueueItem, origin: &'static str) {
        let payload = match msg.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(log_id = %msg.log_id, error = %e, "serialization failed, message dropped");
                counters::inc_serialize_errors();
                counters::inc_dropped();
                return;
            }
        };

        if let Err(e) = self.broker.publish(origin, payload).await {
            error!(log_id = %msg.log_id, queue = origin, error = %e, "republish failed, message dropped");
            counters::inc_broker_errors();
            counters::inc_dropped();
        }
    }

    /// Terminal: unrecoverable here. A broker-born message goes back for
    /// redelivery so an operator can fix routing; a locally-born one is
    /// logged and discarded.
    async fn drop_error(&self, msg: &MsgQueueItem) {
        if let Some(delivery) = &msg.delivery {
            if let Err(e) = delivery.nack(false, true).await {
                warn!(log_id = %msg.log_id, error = %e, "broker nack failed");
                counters::inc_broker_errors();
            }
            return;
        }

        counters::inc_dropped();
        error!(log_id = %msg.log_id, from = %msg.from, to = %msg.to, "message dropped");
    }
}
