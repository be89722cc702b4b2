//! End-to-end routing behavior: direction resolution and the terminal-action
//! contract, driven through stub sinks, recording deliveries and stub
//! carrier handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use smsgated::broker::{
    spawn_consumer, Broker, BrokerError, Delivery, DeliveryStream, MemoryBroker, CARRIER_QUEUE,
    CLIENT_QUEUE,
};
use smsgated::carrier::{CarrierError, CarrierHandler, Carriers, OutboundMms, OutboundSms};
use smsgated::gateway::{
    password_digest, AddressIndex, Client, ClientNumber, MsgQueueItem, NumberMatch,
};
use smsgated::router::{ClientSink, Route, RouteKind, RouteTable, Router, SinkError};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Client sink that records calls and fails on demand.
#[derive(Default)]
struct StubSink {
    fail: AtomicBool,
    smpp_sent: Mutex<Vec<MsgQueueItem>>,
    mm4_sent: Mutex<Vec<MsgQueueItem>>,
}

#[async_trait]
impl ClientSink for StubSink {
    async fn send_smpp(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::NotBound(msg.to.clone()));
        }
        self.smpp_sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn send_mm4(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::NoPeer(msg.to.clone()));
        }
        self.mm4_sent.lock().unwrap().push(msg.clone());
        Ok(())
    }
}

/// Broker that records publishes instead of queueing them.
#[derive(Default)]
struct RecordingBroker {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingBroker {
    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), payload));
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        Err(BrokerError::UnknownQueue(queue.to_string()))
    }
}

/// Delivery handle that records its terminal calls.
#[derive(Default)]
struct RecordingDelivery {
    calls: Mutex<Vec<String>>,
}

impl RecordingDelivery {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn ack(&self, multiple: bool) -> Result<(), BrokerError> {
        self.calls.lock().unwrap().push(format!("ack({multiple})"));
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("reject({requeue})"));
        Ok(())
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), BrokerError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("nack({multiple},{requeue})"));
        Ok(())
    }
}

/// Carrier handler that counts sends and fails on demand.
#[derive(Default)]
struct StubCarrier {
    fail: AtomicBool,
    sms_sent: Mutex<Vec<OutboundSms>>,
    mms_sent: Mutex<Vec<OutboundMms>>,
}

#[async_trait]
impl CarrierHandler for StubCarrier {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<(), CarrierError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CarrierError::Rejected {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.sms_sent.lock().unwrap().push(sms.clone());
        Ok(())
    }

    async fn send_mms(&self, mms: &OutboundMms) -> Result<(), CarrierError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CarrierError::Rejected {
                status: 503,
                message: "unavailable".into(),
            });
        }
        self.mms_sent.lock().unwrap().push(mms.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn client(id: u64, username: &str, number: &str) -> Client {
    Client {
        id,
        username: username.into(),
        password_hash: password_digest("secret"),
        mm4_endpoint: None,
        numbers: vec![ClientNumber {
            number: number.into(),
            client_id: id,
            carrier: "twilio".into(),
        }],
    }
}

fn index_with(clients: Vec<Client>) -> Arc<AddressIndex> {
    Arc::new(AddressIndex::new(clients, NumberMatch::Substring))
}

struct Harness {
    router: Arc<Router>,
    sink: Arc<StubSink>,
    broker: Arc<RecordingBroker>,
    carrier: Arc<StubCarrier>,
}

fn harness(index: Arc<AddressIndex>, sink_fails: bool, carrier_fails: bool) -> Harness {
    let sink = Arc::new(StubSink::default());
    sink.fail.store(sink_fails, Ordering::SeqCst);
    let broker = Arc::new(RecordingBroker::default());
    let carrier = Arc::new(StubCarrier::default());
    carrier.fail.store(carrier_fails, Ordering::SeqCst);

    let mut carriers = Carriers::new();
    let handler: Arc<dyn CarrierHandler> = carrier.clone();
    carriers.insert("twilio", handler);

    let routes = RouteTable::new(vec![Route {
        prefix: "".into(),
        kind: RouteKind::Carrier,
        endpoint: "twilio".into(),
    }]);

    let router = Router::new(
        index,
        sink.clone(),
        broker.clone(),
        Arc::new(carriers),
        routes,
    );

    Harness {
        router,
        sink,
        broker,
        carrier,
    }
}

// ---------------------------------------------------------------------------
// Client-bound scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_bound_sms_with_live_session_sinks_without_publish() {
    let h = harness(
        index_with(vec![client(1, "client_a", "+15550001")]),
        false,
        false,
    );

    let msg = MsgQueueItem::sms("+15550999", "+15550001", "hi");
    h.router.route_client_bound(msg.clone()).await;

    let sent = h.sink.smpp_sent.lock().unwrap().clone();
    assert_eq!(sent, vec![msg]);
    assert_eq!(sent[0].content.as_text(), Some("hi"));
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn client_bound_sms_without_session_republishes_to_client_queue() {
    let h = harness(
        index_with(vec![client(1, "client_a", "+15550001")]),
        true,
        false,
    );

    let msg = MsgQueueItem::sms("+15550999", "+15550001", "hi");
    h.router.route_client_bound(msg.clone()).await;

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, CLIENT_QUEUE);

    // Local-origin requeue round-trips: the copy parses back equal.
    let decoded = MsgQueueItem::from_json(&published[0].1).unwrap();
    assert_eq!(decoded, msg);
    assert!(!decoded.is_broker_born());
}

#[tokio::test]
async fn broker_born_sms_without_session_rejects_with_requeue() {
    let h = harness(
        index_with(vec![client(1, "client_a", "+15550001")]),
        true,
        false,
    );

    let delivery = Arc::new(RecordingDelivery::default());
    let msg =
        MsgQueueItem::sms("+15550999", "+15550001", "hi").with_delivery(delivery.clone());
    h.router.route_client_bound(msg).await;

    // Exactly one terminal action, and it keeps the message in the broker.
    assert_eq!(delivery.calls(), vec!["reject(true)".to_string()]);
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn outbound_sms_bounces_to_carrier_queue() {
    // Source belongs to a client; destination is nobody we know.
    let h = harness(
        index_with(vec![client(2, "client_b", "+15550999")]),
        false,
        false,
    );

    let msg = MsgQueueItem::sms("+15550999", "+15550001", "out");
    h.router.route_client_bound(msg.clone()).await;

    assert!(h.sink.smpp_sent.lock().unwrap().is_empty());
    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, CARRIER_QUEUE);
    assert_eq!(MsgQueueItem::from_json(&published[0].1).unwrap(), msg);
}

#[tokio::test]
async fn direction_rule_prefers_client_path() {
    // Destination is a known client number AND the source matches another
    // client's number: the client path must win, so the failure republishes
    // to the client queue, never the carrier queue.
    let h = harness(
        index_with(vec![
            client(1, "client_a", "+15550001"),
            client(2, "client_b", "+15550999"),
        ]),
        true,
        false,
    );

    let msg = MsgQueueItem::sms("+15550999", "+15550001", "hi");
    h.router.route_client_bound(msg).await;

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, CLIENT_QUEUE);
}

#[tokio::test]
async fn client_bound_mms_goes_through_mm4_sink() {
    let h = harness(
        index_with(vec![client(1, "client_a", "+15550001")]),
        false,
        false,
    );

    let msg = MsgQueueItem::mms("+15550999", "+15550001", Default::default());
    h.router.route_client_bound(msg.clone()).await;

    assert_eq!(h.sink.mm4_sent.lock().unwrap().clone(), vec![msg]);
    assert!(h.sink.smpp_sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unroutable_broker_born_message_nacks_for_redelivery() {
    let h = harness(
        index_with(vec![]),
        false,
        false,
    );

    let delivery = Arc::new(RecordingDelivery::default());
    let msg = MsgQueueItem::sms("+10000000", "+10000001", "lost").with_delivery(delivery.clone());
    h.router.route_client_bound(msg).await;

    assert_eq!(delivery.calls(), vec!["nack(false,true)".to_string()]);
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn unroutable_local_message_is_dropped_silently_toward_broker() {
    let h = harness(
        index_with(vec![]),
        false,
        false,
    );

    let msg = MsgQueueItem::sms("+10000000", "+10000001", "lost");
    h.router.route_client_bound(msg).await;

    assert!(h.broker.published().is_empty());
    assert!(h.sink.smpp_sent.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Carrier-bound scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn carrier_dispatch_success_acks() {
    let h = harness(
        index_with(vec![]),
        false,
        false,
    );

    let delivery = Arc::new(RecordingDelivery::default());
    let mut msg =
        MsgQueueItem::sms("+15550999", "+15550001", "to the world").with_delivery(delivery.clone());
    msg.route = Some("twilio".into());

    h.router.route_carrier_bound(msg).await;

    assert_eq!(delivery.calls(), vec!["ack(false)".to_string()]);
    let sent = h.carrier.sms_sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "+15550001");
    assert_eq!(sent[0].body, "to the world");
}

#[tokio::test]
async fn carrier_dispatch_failure_rejects_with_requeue() {
    let h = harness(index_with(vec![]), false, true);

    let delivery = Arc::new(RecordingDelivery::default());
    let mut msg =
        MsgQueueItem::sms("+15550999", "+15550001", "retry me").with_delivery(delivery.clone());
    msg.route = Some("twilio".into());

    h.router.route_carrier_bound(msg).await;

    assert_eq!(delivery.calls(), vec!["reject(true)".to_string()]);
    assert!(h.carrier.sms_sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn carrier_tag_resolves_from_source_when_not_preresolved() {
    let h = harness(
        index_with(vec![client(2, "client_b", "5550999")]),
        false,
        false,
    );

    // Stored "5550999" matches the fuller source by containment.
    let msg = MsgQueueItem::sms("+15550999", "+15550001", "out");
    h.router.route_carrier_bound(msg).await;

    assert_eq!(h.carrier.sms_sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn carrier_mms_dispatch_carries_envelope() {
    let h = harness(
        index_with(vec![]),
        false,
        false,
    );

    let mut msg = MsgQueueItem::mms(
        "+15550999",
        "+15550001",
        smsgated::gateway::MmsEnvelope {
            headers: vec![("X-Media-Url".into(), "https://cdn.example/cat.jpg".into())],
            parts: vec![],
        },
    );
    msg.route = Some("twilio".into());

    h.router.route_carrier_bound(msg).await;

    let sent = h.carrier.mms_sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].envelope.header("X-Media-Url"),
        Some("https://cdn.example/cat.jpg")
    );
}

// ---------------------------------------------------------------------------
// Broker round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn republished_message_redelivers_with_a_live_handle() {
    // A locally-born failure republishes into the real broker; the consumer
    // hands it back with a delivery handle and the same content.
    let index = index_with(vec![client(1, "client_a", "+15550001")]);
    let sink = Arc::new(StubSink::default());
    sink.fail.store(true, Ordering::SeqCst);
    let broker = MemoryBroker::new(&[CLIENT_QUEUE, CARRIER_QUEUE]);
    let broker_dyn: Arc<dyn Broker> = broker.clone();

    let router = Router::new(
        index,
        sink,
        broker_dyn.clone(),
        Arc::new(Carriers::new()),
        RouteTable::default(),
    );

    let msg = MsgQueueItem::sms("+15550999", "+15550001", "round trip");
    router.route_client_bound(msg.clone()).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_consumer(broker_dyn, CLIENT_QUEUE, tx, shutdown_rx);

    let redelivered = rx.recv().await.unwrap();
    assert_eq!(redelivered, msg);
    assert!(redelivered.is_broker_born());
}
