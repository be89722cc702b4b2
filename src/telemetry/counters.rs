//! Process-wide counters. Coarse-grained, low overhead.

use std::sync::atomic::{AtomicU64, Ordering};

static CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static BINDS: AtomicU64 = AtomicU64::new(0);
static AUTH_FAILURES: AtomicU64 = AtomicU64::new(0);
static SUBMITS: AtomicU64 = AtomicU64::new(0);
static DELIVERS: AtomicU64 = AtomicU64::new(0);

static ROUTED: AtomicU64 = AtomicU64::new(0);
static DELIVERED_CLIENT: AtomicU64 = AtomicU64::new(0);
static DELIVERED_CARRIER: AtomicU64 = AtomicU64::new(0);
static REQUEUED: AtomicU64 = AtomicU64::new(0);
static DROPPED: AtomicU64 = AtomicU64::new(0);
static UNROUTABLE: AtomicU64 = AtomicU64::new(0);

static PUBLISHED: AtomicU64 = AtomicU64::new(0);
static BROKER_CONSUMED: AtomicU64 = AtomicU64::new(0);
static BROKER_ERRORS: AtomicU64 = AtomicU64::new(0);
static BROKER_DECODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static SERIALIZE_ERRORS: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn inc_connections() {
    CONNECTIONS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_binds() {
    BINDS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_auth_failures() {
    AUTH_FAILURES.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_submits() {
    SUBMITS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_delivers() {
    DELIVERS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_routed() {
    ROUTED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_delivered_client() {
    DELIVERED_CLIENT.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_delivered_carrier() {
    DELIVERED_CARRIER.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_requeued() {
    REQUEUED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_dropped() {
    DROPPED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_unroutable() {
    UNROUTABLE.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_published() {
    PUBLISHED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_broker_consumed() {
    BROKER_CONSUMED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_broker_errors() {
    BROKER_ERRORS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_broker_decode_errors() {
    BROKER_DECODE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn inc_serialize_errors() {
    SERIALIZE_ERRORS.fetch_add(1, Ordering::Relaxed);
}

/// Plain-text snapshot, one counter per line.
pub fn snapshot() -> String {
    format!(
        "smsgated_connections {}\nsmsgated_binds {}\nsmsgated_auth_failures {}\nsmsgated_submits {}\nsmsgated_delivers {}\nsmsgated_routed {}\nsmsgated_delivered_client {}\nsmsgated_delivered_carrier {}\nsmsgated_requeued {}\nsmsgated_dropped {}\nsmsgated_unroutable {}\nsmsgated_published {}\nsmsgated_broker_consumed {}\nsmsgated_broker_errors {}\nsmsgated_broker_decode_errors {}\nsmsgated_serialize_errors {}\n",
        CONNECTIONS.load(Ordering::Relaxed),
        BINDS.load(Ordering::Relaxed),
        AUTH_FAILURES.load(Ordering::Relaxed),
        SUBMITS.load(Ordering::Relaxed),
        DELIVERS.load(Ordering::Relaxed),
        ROUTED.load(Ordering::Relaxed),
        DELIVERED_CLIENT.load(Ordering::Relaxed),
        DELIVERED_CARRIER.load(Ordering::Relaxed),
        REQUEUED.load(Ordering::Relaxed),
        DROPPED.load(Ordering::Relaxed),
        UNROUTABLE.load(Ordering::Relaxed),
        PUBLISHED.load(Ordering::Relaxed),
        BROKER_CONSUMED.load(Ordering::Relaxed),
        BROKER_ERRORS.load(Ordering::Relaxed),
        BROKER_DECODE_ERRORS.load(Ordering::Relaxed),
        SERIALIZE_ERRORS.load(Ordering::Relaxed),
    )
}
