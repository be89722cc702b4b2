//! Registry of bound SMPP sessions.
//!
//! Keyed by client username. At most one active session per username; the
//! latest bind replaces any previous entry. Outbound SMS delivery resolves
//! the destination's owning client through the address index and hands the
//! message to that client's live session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::gateway::{AddressIndex, Client, MsgQueueItem};
use crate::router::SinkError;
use crate::telemetry::counters;

/// An SMS on its way out to a bound peer.
#[derive(Debug, Clone)]
pub struct OutboundDeliver {
    pub from: String,
    pub to: String,
    pub body: Vec<u8>,
}

/// One live bound session.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    pub client: Arc<Client>,
    pub bound_at: Instant,
    deliver_tx: mpsc::Sender<OutboundDeliver>,
}

impl SessionHandle {
    /// Hand an outbound SMS to the session's write loop.
    pub async fn deliver(&self, out: OutboundDeliver) -> Result<(), SinkError> {
        self.deliver_tx
            .send(out)
            .await
            .map_err(|_| SinkError::PeerSendFailed("session channel closed".into()))
    }
}

/// Username -> live session. Write lock only when (un)binding.
pub struct SessionRegistry {
    index: Arc<AddressIndex>,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(index: Arc<AddressIndex>) -> Arc<Self> {
        Arc::new(Self {
            index,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a freshly bound session, replacing any prior entry for the
    /// same username.
    pub async fn register(
        &self,
        client: Arc<Client>,
        deliver_tx: mpsc::Sender<OutboundDeliver>,
    ) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            client: client.clone(),
            bound_at: Instant::now(),
            deliver_tx,
        });

        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(client.username.clone(), handle.clone()) {
            info!(
                username = %client.username,
                previous_bound_secs = previous.bound_at.elapsed().as_secs(),
                "session replaced by newer bind"
            );
        } else {
            debug!(username = %client.username, "session registered");
        }
        counters::inc_binds();
        handle
    }

    /// Remove a session on socket close. A stale handle (already replaced by
    /// a newer bind) leaves the current entry untouched.
    pub async fn unregister(&self, handle: &SessionHandle) {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(&handle.client.username);
        if current.is_some_and(|c| c.id == handle.id) {
            sessions.remove(&handle.client.username);
            debug!(username = %handle.client.username, "session unregistered");
        }
    }

    /// Live session owning the destination number.
    pub async fn find_session_for_number(
        &self,
        to: &str,
    ) -> Result<Arc<SessionHandle>, SinkError> {
        let client = self
            .index
            .client_of(to)
            .ok_or_else(|| SinkError::NotBound(to.to_string()))?;

        let sessions = self.sessions.read().await;
        sessions
            .get(&client.username)
            .cloned()
            .ok_or_else(|| SinkError::NotBound(to.to_string()))
    }

    /// Write an SMS to the bound peer owning `msg.to`.
    pub async fn send_smpp(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        let session = self.find_session_for_number(&msg.to).await?;
        let out = OutboundDeliver {
            from: msg.from.clone(),
            to: msg.to.clone(),
            body: msg
                .content
                .as_text()
                .map(|t| t.as_bytes().to_vec())
                .unwrap_or_default(),
        };
        if let Err(e) = session.deliver(out).await {
            warn!(username = %session.client.username, "session write channel closed");
            return Err(e);
        }
        counters::inc_delivers();
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
