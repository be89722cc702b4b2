//! TCP accept loop for the SMPP listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::gateway::{AddressIndex, MsgQueueItem};
use crate::telemetry::counters;

use super::registry::SessionRegistry;
use super::session::SmppSession;

pub struct SmppListener {
    name: String,
    address: SocketAddr,
    connection_limit: Arc<Semaphore>,
    index: Arc<AddressIndex>,
    registry: Arc<SessionRegistry>,
    client_tx: mpsc::Sender<MsgQueueItem>,
}

impl SmppListener {
    pub fn new(
        name: impl Into<String>,
        address: SocketAddr,
        max_connections: usize,
        index: Arc<AddressIndex>,
        registry: Arc<SessionRegistry>,
        client_tx: mpsc::Sender<MsgQueueItem>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            index,
            registry,
            client_tx,
        })
    }

    /// Run the accept loop until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;

        info!(
            listener = %self.name,
            address = %self.address,
            max_connections = self.connection_limit.available_permits(),
            "smpp listener started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!(listener = %self.name, "smpp listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.handle_accept(stream, peer_addr, shutdown.clone());
                        }
                        Err(e) => {
                            error!(listener = %self.name, error = %e, "accept error");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_accept(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let permit = match self.connection_limit.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    listener = %self.name,
                    peer = %peer_addr,
                    "connection limit reached, rejecting"
                );
                return None;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        counters::inc_connections();
        let span = span!(Level::INFO, "smpp_conn", listener = %self.name, peer = %peer_addr);
        let listener = self.clone();

        Some(tokio::spawn(
            async move {
                let _permit = permit;
                debug!("connection accepted");

                let session = SmppSession::new(
                    peer_addr.to_string(),
                    listener.index.clone(),
                    listener.registry.clone(),
                    listener.client_tx.clone(),
                );

                if let Err(e) = session.run(stream, shutdown).await {
                    debug!(error = %e, "session ended with error");
                }
            }
            .instrument(span),
        ))
    }
}
