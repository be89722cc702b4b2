//! Composition root.
//!
//! Builds the address index, session registry, broker, carrier registry and
//! route table from config, wires the router's channels, and runs listeners
//! until a shutdown signal arrives. The router itself only ever sees the
//! narrow capabilities assembled here.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::broker::{spawn_consumer, Broker, MemoryBroker, CARRIER_QUEUE, CLIENT_QUEUE};
use crate::carrier::{CarrierHandler, Carriers, TwilioHandler};
use crate::config::{CarrierConfig, CarrierKind, ClientConfig, Config};
use crate::gateway::{AddressIndex, Client, ClientNumber, MsgQueueItem};
use crate::listener::{SessionRegistry, SmppListener};
use crate::mm4::{Mm4Listener, Mm4Outbound};
use crate::router::{ClientSink, Route, RouteTable, Router, SinkError};

use super::shutdown::Shutdown;

/// The gateway process.
pub struct Server {
    config: Arc<Config>,
    shutdown: Arc<Shutdown>,
}

/// Live protocol sinks handed to the router.
struct ProtocolSinks {
    smpp: Arc<SessionRegistry>,
    mm4: Arc<Mm4Outbound>,
}

#[async_trait]
impl ClientSink for ProtocolSinks {
    async fn send_smpp(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        self.smpp.send_smpp(msg).await
    }

    async fn send_mm4(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        self.mm4.send_mm4(msg).await
    }
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            config: Arc::new(config),
            shutdown: Shutdown::new(),
        })
    }

    /// Run until SIGINT/SIGTERM, then drain.
    pub async fn run(self) -> Result<()> {
        let settings = &self.config.settings;

        let index = Arc::new(AddressIndex::new(
            build_clients(&self.config.clients),
            settings.number_match,
        ));
        let registry = SessionRegistry::new(index.clone());
        let mm4_out = Mm4Outbound::new(index.clone(), settings.mm4_timeout);
        let sinks: Arc<dyn ClientSink> = Arc::new(ProtocolSinks {
            smpp: registry.clone(),
            mm4: mm4_out,
        });

        let broker = MemoryBroker::new(&[CLIENT_QUEUE, CARRIER_QUEUE]);
        let carriers = Arc::new(build_carriers(&self.config.carriers)?);
        let routes = RouteTable::new(
            self.config
                .routes
                .iter()
                .map(|r| Route {
                    prefix: r.prefix.clone(),
                    kind: r.kind,
                    endpoint: r.endpoint.clone(),
                })
                .collect(),
        );

        info!(
            clients = self.config.clients.len(),
            carriers = carriers.len(),
            routes = routes.len(),
            "gateway assembled"
        );

        let (client_tx, client_rx) = mpsc::channel(settings.channel_capacity);
        let (carrier_tx, carrier_rx) = mpsc::channel(settings.channel_capacity);

        // Broker subscriptions feed the router channels.
        let broker_dyn: Arc<dyn Broker> = broker.clone();
        spawn_consumer(
            broker_dyn.clone(),
            CLIENT_QUEUE,
            client_tx.clone(),
            self.shutdown.subscribe(),
        );
        spawn_consumer(
            broker_dyn.clone(),
            CARRIER_QUEUE,
            carrier_tx.clone(),
            self.shutdown.subscribe(),
        );

        let router = Router::new(index.clone(), sinks, broker_dyn, carriers, routes);
        let (client_loop, carrier_loop) =
            router.spawn(client_rx, carrier_rx, self.shutdown.subscribe());

        // Listeners.
        let smpp = SmppListener::new(
            self.config.listeners.smpp.name.clone(),
            self.config.listeners.smpp.address,
            self.config.listeners.smpp.max_connections,
            index,
            registry,
            client_tx.clone(),
        );
        {
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = smpp.run(shutdown).await {
                    error!(error = %e, "smpp listener failed");
                }
            });
        }

        let mm4 = Mm4Listener::new(
            self.config.listeners.mm4.name.clone(),
            self.config.listeners.mm4.address,
            client_tx.clone(),
        );
        {
            let shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = mm4.run(shutdown).await {
                    error!(error = %e, "mm4 listener failed");
                }
            });
        }

        info!(
            smpp = %self.config.listeners.smpp.address,
            mm4 = %self.config.listeners.mm4.address,
            "gateway started"
        );

        wait_for_signal().await;
        info!("shutdown signal received");
        self.shutdown.begin();

        // Let the router loops drain what they already pulled; the broker
        // redelivers anything still queued.
        let drain = self.config.settings.drain_timeout;
        if timeout(drain, async {
            let _ = client_loop.await;
            let _ = carrier_loop.await;
        })
        .await
        .is_err()
        {
            warn!(drain_secs = drain.as_secs(), "drain timeout expired");
        }

        info!("gateway stopped");
        Ok(())
    }
}

/// Materialize client records, assigning process-local ids.
fn build_clients(configs: &[ClientConfig]) -> Vec<Client> {
    configs
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let id = i as u64 + 1;
            Client {
                id,
                username: c.username.clone(),
                password_hash: c.password_hash.clone(),
                mm4_endpoint: c.mm4_endpoint.clone(),
                numbers: c
                    .numbers
                    .iter()
                    .map(|n| ClientNumber {
                        number: n.number.clone(),
                        client_id: id,
                        carrier: n.carrier.clone(),
                    })
                    .collect(),
            }
        })
        .collect()
}

fn build_carriers(configs: &[CarrierConfig]) -> Result<Carriers> {
    let mut carriers = Carriers::new();
    for config in configs {
        let handler: Arc<dyn CarrierHandler> = match config.kind {
            CarrierKind::Twilio => Arc::new(
                TwilioHandler::new(
                    config.account_sid.clone(),
                    config.auth_token.clone(),
                    config.timeout,
                )
                .with_context(|| format!("failed to build carrier '{}'", config.name))?,
            ),
        };
        carriers.insert(config.name.clone(), handler);
        info!(carrier = %config.name, kind = ?config.kind, "carrier registered");
    }
    Ok(carriers)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
