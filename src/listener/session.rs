//! SMPP session state machine.
//!
//! Per connection: AwaitBind until a valid bind PDU authenticates, then a
//! Bound loop that turns submit_sm into router messages and writes queued
//! deliver_sm PDUs. Authentication failure closes the socket without
//! producing a message.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::gateway::{AddressIndex, MsgQueueItem};
use crate::smpp::{
    BindRequest, BindResponse, CodecError, CommandStatus, Frame, MessageIdBody, Pdu, ShortMessage,
    SmppCodec,
};
use crate::telemetry::counters;

use super::registry::{OutboundDeliver, SessionRegistry};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Capacity of the per-session outbound deliver queue.
const DELIVER_QUEUE: usize = 64;

enum Action {
    Continue,
    Close,
}

pub struct SmppSession {
    peer: String,
    index: Arc<AddressIndex>,
    registry: Arc<SessionRegistry>,
    client_tx: mpsc::Sender<MsgQueueItem>,
    sequence: AtomicU32,
}

impl SmppSession {
    pub fn new(
        peer: impl Into<String>,
        index: Arc<AddressIndex>,
        registry: Arc<SessionRegistry>,
        client_tx: mpsc::Sender<MsgQueueItem>,
    ) -> Self {
        Self {
            peer: peer.into(),
            index,
            registry,
            client_tx,
            sequence: AtomicU32::new(1),
        }
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Run the session until the peer disconnects or shutdown begins.
    pub async fn run<T>(
        &self,
        stream: T,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, SmppCodec::new());

        // AwaitBind: the first PDU must be a bind request.
        let (handle, mut deliver_rx) = loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!(peer = %self.peer, "closing unbound session on shutdown");
                    return Ok(());
                }

                frame = framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            warn!(peer = %self.peer, error = %e, "decode error before bind");
                            return Err(e.into());
                        }
                        None => return Ok(()),
                    };

                    match frame.body {
                        Pdu::BindTransmitter(ref bind)
                        | Pdu::BindReceiver(ref bind)
                        | Pdu::BindTransceiver(ref bind) => {
                            match self.try_bind(&mut framed, &frame, bind).await? {
                                Some(bound) => break bound,
                                None => return Ok(()),
                            }
                        }
                        other => {
                            warn!(
                                peer = %self.peer,
                                command = format_args!("{:#010x}", other.command_id()),
                                "expected bind, closing"
                            );
                            return Ok(());
                        }
                    }
                }
            }
        };

        let username = handle.client.username.clone();
        info!(peer = %self.peer, username = %username, "session bound");

        // Bound: interleave inbound PDUs with outbound deliver_sm writes.
        let result = self
            .bound_loop(&mut framed, &mut deliver_rx, &mut shutdown)
            .await;

        self.registry.unregister(&handle).await;
        info!(peer = %self.peer, username = %username, "session closed");
        result
    }

    /// Validate bind credentials; on success register the session and answer
    /// with the matching response. On failure close without responding.
    async fn try_bind<T>(
        &self,
        framed: &mut Framed<T, SmppCodec>,
        frame: &Frame,
        bind: &BindRequest,
    ) -> Result<Option<(Arc<super::SessionHandle>, mpsc::Receiver<OutboundDeliver>)>, SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(client) = self.index.authenticate(&bind.system_id, &bind.password) else {
            warn!(peer = %self.peer, system_id = %bind.system_id, "bind authentication failed");
            counters::inc_auth_failures();
            return Ok(None);
        };

        let (deliver_tx, deliver_rx) = mpsc::channel(DELIVER_QUEUE);
        let handle = self.registry.register(client, deliver_tx).await;

        let resp_body = BindResponse {
            system_id: bind.system_id.clone(),
        };
        let resp = match frame.body {
            Pdu::BindTransmitter(_) => Pdu::BindTransmitterResp(resp_body),
            Pdu::BindReceiver(_) => Pdu::BindReceiverResp(resp_body),
            _ => Pdu::BindTransceiverResp(resp_body),
        };
        framed
            .send(Frame::response(frame.sequence, CommandStatus::OK, resp))
            .await?;

        Ok(Some((handle, deliver_rx)))
    }

    async fn bound_loop<T>(
        &self,
        framed: &mut Framed<T, SmppCodec>,
        deliver_rx: &mut mpsc::Receiver<OutboundDeliver>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    debug!(peer = %self.peer, "session closing on shutdown");
                    return Ok(());
                }

                out = deliver_rx.recv() => {
                    let Some(out) = out else { return Ok(()) };
                    self.write_deliver_sm(framed, out).await?;
                }

                frame = framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            warn!(peer = %self.peer, error = %e, "decode error");
                            return Err(e.into());
                        }
                        None => return Ok(()),
                    };

                    match self.handle_pdu(framed, frame).await? {
                        Action::Continue => {}
                        Action::Close => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_pdu<T>(
        &self,
        framed: &mut Framed<T, SmppCodec>,
        frame: Frame,
    ) -> Result<Action, SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        match frame.body {
            Pdu::SubmitSm(submit) => {
                self.handle_submit_sm(framed, frame.sequence, submit).await?;
                Ok(Action::Continue)
            }

            Pdu::EnquireLink => {
                trace!(peer = %self.peer, "enquire_link");
                framed
                    .send(Frame::response(
                        frame.sequence,
                        CommandStatus::OK,
                        Pdu::EnquireLinkResp,
                    ))
                    .await?;
                Ok(Action::Continue)
            }

            Pdu::Unbind => {
                debug!(peer = %self.peer, "unbind");
                framed
                    .send(Frame::response(
                        frame.sequence,
                        CommandStatus::OK,
                        Pdu::UnbindResp,
                    ))
                    .await?;
                Ok(Action::Close)
            }

            // Response to one of our deliver_sm writes.
            Pdu::DeliverSmResp(resp) => {
                trace!(peer = %self.peer, message_id = %resp.message_id, "deliver_sm_resp");
                Ok(Action::Continue)
            }

            Pdu::GenericNack => {
                warn!(peer = %self.peer, sequence = frame.sequence, "received generic_nack");
                Ok(Action::Continue)
            }

            // A bind in Bound state is a protocol error.
            Pdu::BindTransmitter(_) | Pdu::BindReceiver(_) | Pdu::BindTransceiver(_) => {
                framed
                    .send(Frame::response(
                        frame.sequence,
                        CommandStatus::INVALID_BIND_STATUS,
                        Pdu::GenericNack,
                    ))
                    .await?;
                Ok(Action::Continue)
            }

            // Anything else echoes back to the peer.
            other => {
                debug!(
                    peer = %self.peer,
                    command = format_args!("{:#010x}", other.command_id()),
                    "echoing unhandled PDU"
                );
                framed
                    .send(Frame {
                        status: frame.status,
                        sequence: frame.sequence,
                        body: other,
                    })
                    .await?;
                Ok(Action::Continue)
            }
        }
    }

    /// Turn a submit_sm into a router message, then answer. The response
    /// goes out before routing completes; delivery is decoupled.
    async fn handle_submit_sm<T>(
        &self,
        framed: &mut Framed<T, SmppCodec>,
        sequence: u32,
        submit: ShortMessage,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        debug!(
            peer = %self.peer,
            source = %submit.source_addr,
            dest = %submit.destination_addr,
            "submit_sm"
        );
        counters::inc_submits();

        let msg = MsgQueueItem::sms(
            submit.source_addr.clone(),
            submit.destination_addr.clone(),
            submit.text(),
        );
        let log_id = msg.log_id.clone();

        let (status, message_id) = if self.client_tx.send(msg).await.is_ok() {
            (CommandStatus::OK, message_id_now())
        } else {
            warn!(peer = %self.peer, log_id = %log_id, "router channel closed");
            (CommandStatus::SYSTEM_ERROR, String::new())
        };

        framed
            .send(Frame::response(
                sequence,
                status,
                Pdu::SubmitSmResp(MessageIdBody { message_id }),
            ))
            .await?;
        Ok(())
    }

    async fn write_deliver_sm<T>(
        &self,
        framed: &mut Framed<T, SmppCodec>,
        out: OutboundDeliver,
    ) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        trace!(peer = %self.peer, to = %out.to, "deliver_sm");
        framed
            .send(Frame::request(
                self.next_sequence(),
                Pdu::DeliverSm(ShortMessage::new(out.from, out.to, out.body)),
            ))
            .await?;
        Ok(())
    }
}

/// Monotonic-timestamp message id for submit_sm_resp.
fn message_id_now() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{password_digest, Client, ClientNumber, NumberMatch};
    use crate::smpp::command_id;

    fn fixtures() -> (Arc<AddressIndex>, Arc<SessionRegistry>) {
        let index = Arc::new(AddressIndex::new(
            vec![Client {
                id: 1,
                username: "acme".into(),
                password_hash: password_digest("secret"),
                mm4_endpoint: None,
                numbers: vec![ClientNumber {
                    number: "+15550001".into(),
                    client_id: 1,
                    carrier: "twilio".into(),
                }],
            }],
            NumberMatch::Substring,
        ));
        let registry = SessionRegistry::new(index.clone());
        (index, registry)
    }

    fn bind_frame(system_id: &str, password: &str) -> Frame {
        Frame::request(
            1,
            Pdu::BindTransceiver(BindRequest {
                system_id: system_id.into(),
                password: password.into(),
                interface_version: 0x34,
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn bind_and_submit_produce_router_message() {
        let (index, registry) = fixtures();
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (server_io, client_io) = tokio::io::duplex(4096);
        let session = SmppSession::new("test", index, registry.clone(), client_tx);
        let server = tokio::spawn(async move { session.run(server_io, shutdown_rx).await });

        let mut peer = Framed::new(client_io, SmppCodec::new());
        peer.send(bind_frame("acme", "secret")).await.unwrap();

        let resp = peer.next().await.unwrap().unwrap();
        assert_eq!(resp.body.command_id(), command_id::BIND_TRANSCEIVER_RESP);
        assert!(resp.status.is_ok());
        match resp.body {
            Pdu::BindTransceiverResp(body) => assert_eq!(body.system_id, "acme"),
            other => panic!("unexpected body: {other:?}"),
        }
        assert_eq!(registry.count().await, 1);

        peer.send(Frame::request(
            2,
            Pdu::SubmitSm(ShortMessage::new("+15550001", "+15559999", "out we go")),
        ))
        .await
        .unwrap();

        let resp = peer.next().await.unwrap().unwrap();
        match resp.body {
            Pdu::SubmitSmResp(body) => assert!(!body.message_id.is_empty()),
            other => panic!("unexpected body: {other:?}"),
        }

        let msg = client_rx.recv().await.unwrap();
        assert_eq!(msg.from, "+15550001");
        assert_eq!(msg.to, "+15559999");
        assert_eq!(msg.content.as_text(), Some("out we go"));
        assert!(!msg.is_broker_born());

        drop(peer);
        server.await.unwrap().unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn bad_credentials_close_without_response() {
        let (index, registry) = fixtures();
        let (client_tx, _client_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (server_io, client_io) = tokio::io::duplex(4096);
        let session = SmppSession::new("test", index, registry.clone(), client_tx);
        let server = tokio::spawn(async move { session.run(server_io, shutdown_rx).await });

        let mut peer = Framed::new(client_io, SmppCodec::new());
        peer.send(bind_frame("acme", "wrong")).await.unwrap();

        // Connection closes with no PDU written.
        assert!(peer.next().await.is_none());
        server.await.unwrap().unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn deliver_sm_reaches_bound_peer() {
        let (index, registry) = fixtures();
        let (client_tx, _client_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (server_io, client_io) = tokio::io::duplex(4096);
        let session = SmppSession::new("test", index, registry.clone(), client_tx);
        let _server = tokio::spawn(async move { session.run(server_io, shutdown_rx).await });

        let mut peer = Framed::new(client_io, SmppCodec::new());
        peer.send(bind_frame("acme", "secret")).await.unwrap();
        peer.next().await.unwrap().unwrap();

        let msg = MsgQueueItem::sms("+15550999", "+15550001", "hi");
        registry.send_smpp(&msg).await.unwrap();

        let frame = peer.next().await.unwrap().unwrap();
        match frame.body {
            Pdu::DeliverSm(sm) => {
                assert_eq!(sm.source_addr, "+15550999");
                assert_eq!(sm.destination_addr, "+15550001");
                assert_eq!(sm.text(), "hi");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn enquire_link_gets_response_and_unknown_echoes() {
        let (index, registry) = fixtures();
        let (client_tx, _client_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (server_io, client_io) = tokio::io::duplex(4096);
        let session = SmppSession::new("test", index, registry, client_tx);
        let _server = tokio::spawn(async move { session.run(server_io, shutdown_rx).await });

        let mut peer = Framed::new(client_io, SmppCodec::new());
        peer.send(bind_frame("acme", "secret")).await.unwrap();
        peer.next().await.unwrap().unwrap();

        peer.send(Frame::request(5, Pdu::EnquireLink)).await.unwrap();
        let resp = peer.next().await.unwrap().unwrap();
        assert_eq!(resp.body.command_id(), command_id::ENQUIRE_LINK_RESP);
        assert_eq!(resp.sequence, 5);

        // An unsupported command comes straight back.
        let odd = Frame::request(
            6,
            Pdu::Other {
                command_id: 0x0000_0103,
                body: vec![0xde, 0xad],
            },
        );
        peer.send(odd.clone()).await.unwrap();
        let echoed = peer.next().await.unwrap().unwrap();
        assert_eq!(echoed, odd);
    }
}
