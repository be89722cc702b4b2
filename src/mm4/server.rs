//! Inbound MM4 listener.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::gateway::{MmsEnvelope, MmsPart, MsgQueueItem};
use crate::telemetry::counters;

use super::parse_address;

const GREETING_HOST: &str = "smsgated";

pub struct Mm4Listener {
    name: String,
    address: SocketAddr,
    client_tx: mpsc::Sender<MsgQueueItem>,
}

impl Mm4Listener {
    pub fn new(
        name: impl Into<String>,
        address: SocketAddr,
        client_tx: mpsc::Sender<MsgQueueItem>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            address,
            client_tx,
        })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;

        info!(listener = %self.name, address = %self.address, "mm4 listener started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    info!(listener = %self.name, "mm4 listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let span = span!(Level::INFO, "mm4_conn", listener = %self.name, peer = %peer_addr);
                            let client_tx = self.client_tx.clone();
                            tokio::spawn(
                                async move {
                                    if let Err(e) = serve_connection(stream, client_tx).await {
                                        debug!(error = %e, "mm4 connection ended with error");
                                    }
                                }
                                .instrument(span),
                            );
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
}

/// One in-flight submission being assembled.
#[derive(Default)]
struct Transaction {
    from: Option<String>,
    to: Option<String>,
}

/// Drive the SMTP dialect for one connection.
pub async fn serve_connection<T>(
    stream: T,
    client_tx: mpsc::Sender<MsgQueueItem>,
) -> Result<(), LinesCodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new());
    framed.send(format!("220 {GREETING_HOST} MM4 ready")).await?;

    let mut txn = Transaction::default();

    while let Some(line) = framed.next().await {
        let line = line?;
        let (verb, arg) = split_command(&line);

        match verb.as_str() {
            "HELO" | "EHLO" => {
                framed.send(format!("250 {GREETING_HOST}")).await?;
            }
            "MAIL" => {
                txn.from = Some(parse_address(strip_prefix(arg, "FROM:")));
                framed.send("250 OK".to_string()).await?;
            }
            "RCPT" => {
                txn.to = Some(parse_address(strip_prefix(arg, "TO:")));
                framed.send("250 OK".to_string()).await?;
            }
            "DATA" => {
                let (Some(from), Some(to)) = (txn.from.clone(), txn.to.clone()) else {
                    framed.send("503 MAIL and RCPT first".to_string()).await?;
                    continue;
                };

                framed
                    .send("354 End data with <CRLF>.<CRLF>".to_string())
                    .await?;

                let envelope = read_data(&mut framed).await?;
                let msg = MsgQueueItem::mms(from, to, envelope);
                let log_id = msg.log_id.clone();

                if client_tx.send(msg).await.is_ok() {
                    counters::inc_submits();
                    debug!(log_id = %log_id, "mm4 submission accepted");
                    framed.send("250 Message accepted".to_string()).await?;
                } else {
                    warn!(log_id = %log_id, "router channel closed");
                    framed.send("451 Processing error".to_string()).await?;
                }

                txn = Transaction::default();
            }
            "RSET" => {
                txn = Transaction::default();
                framed.send("250 OK".to_string()).await?;
            }
            "NOOP" => {
                framed.send("250 OK".to_string()).await?;
            }
            "QUIT" => {
                framed.send("221 Bye".to_string()).await?;
                break;
            }
            _ => {
                framed.send("500 Unrecognized command".to_string()).await?;
            }
        }
    }

    Ok(())
}

/// Collect the DATA section: a header block, a blank line, then the payload
/// until the terminating dot. Dot-stuffed lines are unstuffed.
async fn read_data<T>(
    framed: &mut Framed<T, LinesCodec>,
) -> Result<MmsEnvelope, LinesCodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut headers = Vec::new();
    let mut body_lines: Vec<String> = Vec::new();
    let mut in_headers = true;

    while let Some(line) = framed.next().await {
        let line = line?;
        if line == "." {
            break;
        }

        if in_headers {
            if line.is_empty() {
                in_headers = false;
            } else if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            continue;
        }

        let line = line.strip_prefix('.').map(str::to_string).unwrap_or(line);
        body_lines.push(line);
    }

    let content_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Type"))
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "text/plain".to_string());

    Ok(MmsEnvelope {
        headers,
        parts: vec![MmsPart {
            content_type,
            body: body_lines.join("\r\n").into_bytes(),
        }],
    })
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim()),
        None => (line.trim().to_ascii_uppercase(), ""),
    }
}

fn strip_prefix<'a>(arg: &'a str, prefix: &str) -> &'a str {
    if arg.len() >= prefix.len() && arg[..prefix.len()].eq_ignore_ascii_case(prefix) {
        &arg[prefix.len()..]
    } else {
        arg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_line<T>(framed: &mut Framed<T, LinesCodec>, line: &str)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        framed.send(line.to_string()).await.unwrap();
    }

    async fn expect_code<T>(framed: &mut Framed<T, LinesCodec>, code: &str)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let line = framed.next().await.unwrap().unwrap();
        assert!(line.starts_with(code), "expected {code}, got {line}");
    }

    #[tokio::test]
    async fn submission_becomes_router_message() {
        let (client_tx, mut client_rx) = mpsc::channel(8);
        let (server_io, peer_io) = tokio::io::duplex(4096);
        let server = tokio::spawn(serve_connection(server_io, client_tx));

        let mut peer = Framed::new(peer_io, LinesCodec::new());
        expect_code(&mut peer, "220").await;

        send_line(&mut peer, "EHLO mmsc.example.com").await;
        expect_code(&mut peer, "250").await;

        send_line(&mut peer, "MAIL FROM:<+15550999/TYPE=PLMN>").await;
        expect_code(&mut peer, "250").await;

        send_line(&mut peer, "RCPT TO:<+15550001/TYPE=PLMN>").await;
        expect_code(&mut peer, "250").await;

        send_line(&mut peer, "DATA").await;
        expect_code(&mut peer, "354").await;

        send_line(&mut peer, "X-Mms-Message-Type: MM4_forward.REQ").await;
        send_line(&mut peer, "Content-Type: text/plain").await;
        send_line(&mut peer, "").await;
        send_line(&mut peer, "picture attached").await;
        send_line(&mut peer, "..leading dot kept").await;
        send_line(&mut peer, ".").await;
        expect_code(&mut peer, "250").await;

        send_line(&mut peer, "QUIT").await;
        expect_code(&mut peer, "221").await;

        let msg = client_rx.recv().await.unwrap();
        assert_eq!(msg.from, "+15550999");
        assert_eq!(msg.to, "+15550001");
        let envelope = msg.content.as_envelope().unwrap();
        assert_eq!(
            envelope.header("X-Mms-Message-Type"),
            Some("MM4_forward.REQ")
        );
        let text = envelope.text();
        assert!(text.contains("picture attached"));
        assert!(text.contains(".leading dot kept"));

        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn data_before_envelope_is_rejected() {
        let (client_tx, _client_rx) = mpsc::channel(8);
        let (server_io, peer_io) = tokio::io::duplex(4096);
        let _server = tokio::spawn(serve_connection(server_io, client_tx));

        let mut peer = Framed::new(peer_io, LinesCodec::new());
        expect_code(&mut peer, "220").await;

        send_line(&mut peer, "DATA").await;
        expect_code(&mut peer, "503").await;
    }
}
