//! Outbound MM4 delivery to client MMSC endpoints.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::gateway::{AddressIndex, MsgQueueItem};
use crate::router::SinkError;
use crate::telemetry::counters;

const LOCAL_HOST: &str = "smsgated";

/// Forwards MMS messages to the destination client's configured MM4
/// endpoint.
pub struct Mm4Outbound {
    index: Arc<AddressIndex>,
    connect_timeout: Duration,
}

impl Mm4Outbound {
    pub fn new(index: Arc<AddressIndex>, connect_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            index,
            connect_timeout,
        })
    }

    /// Deliver one MMS. Fails fast when the destination's client has no MM4
    /// endpoint configured.
    pub async fn send_mm4(&self, msg: &MsgQueueItem) -> Result<(), SinkError> {
        let client = self
            .index
            .client_of(&msg.to)
            .ok_or_else(|| SinkError::NoPeer(msg.to.clone()))?;
        let endpoint = client
            .mm4_endpoint
            .clone()
            .ok_or_else(|| SinkError::NoPeer(msg.to.clone()))?;

        let stream = timeout(self.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| SinkError::PeerSendFailed(format!("connect timeout to {endpoint}")))?
            .map_err(|e| SinkError::PeerSendFailed(format!("connect to {endpoint}: {e}")))?;

        let result = timeout(self.connect_timeout, forward_over(stream, msg))
            .await
            .map_err(|_| SinkError::PeerSendFailed(format!("dialogue timeout with {endpoint}")))?;

        match &result {
            Ok(()) => {
                debug!(log_id = %msg.log_id, endpoint = %endpoint, "mm4 forwarded");
                counters::inc_delivers();
            }
            Err(e) => {
                warn!(log_id = %msg.log_id, endpoint = %endpoint, error = %e, "mm4 forward failed");
            }
        }
        result
    }
}

/// Run the forward dialogue over an established stream.
pub async fn forward_over<T>(stream: T, msg: &MsgQueueItem) -> Result<(), SinkError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new());

    expect_reply(&mut framed, 220).await?;
    send_line(&mut framed, format!("EHLO {LOCAL_HOST}")).await?;
    expect_reply(&mut framed, 250).await?;

    send_line(&mut framed, format!("MAIL FROM:<{}/TYPE=PLMN>", msg.from)).await?;
    expect_reply(&mut framed, 250).await?;

    send_line(&mut framed, format!("RCPT TO:<{}/TYPE=PLMN>", msg.to)).await?;
    expect_reply(&mut framed, 250).await?;

    send_line(&mut framed, "DATA".to_string()).await?;
    expect_reply(&mut framed, 354).await?;

    send_line(
        &mut framed,
        "X-Mms-Message-Type: MM4_forward.REQ".to_string(),
    )
    .await?;
    send_line(&mut framed, format!("X-Mms-Transaction-Id: {}", msg.log_id)).await?;

    let envelope = msg.content.as_envelope();
    if let Some(envelope) = envelope {
        for (name, value) in &envelope.headers {
            // Transfer headers already written above stay authoritative.
            if name.eq_ignore_ascii_case("X-Mms-Message-Type")
                || name.eq_ignore_ascii_case("X-Mms-Transaction-Id")
            {
                continue;
            }
            send_line(&mut framed, format!("{name}: {value}")).await?;
        }
    }
    send_line(&mut framed, String::new()).await?;

    let body = envelope.map(|e| e.text()).unwrap_or_default();
    for line in body.lines() {
        // Dot-stuff per SMTP.
        if line.starts_with('.') {
            send_line(&mut framed, format!(".{line}")).await?;
        } else {
            send_line(&mut framed, line.to_string()).await?;
        }
    }
    send_line(&mut framed, ".".to_string()).await?;
    expect_reply(&mut framed, 250).await?;

    send_line(&mut framed, "QUIT".to_string()).await?;
    Ok(())
}

async fn send_line<T>(framed: &mut Framed<T, LinesCodec>, line: String) -> Result<(), SinkError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed
        .send(line)
        .await
        .map_err(|e| SinkError::PeerSendFailed(e.to_string()))
}

/// Read one (possibly multi-line) reply and check its code.
async fn expect_reply<T>(
    framed: &mut Framed<T, LinesCodec>,
    expected: u16,
) -> Result<(), SinkError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let line = framed
            .next()
            .await
            .ok_or_else(|| SinkError::PeerSendFailed("peer closed mid-dialogue".into()))?
            .map_err(|e| SinkError::PeerSendFailed(e.to_string()))?;

        if line.len() >= 4 && line.as_bytes()[3] == b'-' {
            continue;
        }

        let code: u16 = line
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| SinkError::PeerSendFailed(format!("malformed reply: {line}")))?;

        if code != expected {
            return Err(SinkError::PeerSendFailed(format!(
                "expected {expected}, peer said: {line}"
            )));
        }
        return Ok(());
    }
}
