//! Websocket plumbing shared by the control and data channels.
//!
//! Fragment reassembly is done by tungstenite: every item read from the
//! stream is one complete logical message. What is left here is the
//! per-message policy both channels share: text passes through, other
//! frames are skipped, a close frame ends the stream, and cancellation
//! aborts a pending connect or receive.

use std::sync::Once;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: Url,
        #[source]
        source: tungstenite::Error,
    },
    #[error("receive failed: {0}")]
    Receive(#[source] tungstenite::Error),
    #[error("connection dropped without a close frame")]
    Dropped,
}

/// What one receive produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A complete, non-blank text message.
    Text(String),
    /// The peer sent a close frame.
    Closed,
    /// Cancellation fired before a message arrived.
    Cancelled,
}

/// Open a websocket. Returns `Ok(None)` if cancelled before the handshake completes.
///
/// `wss` URLs are served by rustls with the webpki root store.
pub async fn connect(
    url: &Url,
    cancel: &CancellationToken,
) -> Result<Option<WsStream>, ChannelError> {
    if url.scheme() == "wss" {
        install_tls_provider();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => Ok(Some(ws)),
            Err(source) => Err(ChannelError::Connect { url: url.clone(), source }),
        },
    }
}

fn install_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            tracing::debug!("process TLS provider already installed");
        }
    });
}

/// Wait for the next text message.
///
/// Binary and raw frames are dropped with a warning, ping/pong and blank
/// text are dropped silently; none of them end the stream.
pub async fn next_text(
    ws: &mut WsStream,
    cancel: &CancellationToken,
    channel: &str,
) -> Result<Inbound, ChannelError> {
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Inbound::Cancelled),
            item = ws.next() => item,
        };

        match item {
            None => return Err(ChannelError::Dropped),
            Some(Err(e)) => return Err(ChannelError::Receive(e)),
            Some(Ok(Message::Text(text))) => {
                if text.trim().is_empty() {
                    tracing::trace!(channel, "blank text message, skipping");
                    continue;
                }
                return Ok(Inbound::Text(text));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(channel, ?frame, "close frame received");
                return Ok(Inbound::Closed);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                tracing::trace!(channel, "ping/pong frame");
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::warn!(channel, len = data.len(), "unexpected binary message, skipping");
            }
            Some(Ok(Message::Frame(_))) => {
                tracing::warn!(channel, "unexpected raw frame, skipping");
            }
        }
    }
}

/// Complete the close handshake. Errors are logged; the socket is done either way.
pub async fn close(ws: &mut WsStream, channel: &str) {
    if let Err(e) = ws.close(None).await {
        tracing::debug!(channel, error = %e, "close handshake did not complete cleanly");
    }
}
