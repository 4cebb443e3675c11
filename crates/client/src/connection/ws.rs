// WebSocket transport backed by tokio-tungstenite.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use murmur_common::protocol::ws::{decode_message, encode_message, WsMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::ChatTransport;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the close handshake. A half-open peer must not hold up an
/// identity switch; past this the stream is simply dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
pub struct WsTransport {
    socket: Option<Socket>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatTransport for WsTransport {
    async fn connect(&mut self, url: &Url) -> Result<()> {
        let (socket, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to open websocket to {}", url.path()))?;
        self.socket = Some(socket);
        Ok(())
    }

    async fn send(&mut self, message: &WsMessage) -> Result<()> {
        let socket = self.socket.as_mut().ok_or_else(|| anyhow!("websocket is not open"))?;
        let encoded = encode_message(message)?;
        socket.send(Message::Text(encoded.into())).await.context("failed to send websocket frame")
    }

    async fn recv(&mut self) -> Result<Option<WsMessage>> {
        loop {
            let Some(socket) = self.socket.as_mut() else {
                return Ok(None);
            };

            let next = socket.next().await;
            match next {
                None | Some(Ok(Message::Close(_))) => {
                    self.socket = None;
                    return Ok(None);
                }
                Some(Err(error)) => {
                    self.socket = None;
                    return Err(error).context("websocket read failed");
                }
                Some(Ok(Message::Text(text))) => match decode_message(text.as_str()) {
                    Ok(message) => return Ok(Some(message)),
                    Err(error) => warn!(error = %error, "dropping undecodable frame"),
                },
                // Pings are answered by tungstenite on the next read.
                Some(Ok(other)) => debug!(kind = ?other, "ignoring non-text frame"),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            bounded_close(socket.close(None)).await;
        }
    }
}

async fn bounded_close<F, E>(close: F)
where
    F: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(error = %error, "websocket close handshake failed"),
        Err(_) => debug!("websocket close handshake timed out; dropping the stream"),
    }
}
