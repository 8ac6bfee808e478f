//! WebSocket transport for the notification subscriber.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::subscriber::{NotificationSocket, NotificationTransport, SocketEvent, TransportError};

/// Endpoint for a user's notification socket: `{base}/ws/{user_id}`.
pub fn notification_url(base: &str, user_id: &str) -> String {
    format!("{}/ws/{}", base.trim_end_matches('/'), user_id)
}

/// Opens `ws://` / `wss://` sockets under a base URL.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl NotificationTransport for WsTransport {
    async fn open(&self, user_id: &str) -> Result<Box<dyn NotificationSocket>, TransportError> {
        let url = notification_url(&self.base_url, user_id);
        debug!(url = %url, "Connecting notification socket");

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl NotificationSocket for WsSocket {
    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Frame(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return SocketEvent::Frame(text),
                    Err(_) => debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return SocketEvent::Closed,
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => return SocketEvent::Error(TransportError::Socket(e.to_string())),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Error closing notification socket");
        }
    }
}
