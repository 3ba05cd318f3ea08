//! Transport seam for the duplex session channel.
//!
//! Production uses [`WsConnector`] (tokio-tungstenite). Tests supply their own
//! [`ChannelConnector`] backed by in-memory mpsc pairs.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::protocol::{ClientMessage, ServerMessage};

/// Error types for channel operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Channel closed")]
    Closed,
}

/// One established duplex channel.
#[async_trait]
pub trait Channel: Send {
    /// Send one message. Errors indicate the channel is unusable.
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ConnectionError>;

    /// Receive the next parseable inbound message.
    ///
    /// Malformed and unhandled frames are skipped internally. `None` means
    /// the channel has closed.
    async fn recv(&mut self) -> Option<ServerMessage>;
}

/// Factory for channels; called once per (re)connect attempt.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Channel>, ConnectionError>;
}

/// WebSocket connector for the speech/response gateway
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, ConnectionError> {
        let (stream, _response) = connect_async(&self.endpoint)
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;
        debug!("WebSocket connected to {}", self.endpoint);
        let (write, read) = stream.split();
        Ok(Box::new(WsChannel { write, read }))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsChannel {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ConnectionError> {
        let wire = msg
            .to_wire()
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
        self.write
            .send(Message::Text(wire.into()))
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(msg) = ServerMessage::parse(&text) {
                        return Some(msg);
                    }
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => {} // binary/ping/pong frames carry nothing for us
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    return None;
                }
            }
        }
        None
    }
}
