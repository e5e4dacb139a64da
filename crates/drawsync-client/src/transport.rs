//! Transport abstraction and the default WebSocket implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use drawsync_core::{DrawSyncError, Result};

/// A frame as seen by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// An open, message-oriented, full-duplex link.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next inbound frame; `None` once the peer has closed the link.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Best-effort close.
    async fn close(&mut self);
}

/// Opens transports. One call per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// Connects over WebSocket with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| DrawSyncError::Transport(e.to_string()))?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
            Frame::Ping(data) => WsMessage::Ping(data.into()),
            Frame::Pong(data) => WsMessage::Pong(data.into()),
        };
        self.stream
            .send(msg)
            .await
            .map_err(|e| DrawSyncError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => Frame::Text(text.to_string()),
                Ok(WsMessage::Binary(data)) => Frame::Binary(data.to_vec()),
                Ok(WsMessage::Ping(data)) => Frame::Ping(data.to_vec()),
                Ok(WsMessage::Pong(data)) => Frame::Pong(data.to_vec()),
                Ok(WsMessage::Close(_)) => return None,
                Ok(WsMessage::Frame(_)) => continue,
                Err(e) => return Some(Err(DrawSyncError::Transport(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
