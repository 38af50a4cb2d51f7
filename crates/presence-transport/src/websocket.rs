//! Standalone WebSocket listener on top of tokio-tungstenite.
//!
//! Used when the hub runs without an HTTP router in front of it. The size
//! limit is enforced by tungstenite while the message is being assembled, so
//! an oversized message never gets buffered in full.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{
        error::CapacityError, protocol::WebSocketConfig as ProtocolConfig, Error as WsError,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::traits::{binary_to_text, Connection, ConnectionId, Transport, TransportError};

/// Listener settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub bind_addr: SocketAddr,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: 64 * 1024,
        }
    }
}

/// Accepts WebSocket connections on a TCP listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    protocol: ProtocolConfig,
}

impl WebSocketTransport {
    /// Bind a listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        let mut protocol = ProtocolConfig::default();
        protocol.max_message_size = Some(config.max_message_size);

        info!(
            addr = %config.bind_addr,
            max_message_size = config.max_message_size,
            "WebSocket transport listening"
        );

        Ok(Self { listener, protocol })
    }

    /// Bind with the default size limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        let stream = accept_async_with_config(stream, Some(self.protocol.clone()))
            .await
            .map_err(|e| {
                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                TransportError::Handshake(e.to_string())
            })?;

        let conn = WebSocketConnection {
            id: ConnectionId::generate(),
            stream,
            remote_addr: addr,
            is_open: true,
        };
        debug!(connection = %conn.id, remote = %addr, "WebSocket accepted");

        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A connection accepted by [`WebSocketTransport`].
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
    is_open: bool,
}

impl WebSocketConnection {
    fn fail(&mut self, e: WsError) -> TransportError {
        self.is_open = false;
        match e {
            WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
                warn!(connection = %self.id, size, max_size, "Inbound message too large");
                TransportError::MessageTooLarge(size)
            }
            e => TransportError::ReceiveFailed(e.to_string()),
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        // tungstenite queues the pong for incoming pings on its own
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(data)) => match binary_to_text(data) {
                    Some(text) => return Ok(Some(text)),
                    None => warn!(connection = %self.id, "Ignoring non-UTF-8 binary message"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(connection = %self.id, ?frame, "Peer closed");
                    self.is_open = false;
                    return Ok(None);
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.is_open = false;
        Ok(None)
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(());
        }

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(format!("close: {}", e))),
        }
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();

        assert_ne!(transport.local_addr().unwrap().port(), 0);
        assert_eq!(transport.protocol.max_message_size, Some(64 * 1024));
        assert_eq!(transport.name(), "websocket");
    }
}
