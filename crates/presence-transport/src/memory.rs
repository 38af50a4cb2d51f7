//! In-memory duplex transport.
//!
//! A [`MemoryConnection`] is the server half of a pair; the matching
//! [`MemoryPeer`] plays the client. Dropping or closing either half ends the
//! connection for the other.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

/// Create a connected server/client pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();

    let conn = MemoryConnection {
        id: ConnectionId::generate(),
        inbound,
        outbound: Some(outbound),
    };
    let peer = MemoryPeer {
        to_server: Some(to_server),
        from_server,
    };
    (conn, peer)
}

/// Server half of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.recv().await)
    }

    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(text.to_string())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.inbound.close();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.outbound
            .as_ref()
            .is_some_and(|outbound| !outbound.is_closed())
    }
}

/// Client half of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Send a text message to the server half.
    ///
    /// # Errors
    ///
    /// Returns an error if either half has been closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let to_server = self
            .to_server
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        to_server
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next message from the server half.
    ///
    /// Returns `None` once the server half is closed and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_server.recv().await
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_server.try_recv().ok()
    }

    /// Close the client half, as a disconnecting client would.
    pub fn close(&mut self) {
        self.to_server = None;
    }
}

/// A transport whose connections are created in-process by a
/// [`MemoryConnector`].
pub struct MemoryTransport {
    incoming: Mutex<mpsc::UnboundedReceiver<MemoryConnection>>,
}

/// Dials a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryTransport {
    /// Create a transport and the connector that feeds it.
    #[must_use]
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Mutex::new(rx),
            },
            MemoryConnector { tx },
        )
    }
}

impl MemoryConnector {
    /// Open a new connection to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub fn connect(&self) -> Result<MemoryPeer, TransportError> {
        let (conn, peer) = pair();
        self.tx
            .send(conn)
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(peer)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(conn) => Ok(Box::new(conn)),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
