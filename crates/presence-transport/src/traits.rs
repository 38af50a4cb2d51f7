//! Transport abstraction traits.
//!
//! These traits define the interface every transport implementation must
//! provide so the hub never depends on a particular wire technology.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique label for a connection, used in logs before the hub has
/// assigned an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Take the next label.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection, or the whole transport, is closed.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket opening handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Source of inbound connections.
///
/// `accept` returning [`TransportError::ConnectionClosed`] means the
/// transport has shut down and will produce no more connections. Any other
/// error concerns a single failed attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// An active duplex connection carrying discrete text messages.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> &ConnectionId;

    /// Receive the next text message.
    ///
    /// Returns `None` if the connection is closed cleanly. Implementations
    /// must be cancel-safe: dropping the future before it completes must
    /// not lose a message.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Peer address, where the transport has one.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    fn is_open(&self) -> bool;
}

/// Decode a binary frame as text.
///
/// Returns `None` when the bytes are not valid UTF-8.
pub(crate) fn binary_to_text(data: Vec<u8>) -> Option<String> {
    String::from_utf8(data).ok()
}
