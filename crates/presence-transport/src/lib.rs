//! # presence-transport
//!
//! Transport abstraction layer for the presence hub.
//!
//! The hub only ever deals in discrete text messages over a persistent
//! duplex connection. This crate hides where those messages come from:
//!
//! - **WebSocket** - Standalone listener built on tokio-tungstenite
//! - **Axum** - Adapter for sockets upgraded by an axum route
//! - **Memory** - In-process duplex pair, for tests and embedding
//!
//! ## Transport Abstraction
//!
//! ```rust,ignore
//! use presence_transport::{Connection, Transport};
//!
//! async fn handle_connection(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(text)) = conn.recv().await {
//!         // Process message
//!     }
//! }
//! ```

pub mod axum_ws;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use axum_ws::AxumConnection;
pub use memory::{MemoryConnection, MemoryConnector, MemoryPeer, MemoryTransport};
pub use traits::{Connection, ConnectionId, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
