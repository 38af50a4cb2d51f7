//! # presence-core
//!
//! Presence registry and broadcast hub.
//!
//! This crate provides the stateful heart of the server:
//!
//! - **Identity** - Compact, reusable connection identities
//! - **Registry** - Live connections and their payloads, in arrival order
//! - **Hub** - Two-step admission, relay and eviction under one lock
//! - **Session** - Drives one transport connection through its lifecycle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Session   │────▶│     Hub     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        │            ┌─────────────┐            │
//!        └────────────│   Outbox    │◀───────────┘
//!                     └─────────────┘
//! ```

pub mod hub;
pub mod identity;
pub mod outbox;
pub mod registry;
pub mod session;

pub use hub::{Admitted, Hub, HubConfig, HubError, HubStats};
pub use identity::{IdentityPool, ReusePolicy};
pub use outbox::{DeliveryError, Outbox, OutboxReceiver};
pub use registry::{Registry, RegistryError};
pub use session::{run_session, run_session_with, serve, SessionOutcome};
