//! Message types for the presence protocol.
//!
//! Identities are plain integers inside the hub but always travel as
//! strings on the wire, so [`ClientId`] carries its own serde impls.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Human-readable text attached to every departure notice.
pub const DEPARTURE_NOTICE: &str = "A user has left the game";

/// Opaque client-supplied state. The hub never looks inside it.
pub type UserData = serde_json::Map<String, serde_json::Value>;

/// Compact identity of one live connection.
///
/// Identities start at 1 and are reused after the owning connection leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u32);

impl ClientId {
    /// Wrap a raw identity value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw integer value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Serialize for ClientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ClientIdVisitor;

        impl<'de> Visitor<'de> for ClientIdVisitor {
            type Value = ClientId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a client id as a decimal string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ClientId, E> {
                v.parse::<u32>().map(ClientId).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ClientId, E> {
                u32::try_from(v).map(ClientId).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ClientIdVisitor)
    }
}

/// The first message a client sends: its self-described state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    /// Arbitrary key-value state, passed through untouched.
    pub user_data: UserData,
}

impl Admission {
    /// Create an admission carrying the given user data.
    #[must_use]
    pub fn new(user_data: UserData) -> Self {
        Self { user_data }
    }
}

/// A message sent by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent only to a newly admitted connection.
    ConnectionInfo {
        /// Identity assigned to the receiver.
        client_id: ClientId,
        /// Number of live connections, the receiver included.
        total_connections: usize,
    },

    /// One already-present peer, sent only to a newly admitted connection.
    ExistingUser {
        /// Identity of the peer.
        client_id: ClientId,
        /// The peer's admission payload.
        existing_users_data: UserData,
    },

    /// Announces a newcomer to everyone else.
    UserConnected {
        /// Identity of the newcomer.
        client_id: ClientId,
        /// The newcomer's admission payload.
        user_data: UserData,
    },

    /// A relayed client message.
    Message {
        /// Raw text as received from the originating client.
        message: String,
    },

    /// Announces that a connection has left.
    UserDisconnected {
        /// Identity of the departed connection.
        client_id: ClientId,
        /// Always [`DEPARTURE_NOTICE`].
        message: String,
    },
}

impl ServerMessage {
    /// The value of the `type` discriminator.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionInfo { .. } => "connection_info",
            ServerMessage::ExistingUser { .. } => "existing_user",
            ServerMessage::UserConnected { .. } => "user_connected",
            ServerMessage::Message { .. } => "message",
            ServerMessage::UserDisconnected { .. } => "user_disconnected",
        }
    }

    #[must_use]
    pub fn connection_info(client_id: ClientId, total_connections: usize) -> Self {
        ServerMessage::ConnectionInfo {
            client_id,
            total_connections,
        }
    }

    #[must_use]
    pub fn existing_user(client_id: ClientId, data: UserData) -> Self {
        ServerMessage::ExistingUser {
            client_id,
            existing_users_data: data,
        }
    }

    #[must_use]
    pub fn user_connected(client_id: ClientId, user_data: UserData) -> Self {
        ServerMessage::UserConnected {
            client_id,
            user_data,
        }
    }

    /// Wrap raw client text for relaying.
    #[must_use]
    pub fn relay(message: impl Into<String>) -> Self {
        ServerMessage::Message {
            message: message.into(),
        }
    }

    /// Departure notice for `client_id`.
    #[must_use]
    pub fn user_disconnected(client_id: ClientId) -> Self {
        ServerMessage::UserDisconnected {
            client_id,
            message: DEPARTURE_NOTICE.to_string(),
        }
    }
}
