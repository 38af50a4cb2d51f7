//! # presence-protocol
//!
//! Wire message definitions for the presence hub.
//!
//! Every message is a single JSON object carried in one text frame of a
//! persistent duplex connection. The first client message is the admission
//! payload; everything the hub sends afterwards is a [`ServerMessage`]
//! discriminated by its `type` field.
//!
//! ## Message Types
//!
//! - `connection_info` - The identity assigned to a newly admitted client
//! - `existing_user` - One already-present peer, replayed to a newcomer
//! - `user_connected` / `user_disconnected` - Presence changes
//! - `message` - A relayed client message
//!
//! ## Example
//!
//! ```rust
//! use presence_protocol::{codec, ClientId, ServerMessage};
//!
//! let msg = ServerMessage::connection_info(ClientId::new(3), 5);
//! let text = codec::encode(&msg).unwrap();
//! assert_eq!(codec::decode(&text).unwrap(), msg);
//! ```

pub mod codec;
pub mod messages;

pub use codec::{decode, decode_admission, encode, ProtocolError};
pub use messages::{Admission, ClientId, ServerMessage, UserData, DEPARTURE_NOTICE};
