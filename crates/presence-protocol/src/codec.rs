//! Codec for encoding and decoding presence messages.
//!
//! Messages are JSON text, one message per transport frame. There is no
//! additional framing.

use std::sync::Arc;
use thiserror::Error;

use crate::messages::{Admission, ServerMessage};

/// Maximum size of a single encoded message (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Largest client message that always fits in a relay envelope.
///
/// JSON escaping can turn one input byte into six (`\u0001`), and the
/// envelope adds a few dozen bytes.
pub const MAX_RELAY_TEXT_SIZE: usize = (MAX_MESSAGE_SIZE - 64) / 6;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally valid JSON that is not an acceptable message.
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Encode a server message to JSON text.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode(msg: &ServerMessage) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg)?;

    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    Ok(text)
}

/// Encode a server message once for delivery to many connections.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode_shared(msg: &ServerMessage) -> Result<Arc<str>, ProtocolError> {
    encode(msg).map(Arc::from)
}

/// Decode a server message from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or not a known message.
pub fn decode(text: &str) -> Result<ServerMessage, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Encode an admission payload, as a client would send it.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_admission(admission: &Admission) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(admission)?)
}

/// Decode the first message of a connection as an admission payload.
///
/// The payload must be a JSON object whose `user_data` field is itself an
/// object. Other top-level fields are ignored and the contents of
/// `user_data` are never inspected.
///
/// # Errors
///
/// Returns an error if the text is too large, not JSON, or lacks an
/// object-valued `user_data`.
pub fn decode_admission(text: &str) -> Result<Admission, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err(ProtocolError::Invalid(
            "admission must be a JSON object".into(),
        ));
    };

    match fields.remove("user_data") {
        Some(serde_json::Value::Object(user_data)) => Ok(Admission::new(user_data)),
        Some(_) => Err(ProtocolError::Invalid(
            "user_data must be a JSON object".into(),
        )),
        None => Err(ProtocolError::Invalid("missing user_data".into())),
    }
}
