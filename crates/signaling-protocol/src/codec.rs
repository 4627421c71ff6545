//! Encode/decode helpers for the JSON wire protocol.

use thiserror::Error;

use crate::messages::{ClientMessage, ServerMessage};

/// Protocol-level failure.
///
/// A malformed inbound frame is never fatal to the connection; the relay
/// drops the frame and logs the reason.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON, had an unknown `type`, or was missing
    /// a required field.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound text frame into a [`ClientMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for anything that does not parse
/// into the closed client-message union.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a [`ServerMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if serialization fails; with the
/// closed union this indicates a bug rather than bad input.
pub fn encode_server(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
