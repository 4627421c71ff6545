//! Signaling server error types.
//!
//! Errors surfaced to clients travel as `error{message}` frames; internal
//! details are logged server-side but not exposed. Malformed frames and
//! missing relay targets are dropped without any client-visible error at
//! all - the sender's own negotiation timeout reveals the failure.

use thiserror::Error;

/// Signaling server error type.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Join attempted against a room code not present in the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Operation referenced a participant the room does not know.
    #[error("Participant not found")]
    ParticipantNotFound,

    /// Room-code generation could not find a free slot.
    #[error("Room identifier space exhausted")]
    CapacityExhausted,

    /// Registry is shutting down and refuses new rooms or joins.
    #[error("Registry is draining")]
    Draining,

    /// Actor channel failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalError::RoomNotFound(_) => "Room not found".to_string(),
            SignalError::ParticipantNotFound => "Participant not found".to_string(),
            SignalError::CapacityExhausted => {
                "Could not allocate a room, please try again".to_string()
            }
            SignalError::Draining => "Server is shutting down, please reconnect".to_string(),
            SignalError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}
