//! Shared identifier types for Parley components.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of a generated room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Maximum accepted length for a client-supplied room code.
pub const ROOM_CODE_MAX_LEN: usize = 16;

/// Alphabet for room codes. Excludes `0/O` and `1/I` so codes can be
/// read aloud or copied by hand without ambiguity.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Unique identifier for a participant.
///
/// Opaque to clients; unique within the process for the lifetime of the
/// connection. Presented back as the rejoin identity on reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque stream-correlation token carried in screen-share signaling.
///
/// Client-supplied; peers use it to tell a screen track apart from a
/// camera track arriving on the same peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub String);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Error produced when parsing a client-supplied room code.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomCodeError {
    /// Code is empty or longer than [`ROOM_CODE_MAX_LEN`].
    #[error("Room code has invalid length")]
    InvalidLength,

    /// Code contains a non-alphanumeric character.
    #[error("Room code contains invalid characters")]
    InvalidCharacter,
}

/// Short, human-shareable room identifier.
///
/// Case-insensitive on the wire; stored and compared in upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a random room code from the unambiguous alphabet.
    ///
    /// Collision checking against live rooms is the caller's concern.
    #[must_use]
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code: String = (0..ROOM_CODE_LEN)
            .map(|_| {
                // Alphabet is a non-empty const, choose cannot fail.
                ROOM_CODE_ALPHABET.choose(rng).copied().unwrap_or(b'A') as char
            })
            .collect();
        Self(code)
    }

    /// Parse and normalize a client-supplied room code.
    ///
    /// # Errors
    ///
    /// Returns [`RoomCodeError`] if the code is empty, too long, or
    /// contains non-alphanumeric characters.
    pub fn parse(raw: &str) -> Result<Self, RoomCodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > ROOM_CODE_MAX_LEN {
            return Err(RoomCodeError::InvalidLength);
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomCodeError::InvalidCharacter);
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The normalized code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let code = RoomCode::parse("ab2cde").unwrap();
        assert_eq!(code.as_str(), "AB2CDE");
        assert_eq!(code, RoomCode::parse("AB2cde").unwrap());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let code = RoomCode::parse("  XYZ234 ").unwrap();
        assert_eq!(code.as_str(), "XYZ234");
    }

    #[test]
    fn test_parse_rejects_empty_and_oversized() {
        assert_eq!(RoomCode::parse(""), Err(RoomCodeError::InvalidLength));
        assert_eq!(RoomCode::parse("   "), Err(RoomCodeError::InvalidLength));
        let long = "A".repeat(ROOM_CODE_MAX_LEN + 1);
        assert_eq!(RoomCode::parse(&long), Err(RoomCodeError::InvalidLength));
    }

    #[test]
    fn test_parse_rejects_punctuation() {
        assert_eq!(
            RoomCode::parse("AB-CDE"),
            Err(RoomCodeError::InvalidCharacter)
        );
        assert_eq!(
            RoomCode::parse("AB CDE"),
            Err(RoomCodeError::InvalidCharacter)
        );
    }

    #[test]
    fn test_room_code_serde_roundtrip() {
        let code = RoomCode::parse("qrs678").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"QRS678\"");
        let back: RoomCode = serde_json::from_str("\"qrs678\"").unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn test_participant_ids_are_unique() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        assert_ne!(a, b);
    }
}
