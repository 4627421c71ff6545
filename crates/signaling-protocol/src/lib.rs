//! JSON signaling protocol for Parley.
//!
//! This crate defines the closed message unions exchanged between clients
//! and the session-coordination relay over a WebSocket. Negotiation
//! payloads (`sdp`, `candidate`) are opaque JSON values owned by the
//! clients' media engines; the relay never interprets them.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod messages;

pub use codec::{decode_client, encode_server, ProtocolError};
pub use messages::{ClientMessage, MediaType, ParticipantSummary, ServerMessage};
