//! Parley Signaling Server Library
//!
//! This library provides the core functionality for the Parley signaling
//! server - a stateful WebSocket session-coordination relay responsible for:
//!
//! - Room lifecycle (creation, host-bound teardown, empty-room expiry)
//! - Participant registry and media-state bookkeeping
//! - Targeted relay of opaque negotiation payloads (offer/answer/candidate)
//! - Room-wide broadcast of media, screen-share and recording events
//! - Heartbeat liveness and reconnection-by-identity handling
//!
//! # Architecture
//!
//! The server uses an actor model hierarchy:
//!
//! ```text
//! RegistryActor (singleton per process)
//! ├── owns the room table, supervises N RoomActors
//! │   └── RoomActor (one per active room)
//! │       ├── owns all room state (participants, host, media flags)
//! │       └── supervises N ConnectionActors
//! │           └── ConnectionActor (one per WebSocket connection)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-room serialization**: every room mutation flows through that
//!   room's mailbox; cross-room operations need no coordination
//! - **Fire-and-forget delivery**: a slow or dead client never delays a
//!   broadcast to the rest of the room
//! - **No persistence**: process restart loses all room state by design
//! - **Rejoin identity**: a disconnected participant may resume its
//!   membership within a bounded grace window by presenting its
//!   previously issued participant id
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`liveness`] - Heartbeat/grace timeout policy
//! - [`observability`] - Health endpoints
//! - [`ws`] - WebSocket ingress and message routing

pub mod actors;
pub mod config;
pub mod errors;
pub mod liveness;
pub mod observability;
pub mod ws;
