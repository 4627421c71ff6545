//! Actor model implementation.
//!
//! Three actor types form the supervision hierarchy:
//!
//! - [`registry::RegistryActor`] - singleton; owns the room table
//! - [`room::RoomActor`] - one per room; owns all room state
//! - [`connection::ConnectionActor`] - one per WebSocket connection
//!
//! Handles communicate with actors over bounded mpsc mailboxes; replies
//! travel back over oneshot channels. Cancellation tokens form a matching
//! hierarchy so cancelling a room tears down its connections and
//! cancelling the registry tears down everything.

pub mod connection;
pub mod messages;
pub mod registry;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{
    ClientSender, CreateRoomResult, JoinResult, ParticipantInfo, ParticipantStatus, RegistryStatus,
    RelayPayload, Role, RoomState,
};
pub use registry::{RegistryActor, RegistryActorHandle};
pub use room::{RoomActor, RoomActorHandle};
