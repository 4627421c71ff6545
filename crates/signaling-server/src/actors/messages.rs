//! Message types exchanged between actors and their handles.

use common::types::{ParticipantId, RoomCode, StreamId};
use signaling_protocol::{MediaType, ParticipantSummary, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::room::RoomActorHandle;
use crate::errors::SignalError;

/// Outbound frame channel into one connection's socket writer task.
///
/// Unbounded so that no send from an actor can block; a dead writer is
/// detected by the send failing.
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Messages handled by the `RegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a room with the requesting connection as host.
    CreateRoom {
        host_name: String,
        connection_id: Uuid,
        client_tx: ClientSender,
        respond_to: oneshot::Sender<Result<CreateRoomResult, SignalError>>,
    },

    /// Look up a live room by code.
    GetRoom {
        code: RoomCode,
        respond_to: oneshot::Sender<Result<RoomActorHandle, SignalError>>,
    },

    /// A room actor reports its own closure.
    RoomClosed { code: RoomCode },

    /// Get the current registry status.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Result of a successful `create-room`.
#[derive(Debug)]
pub struct CreateRoomResult {
    /// Generated, collision-checked room code.
    pub room_code: RoomCode,
    /// Identity of the host participant.
    pub participant_id: ParticipantId,
    /// Handle to the freshly spawned room actor.
    pub room: RoomActorHandle,
}

/// Registry status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Number of live rooms.
    pub room_count: usize,
    /// Whether new rooms and joins are accepted.
    pub accepting_new: bool,
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection joins the room, either fresh or by rejoin identity.
    ConnectionJoin {
        connection_id: Uuid,
        display_name: String,
        rejoin_id: Option<ParticipantId>,
        client_tx: ClientSender,
        respond_to: oneshot::Sender<Result<JoinResult, SignalError>>,
    },

    /// The underlying socket of a participant closed abruptly; the
    /// participant enters the disconnect grace period.
    ConnectionDisconnected {
        connection_id: Uuid,
        participant_id: ParticipantId,
    },

    /// Explicit leave. A departing host closes the whole room.
    ParticipantLeave {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), SignalError>>,
    },

    /// Targeted relay of an opaque negotiation payload.
    Relay {
        from: ParticipantId,
        target: ParticipantId,
        payload: RelayPayload,
    },

    /// Mic/camera state change; recorded and broadcast.
    ToggleMedia {
        participant_id: ParticipantId,
        media_type: MediaType,
        enabled: bool,
    },

    /// Screen share started; recorded and broadcast.
    StartScreenShare {
        participant_id: ParticipantId,
        stream_id: Option<StreamId>,
    },

    /// Screen share stopped; recorded and broadcast.
    StopScreenShare { participant_id: ParticipantId },

    /// Recording started/stopped notification; broadcast only.
    Recording {
        participant_id: ParticipantId,
        started: bool,
    },

    /// Heartbeat; refreshes `last_seen` only.
    Heartbeat { participant_id: ParticipantId },

    /// Get a state snapshot (registry status, tests).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Opaque negotiation payload kinds the room relays verbatim.
#[derive(Debug, Clone)]
pub enum RelayPayload {
    Offer(serde_json::Value),
    Answer(serde_json::Value),
    IceCandidate(serde_json::Value),
}

impl RelayPayload {
    /// Attach the sender identity, producing the outbound frame.
    #[must_use]
    pub fn into_server_message(self, from: ParticipantId) -> ServerMessage {
        match self {
            RelayPayload::Offer(sdp) => ServerMessage::Offer { from, sdp },
            RelayPayload::Answer(sdp) => ServerMessage::Answer { from, sdp },
            RelayPayload::IceCandidate(candidate) => {
                ServerMessage::IceCandidate { from, candidate }
            }
        }
    }
}

/// Result of a successful join or rejoin.
#[derive(Debug)]
pub struct JoinResult {
    /// Identity assigned (or resumed) for the caller.
    pub participant_id: ParticipantId,
    /// Whether the resumed membership holds the host role. Always false
    /// for fresh joins; joins never grant host.
    pub is_host: bool,
    /// True when an existing disconnected membership was resumed.
    pub reconnected: bool,
    /// Current members of the room, excluding the caller.
    pub participants: Vec<ParticipantSummary>,
}

/// Participant role, set at join time and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Connection state of a participant within its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    /// Live connection attached.
    Active,
    /// Socket lost; retained during the grace period for rejoin.
    Disconnected,
}

/// One participant in a [`RoomState`] snapshot.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
    pub status: ParticipantStatus,
    pub mic_enabled: bool,
    pub camera_enabled: bool,
    pub screen_sharing: bool,
    pub screen_stream: Option<StreamId>,
}

/// Snapshot of a room's state.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub code: RoomCode,
    pub host_id: ParticipantId,
    pub participants: Vec<ParticipantInfo>,
    pub is_closing: bool,
    pub created_at: i64,
}

/// Messages handled by a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Serialize and push one frame to the client.
    Deliver { message: ServerMessage },

    /// Stop the actor; the socket is closing.
    Close { reason: String },
}
