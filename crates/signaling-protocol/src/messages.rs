//! Signaling message types.
//!
//! Messages are internally tagged on `"type"` with kebab-case
//! discriminants and camelCase field names, e.g.
//! `{"type":"join-room","roomId":"AB2CDE","name":"Bob"}`.
//!
//! # Negotiation contract
//!
//! The relay forwards `offer`/`answer`/`ice-candidate` payloads verbatim,
//! attaching the sender identity as `from`. Ordering between a given
//! sender/target pair is preserved as sent; there is no cross-pair
//! ordering guarantee and no deduplication. Glare avoidance is a client
//! contract: for any peer pair, the side that already held room
//! membership when the other joined is the initiator, and only the
//! initiator may open a fresh offer cycle before a remote description
//! exists.

use common::types::{ParticipantId, StreamId};
use serde::{Deserialize, Serialize};

/// Which media track a `toggle-media` message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Microphone audio track.
    Mic,
    /// Camera video track.
    Camera,
}

/// One participant as presented to other clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    /// Participant identity.
    pub id: ParticipantId,
    /// Self-declared display name (not validated for uniqueness).
    pub name: String,
    /// Whether this participant holds the host role.
    pub is_host: bool,
}

/// Messages a client may send to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Create a room and become its host.
    CreateRoom {
        /// Display name for the creating participant.
        name: String,
    },

    /// Join an existing room as a guest, or resume a disconnected
    /// membership by presenting the previously issued identity.
    JoinRoom {
        /// Room code as typed by the user; normalized server-side.
        room_id: String,
        /// Display name for the joining participant.
        name: String,
        /// Rejoin identity from a previous session, if reconnecting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rejoin_id: Option<ParticipantId>,
    },

    /// Opaque session description offer, relayed to `target`.
    Offer {
        target: ParticipantId,
        sdp: serde_json::Value,
    },

    /// Opaque session description answer, relayed to `target`.
    Answer {
        target: ParticipantId,
        sdp: serde_json::Value,
    },

    /// Opaque network-candidate descriptor, relayed to `target`.
    IceCandidate {
        target: ParticipantId,
        candidate: serde_json::Value,
    },

    /// Mic/camera enable state changed; broadcast to the room.
    ToggleMedia { media_type: MediaType, enabled: bool },

    /// Screen share started; `stream_id` lets peers classify the
    /// incoming track without relying on arrival order.
    StartScreenShare {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<StreamId>,
    },

    /// Screen share stopped.
    StopScreenShare,

    /// Recording started (host-only by convention, not enforced).
    RecordingStarted,

    /// Recording stopped.
    RecordingStopped,

    /// Heartbeat; refreshes liveness, no reply.
    Ping,
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Reply to `create-room`, sent only to the requesting connection.
    RoomCreated {
        room_id: String,
        participant_id: ParticipantId,
        is_host: bool,
    },

    /// Reply to `join-room`, sent only to the requesting connection.
    /// `participants` excludes the caller.
    RoomJoined {
        room_id: String,
        participant_id: ParticipantId,
        is_host: bool,
        participants: Vec<ParticipantSummary>,
    },

    /// A new participant entered the room.
    ParticipantJoined { participant: ParticipantSummary },

    /// A disconnected participant resumed its membership; peers should
    /// repair any failed negotiation rather than treat it as gone.
    ParticipantReconnected { participant_id: ParticipantId },

    /// A participant left or was evicted.
    ParticipantLeft { participant_id: ParticipantId },

    /// The host departed; the room no longer exists.
    RoomClosed,

    /// Relayed offer with the sender identity attached.
    Offer {
        from: ParticipantId,
        sdp: serde_json::Value,
    },

    /// Relayed answer with the sender identity attached.
    Answer {
        from: ParticipantId,
        sdp: serde_json::Value,
    },

    /// Relayed network-candidate descriptor.
    IceCandidate {
        from: ParticipantId,
        candidate: serde_json::Value,
    },

    /// A participant's mic/camera state changed.
    MediaStateChanged {
        participant_id: ParticipantId,
        media_type: MediaType,
        enabled: bool,
    },

    /// A participant started sharing its screen.
    StartScreenShare {
        participant_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stream_id: Option<StreamId>,
    },

    /// A participant stopped sharing its screen.
    StopScreenShare { participant_id: ParticipantId },

    /// A participant started recording.
    RecordingStarted { participant_id: ParticipantId },

    /// A participant stopped recording.
    RecordingStopped { participant_id: ParticipantId },

    /// Request-level failure surfaced to one client.
    Error { message: String },
}
