//! `RoomActor` - per-room actor that owns all room state.
//!
//! Each `RoomActor`:
//! - Owns the participant map and the host binding for one room
//! - Supervises N `ConnectionActor` instances
//! - Relays targeted negotiation payloads and room-wide broadcasts
//! - Applies the liveness policy on a periodic sweep
//!
//! All mutation serializes through the room mailbox, which is the
//! per-room synchronization discipline: two rooms never contend and no
//! lock is held across a send.
//!
//! # Disconnect handling
//!
//! When a connection drops abruptly:
//! 1. The participant is marked Disconnected (still a room member)
//! 2. A grace period runs for rejoin by identity
//! 3. If not rejoined in time, the participant is removed exactly as an
//!    explicit leave - which, for the host, closes the whole room

use crate::errors::SignalError;
use crate::liveness::LivenessPolicy;

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{
    ClientSender, JoinResult, ParticipantInfo, ParticipantStatus, RegistryMessage, RelayPayload,
    Role, RoomMessage, RoomState,
};

use common::types::{ParticipantId, RoomCode, StreamId};
use signaling_protocol::{MediaType, ParticipantSummary, ServerMessage};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    code: RoomCode,
}

impl RoomActorHandle {
    /// Get the room code.
    #[must_use]
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Request to join this room, fresh or by rejoin identity.
    ///
    /// # Errors
    ///
    /// Returns `RoomNotFound` if the room is already closing, or an
    /// internal error if the actor is unreachable.
    pub async fn connection_join(
        &self,
        connection_id: Uuid,
        display_name: String,
        rejoin_id: Option<ParticipantId>,
        client_tx: ClientSender,
    ) -> Result<JoinResult, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::ConnectionJoin {
                connection_id,
                display_name,
                rejoin_id,
                client_tx,
                respond_to: tx,
            })
            .await
            // A closed mailbox means the room actor already stopped;
            // from the client's perspective the room no longer exists.
            .map_err(|_| SignalError::RoomNotFound(self.code.to_string()))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Notify of an abrupt connection loss.
    pub async fn connection_disconnected(
        &self,
        connection_id: Uuid,
        participant_id: ParticipantId,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::ConnectionDisconnected {
                connection_id,
                participant_id,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Explicit leave. A departing host closes the room for everyone.
    pub async fn participant_leave(
        &self,
        participant_id: ParticipantId,
    ) -> Result<(), SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::ParticipantLeave {
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Relay an opaque negotiation payload to one participant.
    pub async fn relay(
        &self,
        from: ParticipantId,
        target: ParticipantId,
        payload: RelayPayload,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Relay {
                from,
                target,
                payload,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Record and broadcast a mic/camera state change.
    pub async fn toggle_media(
        &self,
        participant_id: ParticipantId,
        media_type: MediaType,
        enabled: bool,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::ToggleMedia {
                participant_id,
                media_type,
                enabled,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Record and broadcast a screen-share start.
    pub async fn start_screen_share(
        &self,
        participant_id: ParticipantId,
        stream_id: Option<StreamId>,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::StartScreenShare {
                participant_id,
                stream_id,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Record and broadcast a screen-share stop.
    pub async fn stop_screen_share(
        &self,
        participant_id: ParticipantId,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::StopScreenShare { participant_id })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Broadcast a recording start/stop notification.
    pub async fn recording(
        &self,
        participant_id: ParticipantId,
        started: bool,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Recording {
                participant_id,
                started,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Heartbeat; refreshes the participant's liveness timestamp.
    pub async fn heartbeat(&self, participant_id: ParticipantId) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::Heartbeat { participant_id })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Get a state snapshot.
    pub async fn get_state(&self) -> Result<RoomState, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Participant state within a room.
#[derive(Debug)]
struct Participant {
    participant_id: ParticipantId,
    display_name: String,
    role: Role,
    /// Current connection actor handle (None while disconnected).
    connection: Option<ConnectionActorHandle>,
    status: ParticipantStatus,
    /// When the participant disconnected (for the grace period).
    disconnected_at: Option<Instant>,
    /// Refreshed on every inbound message from this participant.
    last_seen: Instant,
    mic_enabled: bool,
    camera_enabled: bool,
    screen_sharing: bool,
    /// Stream-correlation token for the active screen share.
    screen_stream: Option<StreamId>,
}

impl Participant {
    fn new_active(
        participant_id: ParticipantId,
        display_name: String,
        role: Role,
        connection: ConnectionActorHandle,
    ) -> Self {
        Self {
            participant_id,
            display_name,
            role,
            connection: Some(connection),
            status: ParticipantStatus::Active,
            disconnected_at: None,
            last_seen: Instant::now(),
            mic_enabled: true,
            camera_enabled: true,
            screen_sharing: false,
            screen_stream: None,
        }
    }

    fn to_summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.participant_id,
            name: self.display_name.clone(),
            is_host: self.role == Role::Host,
        }
    }

    fn to_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.participant_id,
            name: self.display_name.clone(),
            role: self.role,
            status: self.status,
            mic_enabled: self.mic_enabled,
            camera_enabled: self.camera_enabled,
            screen_sharing: self.screen_sharing,
            screen_stream: self.screen_stream.clone(),
        }
    }
}

/// Managed connection state.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
    participant_id: ParticipantId,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room code.
    code: RoomCode,
    /// Host identity; bound at creation, unbound only by room closure.
    host_id: ParticipantId,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    /// Participants by ID.
    participants: HashMap<ParticipantId, Participant>,
    /// Connections by ID.
    connections: HashMap<Uuid, ManagedConnection>,
    /// Liveness timeout policy.
    policy: LivenessPolicy,
    /// Channel back to the registry for closure reporting.
    registry_tx: mpsc::Sender<RegistryMessage>,
    /// When the room last became empty, if it is.
    emptied_at: Option<Instant>,
    /// Room creation timestamp.
    created_at: i64,
    /// Whether the room is closing.
    is_closing: bool,
}

impl RoomActor {
    /// Spawn a new room actor with its creating host already joined.
    ///
    /// A room with no host must not exist, so host creation is part of
    /// room creation rather than a separate join.
    ///
    /// Returns a handle, the task join handle, and the host identity.
    pub fn spawn(
        code: RoomCode,
        policy: LivenessPolicy,
        cancel_token: CancellationToken,
        registry_tx: mpsc::Sender<RegistryMessage>,
        host_name: String,
        host_connection_id: Uuid,
        host_client_tx: ClientSender,
    ) -> (RoomActorHandle, JoinHandle<()>, ParticipantId) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let host_id = ParticipantId::new();
        let (conn_handle, conn_task) = ConnectionActor::spawn(
            host_connection_id,
            host_id,
            code.clone(),
            cancel_token.child_token(),
            host_client_tx,
        );

        let mut participants = HashMap::new();
        participants.insert(
            host_id,
            Participant::new_active(host_id, host_name, Role::Host, conn_handle.clone()),
        );

        let mut connections = HashMap::new();
        connections.insert(
            host_connection_id,
            ManagedConnection {
                handle: conn_handle,
                task_handle: conn_task,
                participant_id: host_id,
            },
        );

        let actor = Self {
            code: code.clone(),
            host_id,
            receiver,
            cancel_token: cancel_token.clone(),
            participants,
            connections,
            policy,
            registry_tx,
            emptied_at: None,
            created_at: chrono::Utc::now().timestamp(),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            code,
        };

        (handle, task_handle, host_id)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.room", fields(room_code = %self.code))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.room",
            room_code = %self.code,
            host_id = %self.host_id,
            "RoomActor started"
        );

        let mut sweep = tokio::time::interval(self.policy.sweep_interval);

        loop {
            // Reap connection actors that exited on their own
            self.check_connection_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick() => {
                    self.apply_liveness_policy().await;
                    if self.is_closing {
                        // close_room cancelled our token; loop back so
                        // the cancellation branch runs the shutdown
                        continue;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "relay.actor.room",
                                room_code = %self.code,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.room",
            room_code = %self.code,
            participants = self.participants.len(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::ConnectionJoin {
                connection_id,
                display_name,
                rejoin_id,
                client_tx,
                respond_to,
            } => {
                let result = self.handle_join(connection_id, display_name, rejoin_id, client_tx);
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectionDisconnected {
                connection_id,
                participant_id,
            } => {
                self.handle_disconnect(connection_id, participant_id).await;
            }

            RoomMessage::ParticipantLeave {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_leave(participant_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Relay {
                from,
                target,
                payload,
            } => {
                self.handle_relay(from, target, payload);
            }

            RoomMessage::ToggleMedia {
                participant_id,
                media_type,
                enabled,
            } => {
                self.handle_toggle_media(participant_id, media_type, enabled);
            }

            RoomMessage::StartScreenShare {
                participant_id,
                stream_id,
            } => {
                self.handle_screen_share(participant_id, true, stream_id);
            }

            RoomMessage::StopScreenShare { participant_id } => {
                self.handle_screen_share(participant_id, false, None);
            }

            RoomMessage::Recording {
                participant_id,
                started,
            } => {
                self.handle_recording(participant_id, started);
            }

            RoomMessage::Heartbeat { participant_id } => {
                self.touch(participant_id);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    /// Handle a join or rejoin.
    #[instrument(skip_all, fields(room_code = %self.code))]
    fn handle_join(
        &mut self,
        connection_id: Uuid,
        display_name: String,
        rejoin_id: Option<ParticipantId>,
        client_tx: ClientSender,
    ) -> Result<JoinResult, SignalError> {
        if self.is_closing {
            return Err(SignalError::RoomNotFound(self.code.to_string()));
        }

        // A rejoin identity only matches a Disconnected membership;
        // anything else falls through to a fresh guest join.
        if let Some(id) = rejoin_id {
            let matches_disconnected = self
                .participants
                .get(&id)
                .is_some_and(|p| p.status == ParticipantStatus::Disconnected);
            if matches_disconnected {
                return Ok(self.handle_rejoin(connection_id, id, client_tx));
            }
            debug!(
                target: "relay.actor.room",
                room_code = %self.code,
                rejoin_id = %id,
                "Rejoin identity unknown or still active, joining fresh"
            );
        }

        let participant_id = ParticipantId::new();
        let (conn_handle, conn_task) = ConnectionActor::spawn(
            connection_id,
            participant_id,
            self.code.clone(),
            self.cancel_token.child_token(),
            client_tx,
        );

        self.connections.insert(
            connection_id,
            ManagedConnection {
                handle: conn_handle.clone(),
                task_handle: conn_task,
                participant_id,
            },
        );

        // Everyone already present, from the newcomer's perspective
        let participants: Vec<ParticipantSummary> = self
            .participants
            .values()
            .map(Participant::to_summary)
            .collect();

        let participant = Participant::new_active(
            participant_id,
            display_name,
            Role::Guest,
            conn_handle,
        );
        let summary = participant.to_summary();
        self.participants.insert(participant_id, participant);
        self.emptied_at = None;

        self.broadcast_except(
            participant_id,
            &ServerMessage::ParticipantJoined {
                participant: summary,
            },
        );

        info!(
            target: "relay.actor.room",
            participant_id = %participant_id,
            total_participants = self.participants.len(),
            "Participant joined"
        );

        Ok(JoinResult {
            participant_id,
            is_host: false,
            reconnected: false,
            participants,
        })
    }

    /// Resume a disconnected membership under its original identity.
    fn handle_rejoin(
        &mut self,
        connection_id: Uuid,
        participant_id: ParticipantId,
        client_tx: ClientSender,
    ) -> JoinResult {
        let (conn_handle, conn_task) = ConnectionActor::spawn(
            connection_id,
            participant_id,
            self.code.clone(),
            self.cancel_token.child_token(),
            client_tx,
        );

        self.connections.insert(
            connection_id,
            ManagedConnection {
                handle: conn_handle.clone(),
                task_handle: conn_task,
                participant_id,
            },
        );

        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.status = ParticipantStatus::Active;
            participant.disconnected_at = None;
            participant.last_seen = Instant::now();
            participant.connection = Some(conn_handle);
        }

        // Peers repair failed negotiation rather than treating the
        // returning participant as a newcomer
        self.broadcast_except(
            participant_id,
            &ServerMessage::ParticipantReconnected { participant_id },
        );

        info!(
            target: "relay.actor.room",
            participant_id = %participant_id,
            "Participant reconnected"
        );

        let participants: Vec<ParticipantSummary> = self
            .participants
            .values()
            .filter(|p| p.participant_id != participant_id)
            .map(Participant::to_summary)
            .collect();

        JoinResult {
            participant_id,
            is_host: participant_id == self.host_id,
            reconnected: true,
            participants,
        }
    }

    /// Handle an abrupt connection loss; the grace period starts here.
    async fn handle_disconnect(&mut self, connection_id: Uuid, participant_id: ParticipantId) {
        if let Some(conn) = self.connections.remove(&connection_id) {
            conn.handle.cancel();
            // Wait briefly for the task so its resources settle
            let _ = tokio::time::timeout(Duration::from_millis(100), conn.task_handle).await;
        }

        if let Some(participant) = self.participants.get_mut(&participant_id) {
            // Only a live connection transitions to Disconnected; a late
            // notification for an already-replaced connection is ignored
            if participant.status == ParticipantStatus::Active {
                participant.status = ParticipantStatus::Disconnected;
                participant.disconnected_at = Some(Instant::now());
                participant.connection = None;

                info!(
                    target: "relay.actor.room",
                    room_code = %self.code,
                    participant_id = %participant_id,
                    "Participant disconnected, grace period started"
                );
            }
        }
    }

    /// Handle an explicit leave.
    #[instrument(skip_all, fields(room_code = %self.code))]
    async fn handle_leave(&mut self, participant_id: ParticipantId) -> Result<(), SignalError> {
        if !self.participants.contains_key(&participant_id) {
            return Err(SignalError::ParticipantNotFound);
        }

        self.remove_member(participant_id).await;
        Ok(())
    }

    /// Remove a member with leave semantics: a departing host closes the
    /// room, a departing guest is removed and announced.
    async fn remove_member(&mut self, participant_id: ParticipantId) {
        let Some(role) = self.participants.get(&participant_id).map(|p| p.role) else {
            return;
        };

        if role == Role::Host {
            info!(
                target: "relay.actor.room",
                room_code = %self.code,
                "Host departed, closing room"
            );
            self.close_room(Some(participant_id)).await;
            return;
        }

        if let Some(participant) = self.participants.remove(&participant_id) {
            if let Some(conn) = &participant.connection {
                conn.cancel();
            }
            self.connections
                .retain(|_, managed| managed.participant_id != participant_id);

            self.broadcast_except(
                participant_id,
                &ServerMessage::ParticipantLeft { participant_id },
            );

            if self.participants.is_empty() {
                self.emptied_at = Some(Instant::now());
            }

            info!(
                target: "relay.actor.room",
                participant_id = %participant_id,
                remaining_participants = self.participants.len(),
                "Participant left"
            );
        }
    }

    /// Close the room: notify everyone except `except`, cancel all
    /// connections, report to the registry and cancel self.
    async fn close_room(&mut self, except: Option<ParticipantId>) {
        if self.is_closing {
            return;
        }
        self.is_closing = true;

        info!(
            target: "relay.actor.room",
            room_code = %self.code,
            participants = self.participants.len(),
            "Closing room"
        );

        for participant in self.participants.values() {
            if Some(participant.participant_id) == except {
                continue;
            }
            if let Some(conn) = &participant.connection {
                if let Err(e) = conn.deliver(ServerMessage::RoomClosed) {
                    debug!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        participant_id = %participant.participant_id,
                        error = %e,
                        "Failed to deliver room-closed notice"
                    );
                }
            }
        }

        for managed in self.connections.values() {
            managed.handle.cancel();
        }

        if self
            .registry_tx
            .send(RegistryMessage::RoomClosed {
                code: self.code.clone(),
            })
            .await
            .is_err()
        {
            // Registry already gone (process shutdown); nothing to report
            debug!(
                target: "relay.actor.room",
                room_code = %self.code,
                "Registry unreachable during room closure"
            );
        }

        self.cancel_token.cancel();
    }

    /// Relay an opaque payload to one participant, verbatim plus `from`.
    ///
    /// Unknown sender or unavailable target drops the message silently;
    /// the sender's own negotiation timeout reveals the failure.
    fn handle_relay(&mut self, from: ParticipantId, target: ParticipantId, payload: RelayPayload) {
        if !self.participants.contains_key(&from) {
            debug!(
                target: "relay.actor.room",
                room_code = %self.code,
                from = %from,
                "Relay from unknown participant, dropping"
            );
            return;
        }
        self.touch(from);

        let delivered = self
            .participants
            .get(&target)
            .and_then(|p| p.connection.as_ref())
            .map(|conn| conn.deliver(payload.into_server_message(from)));

        match delivered {
            Some(Ok(())) => {}
            Some(Err(_)) | None => {
                debug!(
                    target: "relay.actor.room",
                    room_code = %self.code,
                    from = %from,
                    relay_target = %target,
                    "Relay target unavailable, dropping"
                );
            }
        }
    }

    /// Record a mic/camera change and broadcast it.
    fn handle_toggle_media(
        &mut self,
        participant_id: ParticipantId,
        media_type: MediaType,
        enabled: bool,
    ) {
        self.touch(participant_id);

        let Some(participant) = self.participants.get_mut(&participant_id) else {
            return;
        };
        match media_type {
            MediaType::Mic => participant.mic_enabled = enabled,
            MediaType::Camera => participant.camera_enabled = enabled,
        }

        self.broadcast_except(
            participant_id,
            &ServerMessage::MediaStateChanged {
                participant_id,
                media_type,
                enabled,
            },
        );
    }

    /// Record a screen-share transition and broadcast it.
    fn handle_screen_share(
        &mut self,
        participant_id: ParticipantId,
        started: bool,
        stream_id: Option<StreamId>,
    ) {
        self.touch(participant_id);

        let Some(participant) = self.participants.get_mut(&participant_id) else {
            return;
        };
        participant.screen_sharing = started;
        participant.screen_stream = if started { stream_id.clone() } else { None };

        let message = if started {
            ServerMessage::StartScreenShare {
                participant_id,
                stream_id,
            }
        } else {
            ServerMessage::StopScreenShare { participant_id }
        };
        self.broadcast_except(participant_id, &message);
    }

    /// Broadcast a recording start/stop notification.
    fn handle_recording(&mut self, participant_id: ParticipantId, started: bool) {
        if !self.participants.contains_key(&participant_id) {
            return;
        }
        self.touch(participant_id);

        let message = if started {
            ServerMessage::RecordingStarted { participant_id }
        } else {
            ServerMessage::RecordingStopped { participant_id }
        };
        self.broadcast_except(participant_id, &message);
    }

    /// Get a state snapshot.
    fn get_state(&self) -> RoomState {
        RoomState {
            code: self.code.clone(),
            host_id: self.host_id,
            participants: self
                .participants
                .values()
                .map(Participant::to_info)
                .collect(),
            is_closing: self.is_closing,
            created_at: self.created_at,
        }
    }

    /// Refresh a participant's liveness timestamp.
    fn touch(&mut self, participant_id: ParticipantId) {
        if let Some(participant) = self.participants.get_mut(&participant_id) {
            participant.last_seen = Instant::now();
        }
    }

    /// Apply the liveness policy: evict silent actives, expire grace
    /// windows, and tear down an empty room past its retention.
    async fn apply_liveness_policy(&mut self) {
        let now = Instant::now();

        let mut expired: Vec<ParticipantId> = Vec::new();
        for (id, participant) in &self.participants {
            let gone = match participant.status {
                ParticipantStatus::Active => self.policy.is_stale(participant.last_seen, now),
                ParticipantStatus::Disconnected => participant
                    .disconnected_at
                    .is_some_and(|at| self.policy.grace_expired(at, now)),
            };
            if gone {
                expired.push(*id);
            }
        }

        for participant_id in expired {
            if self.is_closing {
                return;
            }
            info!(
                target: "relay.actor.room",
                room_code = %self.code,
                participant_id = %participant_id,
                "Liveness expiry, removing participant"
            );
            // Eviction has exactly the semantics of an explicit leave,
            // including room closure when the host is evicted
            self.remove_member(participant_id).await;
        }

        if !self.is_closing && self.participants.is_empty() {
            if let Some(emptied_at) = self.emptied_at {
                if self.policy.empty_room_expired(emptied_at, now) {
                    info!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        "Empty room expired, closing"
                    );
                    self.close_room(None).await;
                }
            }
        }
    }

    /// Reap connection actors that exited on their own (dead writers).
    async fn check_connection_health(&mut self) {
        let mut finished = Vec::new();

        for (conn_id, managed) in &self.connections {
            if managed.task_handle.is_finished() {
                finished.push(*conn_id);
            }
        }

        for conn_id in finished {
            if let Some(managed) = self.connections.remove(&conn_id) {
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "relay.actor.room",
                            room_code = %self.code,
                            connection_id = %conn_id,
                            "Connection actor exited cleanly"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "relay.actor.room",
                                room_code = %self.code,
                                connection_id = %conn_id,
                                error = ?join_error,
                                "Connection actor panicked"
                            );
                        }
                    }
                }

                self.handle_disconnect(conn_id, managed.participant_id)
                    .await;
            }
        }
    }

    /// Broadcast a message to every participant except the source.
    ///
    /// Each delivery is independent: one failed or slow client never
    /// affects the others.
    fn broadcast_except(&self, except: ParticipantId, message: &ServerMessage) {
        for participant in self.participants.values() {
            if participant.participant_id == except {
                continue;
            }
            if let Some(conn) = &participant.connection {
                if let Err(e) = conn.deliver(message.clone()) {
                    debug!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        participant_id = %participant.participant_id,
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "relay.actor.room",
            room_code = %self.code,
            participants = self.participants.len(),
            connections = self.connections.len(),
            "Performing graceful shutdown"
        );

        if !self.is_closing {
            // Shutdown arrived from above (registry); tell the clients
            self.is_closing = true;
            for participant in self.participants.values() {
                if let Some(conn) = &participant.connection {
                    let _ = conn.deliver(ServerMessage::RoomClosed);
                }
            }
        }

        for managed in self.connections.values() {
            managed.handle.cancel();
        }

        for (conn_id, managed) in self.connections.drain() {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        connection_id = %conn_id,
                        "Connection completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        connection_id = %conn_id,
                        error = ?e,
                        "Connection task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.actor.room",
                        room_code = %self.code,
                        connection_id = %conn_id,
                        "Connection shutdown timed out"
                    );
                }
            }
        }

        info!(
            target: "relay.actor.room",
            room_code = %self.code,
            "Graceful shutdown complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct TestRoom {
        handle: RoomActorHandle,
        host_id: ParticipantId,
        host_rx: UnboundedReceiver<String>,
        registry_rx: mpsc::Receiver<RegistryMessage>,
    }

    fn spawn_test_room() -> TestRoom {
        let (registry_tx, registry_rx) = mpsc::channel(16);
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let code = RoomCode::parse("AB2CDE").unwrap();
        let (handle, _task, host_id) = RoomActor::spawn(
            code,
            LivenessPolicy::default(),
            CancellationToken::new(),
            registry_tx,
            "Alice".to_string(),
            Uuid::new_v4(),
            host_tx,
        );
        TestRoom {
            handle,
            host_id,
            host_rx,
            registry_rx,
        }
    }

    async fn join(
        room: &RoomActorHandle,
        name: &str,
    ) -> (JoinResult, UnboundedReceiver<String>, Uuid) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        let result = room
            .connection_join(conn_id, name.to_string(), None, tx)
            .await
            .unwrap();
        (result, rx, conn_id)
    }

    async fn recv_frame(rx: &mut UnboundedReceiver<String>) -> ServerMessage {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_room_spawns_with_host_bound() {
        let room = spawn_test_room();

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.host_id, room.host_id);
        assert_eq!(state.participants.len(), 1);
        let host = &state.participants[0];
        assert_eq!(host.role, Role::Host);
        assert_eq!(host.name, "Alice");
        assert!(host.mic_enabled);
        assert!(host.camera_enabled);
        assert!(!host.screen_sharing);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_join_returns_existing_participants() {
        let mut room = spawn_test_room();

        let (result, _bob_rx, _) = join(&room.handle, "Bob").await;
        assert!(!result.reconnected);
        assert_eq!(result.participants.len(), 1);
        assert_eq!(result.participants[0].name, "Alice");
        assert!(result.participants[0].is_host);

        // Host is told about the newcomer
        match recv_frame(&mut room.host_rx).await {
            ServerMessage::ParticipantJoined { participant } => {
                assert_eq!(participant.id, result.participant_id);
                assert_eq!(participant.name, "Bob");
                assert!(!participant.is_host);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_targeted_relay_reaches_only_target() {
        let mut room = spawn_test_room();

        let (bob, mut bob_rx, _) = join(&room.handle, "Bob").await;
        let (carol, mut carol_rx, _) = join(&room.handle, "Carol").await;

        // Drain join notifications
        let _ = recv_frame(&mut room.host_rx).await;
        let _ = recv_frame(&mut room.host_rx).await;
        let _ = recv_frame(&mut bob_rx).await;

        room.handle
            .relay(
                bob.participant_id,
                carol.participant_id,
                RelayPayload::Offer(serde_json::json!({"sdp": "v=0..."})),
            )
            .await
            .unwrap();

        match recv_frame(&mut carol_rx).await {
            ServerMessage::Offer { from, sdp } => {
                assert_eq!(from, bob.participant_id);
                assert_eq!(sdp["sdp"], "v=0...");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // Neither the host nor the sender saw the offer
        room.handle.heartbeat(bob.participant_id).await.unwrap();
        assert!(room.host_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_relay_to_unknown_target_dropped_silently() {
        let mut room = spawn_test_room();

        let (bob, mut bob_rx, _) = join(&room.handle, "Bob").await;
        let _ = recv_frame(&mut room.host_rx).await;

        room.handle
            .relay(
                bob.participant_id,
                ParticipantId::new(),
                RelayPayload::Answer(serde_json::json!({"sdp": "x"})),
            )
            .await
            .unwrap();

        // No error frame appears anywhere
        room.handle.heartbeat(bob.participant_id).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
        assert!(room.host_rx.try_recv().is_err());

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let mut room = spawn_test_room();

        let (bob, mut bob_rx, _) = join(&room.handle, "Bob").await;
        let (_carol, mut carol_rx, _) = join(&room.handle, "Carol").await;

        let _ = recv_frame(&mut room.host_rx).await;
        let _ = recv_frame(&mut room.host_rx).await;
        let _ = recv_frame(&mut bob_rx).await;

        room.handle
            .toggle_media(bob.participant_id, MediaType::Camera, false)
            .await
            .unwrap();

        for rx in [&mut room.host_rx, &mut carol_rx] {
            match recv_frame(rx).await {
                ServerMessage::MediaStateChanged {
                    participant_id,
                    media_type,
                    enabled,
                } => {
                    assert_eq!(participant_id, bob.participant_id);
                    assert_eq!(media_type, MediaType::Camera);
                    assert!(!enabled);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(bob_rx.try_recv().is_err());

        // Late joiners see the updated state
        let state = room.handle.get_state().await.unwrap();
        let bob_info = state
            .participants
            .iter()
            .find(|p| p.id == bob.participant_id)
            .unwrap();
        assert!(!bob_info.camera_enabled);
        assert!(bob_info.mic_enabled);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_screen_share_records_stream_token() {
        let mut room = spawn_test_room();

        let (bob, _bob_rx, _) = join(&room.handle, "Bob").await;
        let _ = recv_frame(&mut room.host_rx).await;

        room.handle
            .start_screen_share(
                bob.participant_id,
                Some(StreamId("scr-42".to_string())),
            )
            .await
            .unwrap();

        match recv_frame(&mut room.host_rx).await {
            ServerMessage::StartScreenShare {
                participant_id,
                stream_id,
            } => {
                assert_eq!(participant_id, bob.participant_id);
                assert_eq!(stream_id, Some(StreamId("scr-42".to_string())));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let state = room.handle.get_state().await.unwrap();
        let bob_info = state
            .participants
            .iter()
            .find(|p| p.id == bob.participant_id)
            .unwrap();
        assert!(bob_info.screen_sharing);
        assert_eq!(bob_info.screen_stream, Some(StreamId("scr-42".to_string())));

        room.handle
            .stop_screen_share(bob.participant_id)
            .await
            .unwrap();

        match recv_frame(&mut room.host_rx).await {
            ServerMessage::StopScreenShare { participant_id } => {
                assert_eq!(participant_id, bob.participant_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_guest_leave_announced() {
        let mut room = spawn_test_room();

        let (bob, _bob_rx, _) = join(&room.handle, "Bob").await;
        let _ = recv_frame(&mut room.host_rx).await;

        room.handle
            .participant_leave(bob.participant_id)
            .await
            .unwrap();

        match recv_frame(&mut room.host_rx).await {
            ServerMessage::ParticipantLeft { participant_id } => {
                assert_eq!(participant_id, bob.participant_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 1);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_host_leave_closes_room() {
        let mut room = spawn_test_room();

        let (_bob, mut bob_rx, _) = join(&room.handle, "Bob").await;
        let _ = recv_frame(&mut room.host_rx).await;

        room.handle.participant_leave(room.host_id).await.unwrap();

        // Every remaining participant hears room-closed exactly once
        match recv_frame(&mut bob_rx).await {
            ServerMessage::RoomClosed => {}
            other => panic!("unexpected frame: {other:?}"),
        }

        // The room reported its own closure to the registry
        let reported = tokio::time::timeout(Duration::from_secs(1), room.registry_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reported, RegistryMessage::RoomClosed { .. }));
        assert!(room.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_rejoin_keeps_identity_without_duplicate() {
        let mut room = spawn_test_room();

        let (bob, _bob_rx, bob_conn) = join(&room.handle, "Bob").await;
        let _ = recv_frame(&mut room.host_rx).await;

        room.handle
            .connection_disconnected(bob_conn, bob.participant_id)
            .await
            .unwrap();

        // Rejoin with the original identity
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = room
            .handle
            .connection_join(
                Uuid::new_v4(),
                "Bob".to_string(),
                Some(bob.participant_id),
                tx,
            )
            .await
            .unwrap();

        assert!(result.reconnected);
        assert_eq!(result.participant_id, bob.participant_id);

        match recv_frame(&mut room.host_rx).await {
            ServerMessage::ParticipantReconnected { participant_id } => {
                assert_eq!(participant_id, bob.participant_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // No duplicate membership
        let state = room.handle.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 2);

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_host_rejoin_retains_host_role() {
        let room = spawn_test_room();

        let (_bob, mut bob_rx, _) = join(&room.handle, "Bob").await;

        // The host's socket drops; its membership survives in grace
        room.handle
            .connection_disconnected(Uuid::new_v4(), room.host_id)
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let rejoined = room
            .handle
            .connection_join(
                Uuid::new_v4(),
                "Alice".to_string(),
                Some(room.host_id),
                tx,
            )
            .await
            .unwrap();

        assert!(rejoined.reconnected);
        assert!(rejoined.is_host);
        assert_eq!(rejoined.participant_id, room.host_id);

        match recv_frame(&mut bob_rx).await {
            ServerMessage::ParticipantReconnected { participant_id } => {
                assert_eq!(participant_id, room.host_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        room.handle.cancel();
    }

    #[tokio::test]
    async fn test_rejoin_with_stale_identity_joins_fresh() {
        let mut room = spawn_test_room();

        // Identity never seen by this room
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = room
            .handle
            .connection_join(
                Uuid::new_v4(),
                "Mallory".to_string(),
                Some(ParticipantId::new()),
                tx,
            )
            .await
            .unwrap();

        assert!(!result.reconnected);
        match recv_frame(&mut room.host_rx).await {
            ServerMessage::ParticipantJoined { .. } => {}
            other => panic!("unexpected frame: {other:?}"),
        }

        room.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_removes_participant() {
        let (registry_tx, _registry_rx) = mpsc::channel(16);
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let code = RoomCode::parse("GRACE2").unwrap();
        let policy = LivenessPolicy {
            liveness_timeout: Duration::from_secs(3600),
            disconnect_grace: Duration::from_secs(60),
            empty_room_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(5),
        };
        let (handle, _task, host_id) = RoomActor::spawn(
            code,
            policy,
            CancellationToken::new(),
            registry_tx,
            "Alice".to_string(),
            Uuid::new_v4(),
            host_tx,
        );

        let (bob, _bob_rx, bob_conn) = join(&handle, "Bob").await;
        let _ = recv_frame(&mut host_rx).await;

        handle
            .connection_disconnected(bob_conn, bob.participant_id)
            .await
            .unwrap();

        // Keep the host alive while Bob's grace period runs out
        for _ in 0..15 {
            tokio::time::advance(Duration::from_secs(5)).await;
            handle.heartbeat(host_id).await.unwrap();
        }

        match recv_frame(&mut host_rx).await {
            ServerMessage::ParticipantLeft { participant_id } => {
                assert_eq!(participant_id, bob.participant_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_participant_evicted_as_leave() {
        let (registry_tx, _registry_rx) = mpsc::channel(16);
        let (host_tx, mut host_rx) = mpsc::unbounded_channel();
        let code = RoomCode::parse("STALE2").unwrap();
        let policy = LivenessPolicy {
            liveness_timeout: Duration::from_secs(45),
            disconnect_grace: Duration::from_secs(3600),
            empty_room_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(5),
        };
        let (handle, _task, host_id) = RoomActor::spawn(
            code,
            policy,
            CancellationToken::new(),
            registry_tx,
            "Alice".to_string(),
            Uuid::new_v4(),
            host_tx,
        );

        let (bob, _bob_rx, _) = join(&handle, "Bob").await;
        let _ = recv_frame(&mut host_rx).await;

        // Host pings, Bob stays silent past the liveness timeout
        for _ in 0..12 {
            tokio::time::advance(Duration::from_secs(5)).await;
            handle.heartbeat(host_id).await.unwrap();
        }

        match recv_frame(&mut host_rx).await {
            ServerMessage::ParticipantLeft { participant_id } => {
                assert_eq!(participant_id, bob.participant_id);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        handle.cancel();
    }
}
