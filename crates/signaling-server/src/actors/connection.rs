//! `ConnectionActor` - per-WebSocket-connection actor.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one WebSocket connection
//! - Is 1:1 with room membership (one connection = one room)
//! - Serializes outbound `ServerMessage`s and pushes them onto the
//!   socket writer channel
//!
//! Delivery is fire-and-forget end to end: the room hands a message to
//! the connection mailbox without waiting, and the mailbox drains into an
//! unbounded writer channel. A slow or dead client can therefore never
//! delay delivery to other participants.
//!
//! # Lifecycle
//!
//! 1. Created when a join (or room creation) is accepted by a `RoomActor`
//! 2. Runs until the socket closes, the participant leaves, or the room
//!    closes
//! 3. Cancellation via child token propagates from the `RoomActor`

use crate::errors::SignalError;

use super::messages::{ClientSender, ConnectionMessage};

use common::types::{ParticipantId, RoomCode};
use signaling_protocol::{encode_server, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: uuid::Uuid,
    participant_id: ParticipantId,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> uuid::Uuid {
        self.connection_id
    }

    /// Get the participant ID.
    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Queue one message for delivery to the client.
    ///
    /// Non-blocking: a full mailbox (client hopelessly behind) drops the
    /// frame rather than stalling the caller. Relay is best-effort by
    /// contract.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Internal`] if the frame could not be
    /// queued; callers treat this as a failed best-effort send.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), SignalError> {
        self.sender
            .try_send(ConnectionMessage::Deliver { message })
            .map_err(|e| SignalError::Internal(format!("connection mailbox unavailable: {e}")))
    }

    /// Ask the actor to stop; the socket is closing.
    pub async fn close(&self, reason: String) -> Result<(), SignalError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Connection ID.
    connection_id: uuid::Uuid,
    /// Associated participant ID.
    participant_id: ParticipantId,
    /// Room code, for log context.
    room_code: RoomCode,
    /// Message receiver.
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the room's token).
    cancel_token: CancellationToken,
    /// Outbound frames to the socket writer task.
    client_tx: ClientSender,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: uuid::Uuid,
        participant_id: ParticipantId,
        room_code: RoomCode,
        cancel_token: CancellationToken,
        client_tx: ClientSender,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let actor = Self {
            connection_id,
            participant_id,
            room_code,
            receiver,
            cancel_token: cancel_token.clone(),
            client_tx,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            participant_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "relay.actor.connection",
        fields(
            connection_id = %self.connection_id,
            participant_id = %self.participant_id,
            room_code = %self.room_code
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            participant_id = %self.participant_id,
            room_code = %self.room_code,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "relay.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    // Flush already-queued frames (e.g. the room-closed
                    // notice broadcast just before cancellation) so they
                    // reach the writer before the actor exits.
                    while let Ok(message) = self.receiver.try_recv() {
                        if self.handle_message(message) {
                            break;
                        }
                    }
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message) {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "relay.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.connection",
            connection_id = %self.connection_id,
            participant_id = %self.participant_id,
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { message } => {
                self.handle_deliver(&message);
                false
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                true
            }
        }
    }

    /// Serialize one frame and push it to the socket writer.
    fn handle_deliver(&mut self, message: &ServerMessage) {
        let text = match encode_server(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "relay.actor.connection",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Failed to encode outbound frame, dropping"
                );
                return;
            }
        };

        if self.client_tx.send(text).is_err() {
            // Writer task is gone; the socket is dead. Stop queueing and
            // let the room's health check notice the closed connection.
            debug!(
                target: "relay.actor.connection",
                connection_id = %self.connection_id,
                "Socket writer gone, cancelling connection actor"
            );
            self.cancel_token.cancel();
        }
    }
}
