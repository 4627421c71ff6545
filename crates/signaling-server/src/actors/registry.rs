//! `RegistryActor` - singleton actor owning the room table.
//!
//! The registry is the only place room codes are minted and resolved.
//! It supervises every `RoomActor`: rooms report their own closure back
//! over the registry mailbox, and a periodic health check reaps room
//! tasks that exited without reporting.
//!
//! During graceful shutdown the registry stops accepting new rooms,
//! cancels every room (which notifies the remaining clients) and waits
//! for the room tasks with a per-room timeout.

use crate::config::Config;
use crate::errors::SignalError;
use crate::liveness::LivenessPolicy;

use super::messages::{ClientSender, CreateRoomResult, RegistryMessage, RegistryStatus};
use super::room::{RoomActor, RoomActorHandle};

use common::types::RoomCode;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Cadence of the room-task health check.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Handle to the `RegistryActor`.
#[derive(Clone)]
pub struct RegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RegistryActorHandle {
    /// Create a room with the requesting connection as host.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Draining`] during shutdown or
    /// [`SignalError::CapacityExhausted`] if no free code was found.
    pub async fn create_room(
        &self,
        host_name: String,
        connection_id: Uuid,
        client_tx: ClientSender,
    ) -> Result<CreateRoomResult, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::CreateRoom {
                host_name,
                connection_id,
                client_tx,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Resolve a live room by code.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::RoomNotFound`] for unknown codes.
    pub async fn get_room(&self, code: RoomCode) -> Result<RoomActorHandle, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                code,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown and wait for it to complete.
    pub async fn shutdown(&self) -> Result<(), SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the registry and everything beneath it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the registry is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A room under registry supervision.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `RegistryActor` implementation.
pub struct RegistryActor {
    /// Message receiver.
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Clone of the mailbox sender, handed to rooms for closure reports.
    self_tx: mpsc::Sender<RegistryMessage>,
    /// Root cancellation token.
    cancel_token: CancellationToken,
    /// Live rooms by code.
    rooms: HashMap<RoomCode, ManagedRoom>,
    /// Liveness policy handed to every room.
    policy: LivenessPolicy,
    /// Attempt bound for collision-checked code generation.
    room_code_attempts: u32,
    /// False once shutdown has begun.
    accepting_new: bool,
}

impl RegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(config: &Config) -> (RegistryActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = Self {
            receiver,
            self_tx: sender.clone(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            policy: LivenessPolicy::from_config(config),
            room_code_attempts: config.room_code_attempts,
            accepting_new: true,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RegistryActorHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.registry")]
    async fn run(mut self) {
        info!(target: "relay.actor.registry", "RegistryActor started");

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.registry",
                        "RegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_room_health().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(RegistryMessage::Shutdown { respond_to }) => {
                            self.graceful_shutdown().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        Some(message) => {
                            self.handle_message(message);
                        }
                        None => {
                            info!(
                                target: "relay.actor.registry",
                                "RegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.registry",
            rooms = self.rooms.len(),
            "RegistryActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                host_name,
                connection_id,
                client_tx,
                respond_to,
            } => {
                let result = self.handle_create_room(host_name, connection_id, client_tx);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom { code, respond_to } => {
                let result = self
                    .rooms
                    .get(&code)
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| SignalError::RoomNotFound(code.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::RoomClosed { code } => {
                if self.rooms.remove(&code).is_some() {
                    info!(
                        target: "relay.actor.registry",
                        room_code = %code,
                        remaining_rooms = self.rooms.len(),
                        "Room closed"
                    );
                }
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    room_count: self.rooms.len(),
                    accepting_new: self.accepting_new,
                });
            }

            // Handled in the run loop so the reply follows shutdown
            RegistryMessage::Shutdown { .. } => {}
        }
    }

    /// Mint a code and spawn a room with the caller as host.
    #[instrument(skip_all, fields(host_name = %host_name))]
    fn handle_create_room(
        &mut self,
        host_name: String,
        connection_id: Uuid,
        client_tx: ClientSender,
    ) -> Result<CreateRoomResult, SignalError> {
        if !self.accepting_new {
            return Err(SignalError::Draining);
        }

        let code = self.generate_code()?;

        let (handle, task_handle, participant_id) = RoomActor::spawn(
            code.clone(),
            self.policy,
            self.cancel_token.child_token(),
            self.self_tx.clone(),
            host_name,
            connection_id,
            client_tx,
        );

        self.rooms.insert(
            code.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );

        info!(
            target: "relay.actor.registry",
            room_code = %code,
            host_id = %participant_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(CreateRoomResult {
            room_code: code,
            participant_id,
            room: handle,
        })
    }

    /// Generate a room code not currently in use.
    ///
    /// The code space (32^6) dwarfs any realistic room count, so the
    /// attempt bound exists only to turn a pathological state into an
    /// error instead of a spin.
    fn generate_code(&self) -> Result<RoomCode, SignalError> {
        let mut rng = rand::thread_rng();
        for _ in 0..self.room_code_attempts {
            let code = RoomCode::generate(&mut rng);
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }

        error!(
            target: "relay.actor.registry",
            attempts = self.room_code_attempts,
            rooms = self.rooms.len(),
            "Room code generation exhausted its attempt bound"
        );
        Err(SignalError::CapacityExhausted)
    }

    /// Reap room tasks that exited without reporting closure.
    async fn check_room_health(&mut self) {
        let mut finished = Vec::new();

        for (code, managed) in &self.rooms {
            if managed.task_handle.is_finished() {
                finished.push(code.clone());
            }
        }

        for code in finished {
            if let Some(managed) = self.rooms.remove(&code) {
                match managed.task_handle.await {
                    Ok(()) => {
                        debug!(
                            target: "relay.actor.registry",
                            room_code = %code,
                            "Reaped finished room task"
                        );
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!(
                                target: "relay.actor.registry",
                                room_code = %code,
                                error = ?join_error,
                                "Room actor panicked"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Perform graceful shutdown: refuse new work, cancel every room and
    /// wait for the room tasks with a per-room timeout.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "relay.actor.registry",
            rooms = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (code, managed) in self.rooms.drain() {
            match tokio::time::timeout(Duration::from_secs(10), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "relay.actor.registry",
                        room_code = %code,
                        "Room completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "relay.actor.registry",
                        room_code = %code,
                        error = ?e,
                        "Room task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "relay.actor.registry",
                        room_code = %code,
                        "Room shutdown timed out"
                    );
                }
            }
        }

        info!(target: "relay.actor.registry", "Graceful shutdown complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn spawn_registry() -> (RegistryActorHandle, JoinHandle<()>) {
        RegistryActor::spawn(&Config::default())
    }

    #[tokio::test]
    async fn test_create_room_binds_host() {
        let (registry, _task) = spawn_registry();

        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let created = registry
            .create_room("Alice".to_string(), Uuid::new_v4(), client_tx)
            .await
            .unwrap();

        let state = created.room.get_state().await.unwrap();
        assert_eq!(state.host_id, created.participant_id);
        assert_eq!(state.code, created.room_code);

        let status = registry.get_status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert!(status.accepting_new);

        registry.cancel();
    }

    #[tokio::test]
    async fn test_get_room_resolves_live_code_only() {
        let (registry, _task) = spawn_registry();

        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let created = registry
            .create_room("Alice".to_string(), Uuid::new_v4(), client_tx)
            .await
            .unwrap();

        let resolved = registry.get_room(created.room_code.clone()).await.unwrap();
        assert_eq!(resolved.code(), &created.room_code);

        let missing = registry
            .get_room(RoomCode::parse("ZZZZ99").unwrap())
            .await;
        assert!(matches!(missing, Err(SignalError::RoomNotFound(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_host_departure_removes_room_from_registry() {
        let (registry, _task) = spawn_registry();

        let (client_tx, _client_rx) = mpsc::unbounded_channel();
        let created = registry
            .create_room("Alice".to_string(), Uuid::new_v4(), client_tx)
            .await
            .unwrap();

        created
            .room
            .participant_leave(created.participant_id)
            .await
            .unwrap();

        // Closure report travels through the registry mailbox
        let mut attempts = 0;
        loop {
            let status = registry.get_status().await.unwrap();
            if status.room_count == 0 {
                break;
            }
            attempts += 1;
            assert!(attempts < 50, "room never left the registry");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The stale code no longer resolves
        let missing = registry.get_room(created.room_code).await;
        assert!(matches!(missing, Err(SignalError::RoomNotFound(_))));

        registry.cancel();
    }

    #[tokio::test]
    async fn test_codes_are_unique_across_rooms() {
        let (registry, _task) = spawn_registry();

        let mut codes = std::collections::HashSet::new();
        for _ in 0..20 {
            let (client_tx, _client_rx) = mpsc::unbounded_channel();
            let created = registry
                .create_room("Host".to_string(), Uuid::new_v4(), client_tx)
                .await
                .unwrap();
            assert!(codes.insert(created.room_code));
        }

        registry.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_rooms_and_notifies_clients() {
        let (registry, task) = spawn_registry();

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let _created = registry
            .create_room("Alice".to_string(), Uuid::new_v4(), client_tx)
            .await
            .unwrap();

        registry.shutdown().await.unwrap();

        // The host heard room-closed before teardown
        let frame = client_rx.recv().await.unwrap();
        assert_eq!(frame, r#"{"type":"room-closed"}"#);

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.is_ok());
    }
}
