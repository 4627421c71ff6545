//! WebSocket ingress.
//!
//! One task pair per connection:
//!
//! - the reader loop (this module) decodes inbound frames and routes them
//!   to the registry or the connection's room;
//! - the pusher loop forwards already-serialized frames from the
//!   connection actor onto the socket sink.
//!
//! The reader owns the session lifecycle: the first accepted
//! `create-room` or `join-room` binds the connection to a room, and the
//! manner in which the reader loop ends decides leave vs disconnect. A
//! clean close frame is an explicit leave; an abrupt error or EOF starts
//! the disconnect grace period.

use crate::actors::{RegistryActorHandle, RelayPayload, RoomActorHandle};
use crate::errors::SignalError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::types::{ParticipantId, RoomCode};
use futures_util::{SinkExt, StreamExt};
use signaling_protocol::{decode_client, encode_server, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Shared state handed to every WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the singleton room registry.
    pub registry: RegistryActorHandle,
}

/// Binding of a connection to the room it joined.
struct Session {
    room: RoomActorHandle,
    participant_id: ParticipantId,
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one WebSocket connection to completion.
#[instrument(skip_all, name = "relay.ws", fields(connection_id = tracing::field::Empty))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let (sink, mut stream) = socket.split();
    let (client_tx, client_rx) = mpsc::unbounded_channel::<String>();

    let pusher = tokio::spawn(pusher_loop(sink, client_rx, connection_id));

    let mut session: Option<Session> = None;
    // Leave semantics apply only when the client said goodbye
    let mut clean_close = false;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let message = match decode_client(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        // Malformed frames are dropped, not answered
                        warn!(
                            target: "relay.ws",
                            connection_id = %connection_id,
                            error = %e,
                            "Dropping malformed frame"
                        );
                        continue;
                    }
                };

                dispatch(message, connection_id, &state, &client_tx, &mut session).await;
            }

            Ok(Message::Close(_)) => {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    "Client sent close frame"
                );
                clean_close = true;
                break;
            }

            // Protocol-level pings are handled by axum; the application
            // heartbeat is the `ping` text frame
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)) => {}

            Err(e) => {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket read error"
                );
                break;
            }
        }
    }

    if let Some(session) = session {
        if clean_close {
            if let Err(e) = session.room.participant_leave(session.participant_id).await {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "Leave on close failed"
                );
            }
        } else if let Err(e) = session
            .room
            .connection_disconnected(connection_id, session.participant_id)
            .await
        {
            debug!(
                target: "relay.ws",
                connection_id = %connection_id,
                error = %e,
                "Disconnect notification failed"
            );
        }
    }

    pusher.abort();

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        clean_close,
        "WebSocket connection finished"
    );
}

/// Forward serialized frames from the connection actor to the socket.
async fn pusher_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut client_rx: mpsc::UnboundedReceiver<String>,
    connection_id: Uuid,
) {
    while let Some(text) = client_rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            debug!(
                target: "relay.ws",
                connection_id = %connection_id,
                error = %e,
                "Socket send failed, stopping pusher"
            );
            break;
        }
    }
    let _ = sink.close().await;
}

/// Route one decoded client frame.
async fn dispatch(
    message: ClientMessage,
    connection_id: Uuid,
    state: &AppState,
    client_tx: &mpsc::UnboundedSender<String>,
    session: &mut Option<Session>,
) {
    match message {
        ClientMessage::CreateRoom { name } => {
            if session.is_some() {
                warn!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    "create-room on a connection already in a room, dropping"
                );
                return;
            }

            match state
                .registry
                .create_room(name, connection_id, client_tx.clone())
                .await
            {
                Ok(created) => {
                    send_frame(
                        client_tx,
                        &ServerMessage::RoomCreated {
                            room_id: created.room_code.to_string(),
                            participant_id: created.participant_id,
                            is_host: true,
                        },
                    );
                    *session = Some(Session {
                        room: created.room,
                        participant_id: created.participant_id,
                    });
                }
                Err(e) => send_error(client_tx, connection_id, &e),
            }
        }

        ClientMessage::JoinRoom {
            room_id,
            name,
            rejoin_id,
        } => {
            if session.is_some() {
                warn!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    "join-room on a connection already in a room, dropping"
                );
                return;
            }

            // An unparseable code cannot name any room
            let Ok(code) = RoomCode::parse(&room_id) else {
                send_error(
                    client_tx,
                    connection_id,
                    &SignalError::RoomNotFound(room_id),
                );
                return;
            };

            let result = join_room(state, code, connection_id, name, rejoin_id, client_tx).await;
            match result {
                Ok((room, participant_id, frame)) => {
                    send_frame(client_tx, &frame);
                    *session = Some(Session {
                        room,
                        participant_id,
                    });
                }
                Err(e) => send_error(client_tx, connection_id, &e),
            }
        }

        ClientMessage::Offer { target, sdp } => {
            relay(session, connection_id, target, RelayPayload::Offer(sdp)).await;
        }

        ClientMessage::Answer { target, sdp } => {
            relay(session, connection_id, target, RelayPayload::Answer(sdp)).await;
        }

        ClientMessage::IceCandidate { target, candidate } => {
            relay(
                session,
                connection_id,
                target,
                RelayPayload::IceCandidate(candidate),
            )
            .await;
        }

        ClientMessage::ToggleMedia {
            media_type,
            enabled,
        } => {
            if let Some(s) = session {
                let _ = s.room.toggle_media(s.participant_id, media_type, enabled).await;
            }
        }

        ClientMessage::StartScreenShare { stream_id } => {
            if let Some(s) = session {
                let _ = s.room.start_screen_share(s.participant_id, stream_id).await;
            }
        }

        ClientMessage::StopScreenShare => {
            if let Some(s) = session {
                let _ = s.room.stop_screen_share(s.participant_id).await;
            }
        }

        ClientMessage::RecordingStarted => {
            if let Some(s) = session {
                let _ = s.room.recording(s.participant_id, true).await;
            }
        }

        ClientMessage::RecordingStopped => {
            if let Some(s) = session {
                let _ = s.room.recording(s.participant_id, false).await;
            }
        }

        ClientMessage::Ping => {
            if let Some(s) = session {
                let _ = s.room.heartbeat(s.participant_id).await;
            }
        }
    }
}

/// Resolve the room and join it, producing the `room-joined` frame.
async fn join_room(
    state: &AppState,
    code: RoomCode,
    connection_id: Uuid,
    name: String,
    rejoin_id: Option<ParticipantId>,
    client_tx: &mpsc::UnboundedSender<String>,
) -> Result<(RoomActorHandle, ParticipantId, ServerMessage), SignalError> {
    let room = state.registry.get_room(code.clone()).await?;
    let joined = room
        .connection_join(connection_id, name, rejoin_id, client_tx.clone())
        .await?;

    let frame = ServerMessage::RoomJoined {
        room_id: code.to_string(),
        participant_id: joined.participant_id,
        is_host: joined.is_host,
        participants: joined.participants,
    };
    Ok((room, joined.participant_id, frame))
}

/// Forward a negotiation payload to the session's room.
async fn relay(
    session: &Option<Session>,
    connection_id: Uuid,
    target: ParticipantId,
    payload: RelayPayload,
) {
    let Some(s) = session else {
        debug!(
            target: "relay.ws",
            connection_id = %connection_id,
            "Relay frame before joining a room, dropping"
        );
        return;
    };
    let _ = s.room.relay(s.participant_id, target, payload).await;
}

/// Serialize and queue one frame onto the connection's writer channel.
fn send_frame(client_tx: &mpsc::UnboundedSender<String>, message: &ServerMessage) {
    match encode_server(message) {
        Ok(text) => {
            let _ = client_tx.send(text);
        }
        Err(e) => {
            warn!(target: "relay.ws", error = %e, "Failed to encode frame");
        }
    }
}

/// Report an operation failure with its client-safe message.
fn send_error(
    client_tx: &mpsc::UnboundedSender<String>,
    connection_id: Uuid,
    error: &SignalError,
) {
    debug!(
        target: "relay.ws",
        connection_id = %connection_id,
        error = %error,
        "Operation failed, reporting to client"
    );
    send_frame(
        client_tx,
        &ServerMessage::Error {
            message: error.client_message(),
        },
    );
}
