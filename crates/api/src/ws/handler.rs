//! WebSocket connection lifecycle.
//!
//! One task reads frames, one task writes them; the two meet only at the
//! participant's outbound queue. A connection starts pre-join, becomes a
//! room member on a successful `join`, and reverts to pre-join on `leave`.
//! Socket close and read errors are an implicit leave.

use std::ops::ControlFlow;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{normalize_name, valid_room_id, ClientMessage, ErrorCode, ServerMessage};
use crate::room::manager::JoinRejected;
use crate::room::room::{JoinRequest, RoomCommand};
use crate::state::AppState;
use crate::ws::send_queue::OutboundQueue;

/// The participant this connection became after a successful join.
struct Session {
    room_tx: mpsc::Sender<RoomCommand>,
    participant_id: String,
    room_id: String,
}

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(%connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let queue = OutboundQueue::new(state.settings.rooms.send_queue_capacity);

    // Writer task: drains the queue until it closes, then closes the socket.
    let writer_queue = queue.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = writer_queue.pop().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sender.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let idle = Duration::from_secs(state.settings.rooms.idle_connection_timeout_seconds);
    let mut session: Option<Session> = None;

    loop {
        let frame = tokio::select! {
            frame = tokio::time::timeout(idle, receiver.next()) => match frame {
                Ok(frame) => frame,
                Err(_) => {
                    info!(%connection_id, "closing idle connection");
                    break;
                }
            },
            // The room force-disconnected us (critical send failed).
            _ = queue.closed() => break,
        };

        let Some(frame) = frame else { break };
        match frame {
            Ok(Message::Text(text)) => {
                if handle_frame(&state, &connection_id, &queue, &mut session, &text)
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                let _ = queue.push(ServerMessage::error(
                    ErrorCode::InvalidMessage,
                    "binary frames are not accepted",
                ));
            }
            Err(e) => {
                warn!(%connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Implicit leave on any exit path.
    if let Some(session) = session.take() {
        let _ = session
            .room_tx
            .send(RoomCommand::Leave {
                participant_id: session.participant_id,
            })
            .await;
    }
    queue.close();
    let _ = writer.await;
    info!(%connection_id, "WebSocket disconnected");
}

async fn handle_frame(
    state: &AppState,
    connection_id: &str,
    queue: &OutboundQueue,
    session: &mut Option<Session>,
    text: &str,
) -> ControlFlow<()> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%connection_id, error = %e, "malformed client frame");
            return push_or_break(
                queue,
                ServerMessage::error(
                    ErrorCode::InvalidMessage,
                    "unrecognized or malformed message",
                ),
            );
        }
    };

    match (session.as_ref(), msg) {
        (
            None,
            ClientMessage::Join {
                room_id,
                language,
                name,
                capabilities: _,
            },
        ) => handle_join(state, connection_id, queue, session, room_id, language, name).await,

        // A leave that crossed our removal on the wire; tolerated.
        (None, ClientMessage::Leave) => ControlFlow::Continue(()),

        (None, _) => push_or_break(
            queue,
            ServerMessage::error(ErrorCode::InvalidMessage, "join a room first"),
        ),

        (Some(_), ClientMessage::Join { .. }) => push_or_break(
            queue,
            ServerMessage::error(ErrorCode::InvalidMessage, "already joined a room"),
        ),

        (Some(current), ClientMessage::Audio { data, timestamp: _ }) => {
            if current
                .room_tx
                .send(RoomCommand::Audio {
                    participant_id: current.participant_id.clone(),
                    data,
                })
                .await
                .is_err()
            {
                // Room task is gone; nothing left to talk to.
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }

        (Some(current), ClientMessage::UtteranceEnd { timestamp: _ }) => {
            if current
                .room_tx
                .send(RoomCommand::UtteranceEnd {
                    participant_id: current.participant_id.clone(),
                })
                .await
                .is_err()
            {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }

        (Some(_), ClientMessage::Leave) => {
            let current = session.take().expect("session present");
            debug!(
                %connection_id,
                room_id = %current.room_id,
                participant_id = %current.participant_id,
                "participant leaving"
            );
            let _ = current
                .room_tx
                .send(RoomCommand::Leave {
                    participant_id: current.participant_id,
                })
                .await;
            ControlFlow::Continue(())
        }

        (Some(_), ClientMessage::Ping) => push_or_break(queue, ServerMessage::Pong),
    }
}

async fn handle_join(
    state: &AppState,
    connection_id: &str,
    queue: &OutboundQueue,
    session: &mut Option<Session>,
    room_id: String,
    language: String,
    name: String,
) -> ControlFlow<()> {
    if !valid_room_id(&room_id) {
        return push_or_break(
            queue,
            ServerMessage::error(ErrorCode::InvalidMessage, "room_id must match [A-Z2-9]{6}"),
        );
    }
    let Some(name) = normalize_name(&name) else {
        return push_or_break(
            queue,
            ServerMessage::error(
                ErrorCode::InvalidMessage,
                "name must be non-empty and bounded",
            ),
        );
    };
    if !state.registry.is_supported(&language) {
        return push_or_break(
            queue,
            ServerMessage::error(
                ErrorCode::UnsupportedLanguage,
                format!("unsupported language: {language}"),
            ),
        );
    }

    let request = JoinRequest {
        name,
        language,
        queue: queue.clone(),
    };

    match state.rooms.join(&room_id, request).await {
        Ok((accepted, room_tx)) => {
            info!(
                %connection_id,
                room_id = %accepted.room_id,
                participant_id = %accepted.participant_id,
                "joined room"
            );
            let msg = ServerMessage::Joined {
                room_id: accepted.room_id.clone(),
                participant_id: accepted.participant_id.clone(),
                participants: accepted.others,
            };
            *session = Some(Session {
                room_tx,
                participant_id: accepted.participant_id,
                room_id: accepted.room_id,
            });
            push_or_break(queue, msg)
        }
        Err(rejected) => {
            let code = match rejected {
                JoinRejected::RoomFull(_) | JoinRejected::ServerFull(_) => ErrorCode::RoomFull,
                JoinRejected::Internal => ErrorCode::PipelineError,
            };
            push_or_break(queue, ServerMessage::error(code, rejected.to_string()))
        }
    }
}

/// Queues a message for the writer; a rejected critical push ends the
/// connection.
fn push_or_break(queue: &OutboundQueue, msg: ServerMessage) -> ControlFlow<()> {
    match queue.push(msg) {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(()),
    }
}
