//! Signaling transport adapter: the WebSocket upgrade route, the
//! bootstrap handshake that admits a participant, and the reader/writer
//! pumps that bridge one `axum` WebSocket to a [`ClientSession`]'s
//! bounded queues.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::message::{BootstrapPayload, Message};
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::session::ClientSession;
use crate::signaling;

/// Read/write buffer size for the upgraded connection.
pub const SOCKET_BUFFER_SIZE: usize = 65536;

/// Shared application state handed to the WebSocket route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<Config>, registry: Arc<RoomRegistry>) -> Self {
        Self { config, registry }
    }
}

/// `GET /ws/media`: validates `Origin` against the configured frontend
/// origin (exact equality), then upgrades.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if origin != state.config.frontend_origin {
        warn!(origin, expected = %state.config.frontend_origin, "rejected WebSocket upgrade: origin mismatch");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.read_buffer_size(SOCKET_BUFFER_SIZE)
        .write_buffer_size(SOCKET_BUFFER_SIZE)
        .on_upgrade(move |socket| accept(socket, state))
}

/// Read exactly one bootstrap message, build the `ClientSession`, admit
/// it to its room, then start the reader/writer pumps and the signaling
/// dispatch loop.
async fn accept(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let first = match receiver.next().await {
        Some(Ok(WsMessage::Text(text))) => text,
        _ => {
            debug!("connection closed before a bootstrap message arrived");
            return;
        }
    };

    let bootstrap: Message = match serde_json::from_str(&first) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, "malformed bootstrap message, closing");
            let _ = sender.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let payload: BootstrapPayload = match serde_json::from_value(bootstrap.payload.clone()) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "bootstrap message missing role/isCamOn/isMicOn, closing");
            let _ = sender.send(WsMessage::Close(None)).await;
            return;
        }
    };

    if bootstrap.user_id.is_empty() || bootstrap.room_id.is_empty() {
        warn!("bootstrap message missing userId/roomId, closing");
        let _ = sender.send(WsMessage::Close(None)).await;
        return;
    }

    let session = Arc::new(ClientSession::new(
        bootstrap.user_id.clone(),
        bootstrap.room_id.clone(),
        payload.role,
        payload.is_cam_on,
        payload.is_mic_on,
    ));

    let room = state.registry.get_or_create(&session.room_id).await;
    room.admit(Arc::clone(&session)).await;

    info!(user_id = %session.user_id, room_id = %session.room_id, "participant admitted");

    let send_rx = session
        .take_send_rx()
        .await
        .expect("send receiver taken exactly once, at accept time");
    let read_rx = session
        .take_read_rx()
        .await
        .expect("read receiver taken exactly once, at accept time");

    let writer = tokio::spawn(run_writer(
        sender,
        send_rx,
        Arc::clone(&session),
        Arc::clone(&room),
        Arc::clone(&state.registry),
    ));
    let reader = tokio::spawn(run_reader(
        receiver,
        Arc::clone(&session),
        Arc::clone(&room),
        Arc::clone(&state.registry),
    ));
    let dispatcher = tokio::spawn(run_dispatch(
        read_rx,
        Arc::clone(&session),
        Arc::clone(&state.registry),
        Arc::clone(&state.config),
    ));

    let _ = reader.await;
    let _ = writer.await;
    let _ = dispatcher.await;
}

/// Idempotent disconnect: tear down the session, evict it from the
/// room, and release the room if it is now empty. Safe to call from
/// both the reader and writer pump, whichever notices failure first.
async fn disconnect(session: &Arc<ClientSession>, room: &Arc<Room>, registry: &Arc<RoomRegistry>) {
    session.teardown().await;
    room.evict(&session.user_id).await;
    registry.remove_if_empty(&session.room_id).await;
}

/// Reader pump: drains the WebSocket into `session.read`. Any close or
/// transport error is terminal for the session.
async fn run_reader(
    mut receiver: futures::stream::SplitStream<WebSocket>,
    session: Arc<ClientSession>,
    room: Arc<Room>,
    registry: Arc<RoomRegistry>,
) {
    loop {
        tokio::select! {
            () = session.wait_done() => break,
            next = receiver.next() => {
                match next {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(message) => session.push_inbound(message).await,
                            Err(err) => {
                                warn!(user_id = %session.user_id, %err, "dropping malformed inbound message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(user_id = %session.user_id, "transport closed");
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary: ignored
                    Some(Err(err)) => {
                        warn!(user_id = %session.user_id, %err, "transport read error");
                        break;
                    }
                }
            }
        }
    }
    disconnect(&session, &room, &registry).await;
}

/// Writer pump: drains `session.send` to the WebSocket. A write error
/// closes the session and drops any remaining queued messages.
async fn run_writer(
    mut sender: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut send_rx: tokio::sync::mpsc::Receiver<Message>,
    session: Arc<ClientSession>,
    room: Arc<Room>,
    registry: Arc<RoomRegistry>,
) {
    loop {
        tokio::select! {
            () = session.wait_done() => break,
            next = send_rx.recv() => {
                let Some(message) = next else { break };
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(user_id = %session.user_id, %err, "failed to serialize outbound message");
                        continue;
                    }
                };
                if let Err(err) = sender.send(WsMessage::Text(payload)).await {
                    warn!(user_id = %session.user_id, %err, "transport write error");
                    break;
                }
            }
        }
    }
    disconnect(&session, &room, &registry).await;
}

/// Signaling dispatch loop: drains `session.read` and hands each message
/// to [`signaling::dispatch`] until the queue closes (session torn
/// down).
async fn run_dispatch(
    mut read_rx: tokio::sync::mpsc::Receiver<Message>,
    session: Arc<ClientSession>,
    registry: Arc<RoomRegistry>,
    config: Arc<Config>,
) {
    loop {
        tokio::select! {
            () = session.wait_done() => break,
            next = read_rx.recv() => {
                let Some(message) = next else { break };
                signaling::dispatch(message, &session, &registry, &config).await;
            }
        }
    }
}
