use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use murmur_common::protocol::ws::{decode_message, WsMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::send_ws_message;
use super::session::MAX_FRAME_BYTES;
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::messages::group_by_conversation;
use crate::RelayState;

pub fn router(state: RelayState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
}

pub async fn ws_upgrade(
    Query(query): Query<ConnectQuery>,
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) =
        query.user_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
    else {
        return RelayError::new(ErrorCode::ValidationFailed, "missing userId query parameter")
            .into_response();
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES)
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, user_id, socket)).await;
        })
}

async fn handle_socket(state: RelayState, user_id: String, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let connection_id = Uuid::new_v4();

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    state.connections.register(connection_id, &user_id, outbound_sender).await;
    presence_connected(&state, &user_id, connection_id).await;
    info!(
        user_id = %user_id,
        connection_id = %connection_id,
        request_id = %request_id,
        "connection opened"
    );

    // Heartbeat: a ping goes out every interval; a connection that has sent
    // nothing since the previous ping is dropped.
    let mut heartbeat = tokio::time::interval(state.heartbeat_interval);
    heartbeat.reset();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        "heartbeat timeout, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound) => {
                        if send_ws_message(&mut socket, &outbound).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };
                awaiting_pong = false;

                let reply = match message {
                    Ok(Message::Text(raw)) => match decode_message(&raw) {
                        Ok(inbound) => handle_inbound(&state, &user_id, inbound).await,
                        Err(error) => {
                            debug!(user_id = %user_id, error = %error, "rejecting undecodable frame");
                            Some(invalid_frame(ErrorCode::InvalidMessage.default_message()))
                        }
                    },
                    Ok(Message::Binary(_)) => Some(invalid_frame("binary frames are not supported")),
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        debug!(user_id = %user_id, error = %error, "socket read failed");
                        break;
                    }
                };

                if let Some(reply) = reply {
                    if send_ws_message(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.connections.unregister(connection_id).await;
    presence_disconnected(&state, &user_id, connection_id).await;
    info!(user_id = %user_id, connection_id = %connection_id, "connection closed");
}

fn invalid_frame(message: &str) -> WsMessage {
    ErrorCode::InvalidMessage.ws_frame(message)
}

/// Applies one client frame. Returns a frame for the sending socket only;
/// fan-out goes through the connection queues.
async fn handle_inbound(state: &RelayState, user_id: &str, inbound: WsMessage) -> Option<WsMessage> {
    match inbound {
        WsMessage::SendMessage { receiver_id, body, image_url } => {
            let _turn = state.messages.turn().await;
            match state.messages.append(user_id, &receiver_id, body, image_url).await {
                Ok(message) => {
                    let participants = [message.sender_id.as_str(), message.receiver_id.as_str()];
                    let frame = WsMessage::NewMessage(message.clone());
                    let delivered = state.connections.send_to_users(&participants, &frame).await;
                    debug!(
                        message_id = %message.id,
                        sender_id = %message.sender_id,
                        receiver_id = %message.receiver_id,
                        delivered,
                        "message relayed"
                    );
                    None
                }
                Err(rejection) => Some(rejection.code().ws_frame(rejection.to_string())),
            }
        }
        WsMessage::DeleteMessages { message_ids } => {
            if message_ids.is_empty() {
                return None;
            }
            let _turn = state.messages.turn().await;
            match state.messages.soft_delete(user_id, &message_ids).await {
                Ok(replacements) => {
                    for ((first, second), batch) in group_by_conversation(replacements) {
                        let count = batch.len();
                        let frame = WsMessage::DeleteMessage(batch);
                        state.connections.send_to_users(&[first.as_str(), second.as_str()], &frame).await;
                        debug!(user_id, count, "deletions relayed");
                    }
                    None
                }
                Err(rejection) => {
                    debug!(user_id, error = %rejection, "delete rejected");
                    Some(rejection.code().ws_frame(rejection.to_string()))
                }
            }
        }
        WsMessage::GetOnlineUser(_) => Some(WsMessage::GetOnlineUser(state.presence.online().await)),
        WsMessage::NewMessage(_) | WsMessage::DeleteMessage(_) | WsMessage::Error { .. } => {
            Some(invalid_frame("event is server-to-client only"))
        }
    }
}

async fn presence_connected(state: &RelayState, user_id: &str, connection_id: Uuid) {
    let _turn = state.presence.turn().await;
    let came_online = state.presence.connect(user_id, connection_id).await;
    let snapshot = WsMessage::GetOnlineUser(state.presence.online().await);
    if came_online {
        state.connections.broadcast(&snapshot).await;
    } else {
        state.connections.send_to_connection(connection_id, &snapshot).await;
    }
}

async fn presence_disconnected(state: &RelayState, user_id: &str, connection_id: Uuid) {
    let _turn = state.presence.turn().await;
    if state.presence.disconnect(user_id, connection_id).await {
        let snapshot = WsMessage::GetOnlineUser(state.presence.online().await);
        state.connections.broadcast(&snapshot).await;
    }
}
