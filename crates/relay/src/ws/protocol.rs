use axum::extract::ws::{Message, WebSocket};
use murmur_common::protocol::ws::{encode_message, WsMessage};

pub async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
