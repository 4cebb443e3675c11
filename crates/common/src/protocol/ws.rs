// WebSocket message types for the murmur-chat.v1 protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChatMessage;

/// Query parameter that carries the identity id during the upgrade request.
pub const USER_ID_QUERY_PARAM: &str = "userId";

/// All frames in the murmur-chat.v1 WebSocket protocol.
///
/// Frames are adjacently tagged: `{"event": "newMessage", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum WsMessage {
    /// Server -> Client: authoritative snapshot of online identity ids.
    GetOnlineUser(Vec<String>),

    /// Server -> Client: a message was sent to or by this identity.
    NewMessage(ChatMessage),

    /// Server -> Client: replacement records for soft-deleted messages.
    DeleteMessage(Vec<ChatMessage>),

    /// Client -> Server: send a message to another identity.
    SendMessage {
        receiver_id: String,
        #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },

    /// Client -> Server: soft-delete messages this identity sent.
    DeleteMessages { message_ids: Vec<String> },

    /// Server -> Client: error.
    Error { code: String, message: String, retryable: bool },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

pub fn decode_message(raw: &str) -> Result<WsMessage, ProtocolError> {
    serde_json::from_str::<WsMessage>(raw).map_err(ProtocolError::Decode)
}

pub fn encode_message(message: &WsMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}
