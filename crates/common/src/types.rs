// Core domain types shared across all murmur crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Preview text used for messages that carry only an image.
pub const IMAGE_PREVIEW: &str = "[Image]";

/// Which side of the marketplace an identity acts for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Primary,
    Counterparty,
}

/// The authenticated principal driving a client session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

/// A single chat message as exchanged over the wire.
///
/// Messages are immutable except for soft deletion, which the server
/// expresses by sending a full replacement record with `deleted` set and
/// the content cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(alias = "_id")]
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The participant that is not `me`.
    ///
    /// For a message `me` neither sent nor received this returns the sender,
    /// which keeps routing total for misaddressed frames.
    pub fn other_party(&self, me: &str) -> &str {
        if self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Whether `me` is one of the two participants.
    pub fn involves(&self, me: &str) -> bool {
        self.sender_id == me || self.receiver_id == me
    }

    /// List-preview text: the body, `[Image]` for image-only messages,
    /// otherwise empty.
    pub fn preview(&self) -> String {
        match (&self.body, &self.image_url) {
            (Some(body), _) => body.clone(),
            (None, Some(_)) => IMAGE_PREVIEW.to_string(),
            (None, None) => String::new(),
        }
    }

    /// The replacement record broadcast when this message is soft-deleted.
    pub fn into_deleted(self) -> Self {
        Self { body: None, image_url: None, deleted: true, ..self }
    }
}

/// Summary of the latest message in a conversation, used for list previews.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageMeta {
    pub sender_id: String,
    pub receiver_id: String,
    pub preview: String,
}

impl From<&ChatMessage> for LastMessageMeta {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            preview: message.preview(),
        }
    }
}

/// Body of the relay's conversation history endpoint, oldest message first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
}
