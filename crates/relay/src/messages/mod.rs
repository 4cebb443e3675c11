// In-memory message store with soft deletion.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use murmur_common::types::ChatMessage;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Unordered participant pair, stored smallest id first.
pub type ConversationKey = (String, String);

pub fn conversation_key(a: &str, b: &str) -> ConversationKey {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageRejection {
    #[error("receiver id must not be empty")]
    EmptyReceiver,
    #[error("message needs a body or an image url")]
    EmptyContent,
    #[error("unknown message id `{0}`")]
    NotFound(String),
    #[error("message `{0}` was not sent by the requester")]
    NotSender(String),
}

impl MessageRejection {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyReceiver | Self::EmptyContent => ErrorCode::InvalidMessage,
            Self::NotFound(_) => ErrorCode::MessageNotFound,
            Self::NotSender(_) => ErrorCode::Forbidden,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    by_id: HashMap<String, ChatMessage>,
    conversations: HashMap<ConversationKey, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    state: Arc<RwLock<StoreState>>,
    turn: Arc<Mutex<()>>,
    history_limit: usize,
}

impl MessageStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            turn: Arc::new(Mutex::new(())),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Held across a mutation and its fan-out so every connection receives
    /// events in store order.
    pub async fn turn(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.turn).lock_owned().await
    }

    pub async fn append(
        &self,
        sender_id: &str,
        receiver_id: &str,
        body: Option<String>,
        image_url: Option<String>,
    ) -> Result<ChatMessage, MessageRejection> {
        if receiver_id.trim().is_empty() {
            return Err(MessageRejection::EmptyReceiver);
        }
        let body = body.filter(|text| !text.is_empty());
        let image_url = image_url.filter(|url| !url.is_empty());
        if body.is_none() && image_url.is_none() {
            return Err(MessageRejection::EmptyContent);
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            body,
            image_url,
            deleted: false,
            created_at: Utc::now(),
        };

        let mut guard = self.state.write().await;
        guard
            .conversations
            .entry(conversation_key(sender_id, receiver_id))
            .or_default()
            .push(message.id.clone());
        guard.by_id.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    /// Soft-delete messages sent by `requester`.
    ///
    /// The batch is validated before anything changes: one unknown id or one
    /// message owned by someone else rejects the whole request. Deleting an
    /// already deleted message is accepted and yields its replacement again.
    pub async fn soft_delete(
        &self,
        requester: &str,
        message_ids: &[String],
    ) -> Result<Vec<ChatMessage>, MessageRejection> {
        let mut guard = self.state.write().await;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for id in message_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let message =
                guard.by_id.get(id).ok_or_else(|| MessageRejection::NotFound(id.clone()))?;
            if message.sender_id != requester {
                return Err(MessageRejection::NotSender(id.clone()));
            }
            ids.push(id.clone());
        }

        let mut replacements = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = guard.by_id.remove(&id) {
                let replacement = message.into_deleted();
                guard.by_id.insert(id, replacement.clone());
                replacements.push(replacement);
            }
        }
        Ok(replacements)
    }

    /// The latest `limit` messages between two identities, oldest first.
    /// Deleted messages appear as their replacement records.
    pub async fn history(&self, user_id: &str, other_id: &str, limit: usize) -> Vec<ChatMessage> {
        let limit = limit.min(self.history_limit);
        let guard = self.state.read().await;
        let Some(ids) = guard.conversations.get(&conversation_key(user_id, other_id)) else {
            return Vec::new();
        };
        let start = ids.len().saturating_sub(limit);
        ids[start..].iter().filter_map(|id| guard.by_id.get(id).cloned()).collect()
    }
}

/// Groups replacement records by conversation for per-conversation fan-out.
pub fn group_by_conversation(messages: Vec<ChatMessage>) -> BTreeMap<ConversationKey, Vec<ChatMessage>> {
    let mut grouped: BTreeMap<ConversationKey, Vec<ChatMessage>> = BTreeMap::new();
    for message in messages {
        grouped
            .entry(conversation_key(&message.sender_id, &message.receiver_id))
            .or_default()
            .push(message);
    }
    grouped
}
