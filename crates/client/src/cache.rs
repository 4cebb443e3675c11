// Conversation cache: the client's single source of truth for message
// history, unread counters and list previews.
//
// Conversations are keyed by the other participant's identity id. The cache
// is owned by one identity; the runtime discards it wholesale on identity
// teardown.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use murmur_common::types::{ChatMessage, LastMessageMeta};
use tokio::sync::RwLock;

/// Handle shared between the sync runtime (writer) and UI consumers (readers).
pub type SharedCache = Arc<RwLock<ConversationCache>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    unread_count: u32,
    last_message_meta: Option<LastMessageMeta>,
}

impl Conversation {
    /// Messages in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    pub fn last_message_meta(&self) -> Option<&LastMessageMeta> {
        self.last_message_meta.as_ref()
    }

    fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|message| message.id == message_id)
    }
}

#[derive(Debug, Default)]
pub struct ConversationCache {
    conversations: HashMap<String, Conversation>,
    selected: Option<String>,
    latest_meta: Option<LastMessageMeta>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(RwLock::new(Self::new()))
    }

    // ── Mutators ───────────────────────────────────────────────────

    /// Append `message` to the conversation under `key`.
    ///
    /// Returns `false` without touching the sequence when a message with the
    /// same id is already cached. The first copy wins, so a late duplicate of
    /// a create never overwrites its deleted replacement.
    pub fn append(&mut self, key: &str, message: ChatMessage) -> bool {
        let conversation = self.conversations.entry(key.to_string()).or_default();
        if conversation.contains(&message.id) {
            return false;
        }
        conversation.messages.push(message);
        true
    }

    /// Swap cached messages for their updated records, matched by id.
    ///
    /// Unmatched messages pass through untouched. Nothing is inserted: a
    /// conversation with no cached messages is left alone. Returns how many
    /// records were swapped.
    pub fn replace(&mut self, key: &str, updated: &[ChatMessage]) -> usize {
        let Some(conversation) = self.conversations.get_mut(key) else {
            return 0;
        };
        if conversation.messages.is_empty() || updated.is_empty() {
            return 0;
        }

        let by_id: HashMap<&str, &ChatMessage> =
            updated.iter().map(|message| (message.id.as_str(), message)).collect();

        let mut replaced = 0;
        for cached in conversation.messages.iter_mut() {
            if let Some(update) = by_id.get(cached.id.as_str()) {
                *cached = (*update).clone();
                replaced += 1;
            }
        }
        replaced
    }

    pub fn increment_unread(&mut self, key: &str) {
        let conversation = self.conversations.entry(key.to_string()).or_default();
        conversation.unread_count = conversation.unread_count.saturating_add(1);
    }

    pub fn mark_read(&mut self, key: &str) {
        if let Some(conversation) = self.conversations.get_mut(key) {
            conversation.unread_count = 0;
        }
    }

    /// Record the preview for `key` and make it the latest preview overall.
    pub fn set_last_message_meta(&mut self, key: &str, meta: LastMessageMeta) {
        self.conversations.entry(key.to_string()).or_default().last_message_meta =
            Some(meta.clone());
        self.latest_meta = Some(meta);
    }

    /// Point the UI at a conversation (or at none).
    ///
    /// Selection alone does not clear the unread counter; callers opening a
    /// conversation zero it themselves, usually via
    /// [`ConversationCache::select_and_mark_read`].
    pub fn select_conversation(&mut self, key: Option<String>) {
        if let Some(key) = &key {
            self.conversations.entry(key.clone()).or_default();
        }
        self.selected = key;
    }

    pub fn select_and_mark_read(&mut self, key: Option<String>) {
        self.select_conversation(key);
        if let Some(key) = self.selected.clone() {
            self.mark_read(&key);
        }
    }

    /// Merge a fetched history page into the conversation under `key`.
    ///
    /// Unknown messages are inserted and the conversation is re-sorted by
    /// `created_at`; equal timestamps keep their arrival order. Known ids are
    /// not duplicated; a deleted record in the page replaces the cached
    /// copy, while a cached deleted record is never resurrected. Returns the
    /// number of newly inserted messages.
    pub fn load_history(&mut self, key: &str, page: Vec<ChatMessage>) -> usize {
        let conversation = self.conversations.entry(key.to_string()).or_default();

        let mut seen: HashSet<String> = HashSet::new();
        let mut inserted = 0;
        for message in page {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            match conversation.messages.iter_mut().find(|cached| cached.id == message.id) {
                Some(cached) => {
                    if message.deleted && !cached.deleted {
                        *cached = message;
                    }
                }
                None => {
                    conversation.messages.push(message);
                    inserted += 1;
                }
            }
        }

        if inserted > 0 {
            conversation.messages.sort_by_key(|message| message.created_at);
        }
        inserted
    }

    /// Drop every conversation, the selection and the latest preview.
    pub fn reset(&mut self) {
        self.conversations.clear();
        self.selected = None;
        self.latest_meta = None;
    }

    // ── Read surface ───────────────────────────────────────────────

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn conversation(&self, key: &str) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    pub fn messages(&self, key: &str) -> &[ChatMessage] {
        self.conversations.get(key).map(Conversation::messages).unwrap_or_default()
    }

    pub fn unread_count(&self, key: &str) -> u32 {
        self.conversations.get(key).map(Conversation::unread_count).unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.values().map(Conversation::unread_count).sum()
    }

    /// The most recent preview across all conversations.
    pub fn last_message_meta(&self) -> Option<&LastMessageMeta> {
        self.latest_meta.as_ref()
    }

    pub fn conversation_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.conversations.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
