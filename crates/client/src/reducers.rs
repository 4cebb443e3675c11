// Event reducers: translate inbound transport events into cache mutations.
//
// Reducers are plain functions over `&mut ConversationCache`. They never
// fail; anything they cannot apply (no identity, unknown conversation,
// duplicate id) is absorbed as a no-op and reported through the outcome.

use std::collections::{BTreeMap, HashSet};

use murmur_common::types::{ChatMessage, LastMessageMeta};
use serde::{Deserialize, Serialize};

use crate::cache::ConversationCache;

/// Which conversation an unread increment is charged to when a message lands
/// outside the selected conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadKeying {
    /// Charge the conversation the message was appended to.
    #[default]
    OtherParty,
    /// Charge the sender's id. For messages the current identity sent from
    /// another tab this bumps a counter under the identity's own id, which
    /// no conversation uses. Kept for parity with older clients.
    Sender,
}

/// Which cached conversations a deletion batch may reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionScope {
    /// Only the conversation currently open in the UI.
    SelectedConversation,
    /// Every cached conversation a record in the batch belongs to.
    #[default]
    AnyConversation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMessageOutcome {
    /// Appended to the open conversation; unread untouched.
    AppendedToSelected { key: String },
    /// Appended to a background conversation and counted as unread.
    AppendedUnread { key: String, unread_key: String },
    /// The id was already cached under `key`.
    Duplicate { key: String },
    /// No current identity.
    Ignored,
}

/// Apply a `newMessage` event.
pub fn reduce_new_message(
    cache: &mut ConversationCache,
    current_identity_id: Option<&str>,
    message: &ChatMessage,
    keying: UnreadKeying,
) -> NewMessageOutcome {
    let Some(me) = current_identity_id else {
        return NewMessageOutcome::Ignored;
    };

    let other_party = message.other_party(me).to_string();
    cache.set_last_message_meta(&other_party, LastMessageMeta::from(message));

    let selected = cache.selected().map(ToOwned::to_owned);
    let in_selected = selected.as_deref().is_some_and(|selected| {
        (message.sender_id == selected && message.receiver_id == me)
            || (message.receiver_id == selected && message.sender_id == me)
    });

    if in_selected {
        if let Some(key) = selected.clone() {
            if cache.append(&key, message.clone()) {
                return NewMessageOutcome::AppendedToSelected { key };
            }
            return NewMessageOutcome::Duplicate { key };
        }
    }

    if !cache.append(&other_party, message.clone()) {
        return NewMessageOutcome::Duplicate { key: other_party };
    }

    let unread_key = match keying {
        UnreadKeying::OtherParty => other_party.clone(),
        UnreadKeying::Sender => message.sender_id.clone(),
    };
    // The open conversation never accrues unread messages, even for frames
    // that do not involve the current identity.
    if selected.as_deref() != Some(unread_key.as_str()) {
        cache.increment_unread(&unread_key);
    }

    NewMessageOutcome::AppendedUnread { key: other_party, unread_key }
}

/// Apply a `deleteMessage` batch. Returns how many cached records changed.
pub fn reduce_deleted_messages(
    cache: &mut ConversationCache,
    current_identity_id: Option<&str>,
    batch: &[ChatMessage],
    scope: DeletionScope,
) -> usize {
    let Some(me) = current_identity_id else {
        return 0;
    };
    if batch.is_empty() {
        return 0;
    }

    match scope {
        DeletionScope::SelectedConversation => {
            let Some(selected) = cache.selected().map(ToOwned::to_owned) else {
                return 0;
            };
            cache.replace(&selected, batch)
        }
        DeletionScope::AnyConversation => {
            let mut by_conversation: BTreeMap<&str, Vec<ChatMessage>> = BTreeMap::new();
            for record in batch {
                by_conversation.entry(record.other_party(me)).or_default().push(record.clone());
            }
            by_conversation.into_iter().map(|(key, records)| cache.replace(key, &records)).sum()
        }
    }
}

/// Merge a history page fetched for the conversation with `other`.
///
/// Records that do not belong to that conversation are dropped. Incoming
/// messages the cache missed count as unread unless the conversation is
/// open, and the preview follows the newest record when it was missed too.
/// Returns how many messages were inserted.
pub fn reduce_history_page(
    cache: &mut ConversationCache,
    current_identity_id: Option<&str>,
    other: &str,
    page: Vec<ChatMessage>,
    keying: UnreadKeying,
) -> usize {
    let Some(me) = current_identity_id else {
        return 0;
    };

    let page: Vec<ChatMessage> = page
        .into_iter()
        .filter(|message| message.involves(me) && message.other_party(me) == other)
        .collect();
    let known: HashSet<String> =
        cache.messages(other).iter().map(|message| message.id.clone()).collect();
    let missed: Vec<ChatMessage> =
        page.iter().filter(|message| !known.contains(&message.id)).cloned().collect();

    let inserted = cache.load_history(other, page);
    if inserted == 0 {
        return 0;
    }

    let selected = cache.selected().map(ToOwned::to_owned);
    let mut counted = HashSet::new();
    for message in &missed {
        if message.sender_id == me || message.deleted || !counted.insert(message.id.as_str()) {
            continue;
        }
        let unread_key = match keying {
            UnreadKeying::OtherParty => other,
            UnreadKeying::Sender => message.sender_id.as_str(),
        };
        if selected.as_deref() != Some(unread_key) {
            cache.increment_unread(unread_key);
        }
    }

    let newest = cache.messages(other).last().cloned();
    if let Some(newest) = newest.filter(|newest| missed.iter().any(|m| m.id == newest.id)) {
        cache.set_last_message_meta(other, LastMessageMeta::from(&newest));
    }

    inserted
}
