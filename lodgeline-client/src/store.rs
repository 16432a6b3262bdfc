//! Client-side view of conversations fed by hub events.
//!
//! Hub delivery is at-least-once and unordered across topics, so the same
//! message may arrive on both the conversation and the personal topic, or
//! twice after a reconnect replay. [`ConversationStore::add_message`] keys
//! everything by message id.

use std::collections::{BTreeMap, HashMap};

use shared::models::{ConversationId, ConversationPayload, MessageId, MessagePayload};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct StoreState {
    messages: HashMap<ConversationId, BTreeMap<MessageId, MessagePayload>>,
    conversations: HashMap<ConversationId, ConversationPayload>,
}

/// Messages received from the hub, de-duplicated by id and kept in id
/// order per conversation.
#[derive(Debug, Default)]
pub struct ConversationStore {
    state: RwLock<StoreState>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a delivered message. Returns `false` for a message already
    /// known, which leaves the store untouched.
    pub async fn add_message(&self, payload: MessagePayload) -> bool {
        let mut state = self.state.write().await;
        let conversation_id = payload.conversation_id();

        let messages = state.messages.entry(conversation_id).or_default();
        if messages.contains_key(&payload.id) {
            return false;
        }
        let conversation = payload.conversation.clone();
        messages.insert(payload.id, payload);

        match state.conversations.get(&conversation_id) {
            Some(known) if known.updated_at > conversation.updated_at => {}
            _ => {
                state.conversations.insert(conversation_id, conversation);
            }
        }
        true
    }

    /// Messages of a conversation, oldest first.
    pub async fn messages(&self, conversation_id: ConversationId) -> Vec<MessagePayload> {
        let state = self.state.read().await;
        let mut messages: Vec<MessagePayload> = state
            .messages
            .get(&conversation_id)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages
    }

    /// Latest known conversation state.
    pub async fn conversation(&self, conversation_id: ConversationId) -> Option<ConversationPayload> {
        self.state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned()
    }

    /// Whether the last payload seen for the conversation flagged new messages.
    pub async fn has_unread(&self, conversation_id: ConversationId) -> bool {
        self.state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .is_some_and(|conversation| conversation.has_new_messages)
    }

    /// Clears the unread flag locally after the conversation was opened.
    pub async fn mark_read(&self, conversation_id: ConversationId) {
        if let Some(conversation) = self
            .state
            .write()
            .await
            .conversations
            .get_mut(&conversation_id)
        {
            conversation.has_new_messages = false;
        }
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.values().map(BTreeMap::len).sum()
    }
}
