//! Hub topic addressing.
//!
//! Topic names are derived from identities and never stored. The server
//! publishes to them, the token issuer grants them, and subscribers connect to
//! them by exact name.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::models::{Conversation, ConversationId, Message, UserId};

/// Selector granting every topic.
pub const ANY_TOPIC: &str = "*";

/// Selector granting every conversation topic.
pub const ALL_CONVERSATIONS: &str = "conversation/*";

/// Topic carrying every message of one conversation.
#[must_use]
pub fn conversation_topic(conversation_id: ConversationId) -> String {
    format!("conversation/{conversation_id}")
}

/// Personal topic of a user, carrying messages addressed to them.
#[must_use]
pub fn user_topic(user_id: UserId) -> String {
    format!("user/{user_id}/messages")
}

/// The participant of `conversation` who did not send `message`.
///
/// Returns `None` when the sender is not a participant, which the store never
/// allows to be persisted.
#[must_use]
pub fn recipient_of(message: &Message, conversation: &Conversation) -> Option<UserId> {
    conversation.counterpart_of(message.sender_id)
}

/// Whether `selector` authorizes `topic`.
///
/// `*` matches everything, a selector ending in `/*` matches every topic
/// below that prefix, anything else must match exactly.
#[must_use]
pub fn selector_matches(selector: &str, topic: &str) -> bool {
    if selector == ANY_TOPIC {
        return true;
    }
    match selector.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('/') => {
            topic.len() > prefix.len() && topic.starts_with(prefix)
        }
        _ => selector == topic,
    }
}

/// Whether any of `selectors` authorizes `topic`.
#[must_use]
pub fn any_selector_matches<S: AsRef<str>>(selectors: &[S], topic: &str) -> bool {
    selectors
        .iter()
        .any(|selector| selector_matches(selector.as_ref(), topic))
}

/// A subscribable topic, as tracked by subscription clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKey {
    Conversation(ConversationId),
    UserMessages(UserId),
}

impl TopicKey {
    /// Hub topic name for this key.
    #[must_use]
    pub fn topic(self) -> String {
        match self {
            TopicKey::Conversation(id) => conversation_topic(id),
            TopicKey::UserMessages(id) => user_topic(id),
        }
    }
}

impl Display for TopicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TopicKey::Conversation(id) => write!(f, "conversation-{id}"),
            TopicKey::UserMessages(id) => write!(f, "user-{id}"),
        }
    }
}
