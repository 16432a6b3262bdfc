//! Conversation and message persistence.
//!
//! [`MessageStore`] owns conversations, messages and their read state. Two
//! backends implement it: [`PgMessageStore`] for production and
//! [`InMemoryMessageStore`] for single-node development and tests.

mod memory;
mod postgres;

pub use memory::InMemoryMessageStore;
pub use postgres::PgMessageStore;

use async_trait::async_trait;
use shared::models::{
    Conversation, ConversationDetail, ConversationId, Message, MessageId, ParticipantSummary,
    Principal, Role, UserId,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence of conversations, messages and read state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Loads a principal by id.
    async fn find_principal(&self, user_id: UserId) -> StoreResult<Option<Principal>>;

    /// Returns the conversation between `client_id` and `owner_id`, creating
    /// it when none exists yet.
    ///
    /// # Errors
    /// `NotFound` if either id is not a principal holding the expected role,
    /// `Validation` if both ids are the same user.
    async fn create_conversation(
        &self,
        client_id: UserId,
        owner_id: UserId,
    ) -> StoreResult<Conversation>;

    async fn get_conversation(&self, conversation_id: ConversationId)
    -> StoreResult<Conversation>;

    /// Conversation with participants and messages in creation order.
    async fn get_conversation_detail(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<ConversationDetail>;

    async fn find_message(&self, message_id: MessageId) -> StoreResult<Message>;

    /// Persists a new unread message and refreshes the conversation's
    /// `updated_at`, preview and `has_new_messages`.
    ///
    /// # Errors
    /// `Validation` for blank content, `NotFound` for an unknown
    /// conversation, `Forbidden` if the sender is not a participant.
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<Message>;

    /// Marks every unread message not sent by `reader_id` as read and returns
    /// how many changed. `has_new_messages` is cleared only when that count is
    /// non-zero.
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> StoreResult<u64>;

    /// Conversations where `user_id` is the client (`Role::Client`) or the
    /// owner (`Role::Owner`), most recently updated first.
    async fn list_conversations_for_user(
        &self,
        user_id: UserId,
        role: Role,
    ) -> StoreResult<Vec<Conversation>>;

    /// Ids of every conversation `user_id` takes part in, on either side.
    async fn conversation_ids_for_participant(
        &self,
        user_id: UserId,
    ) -> StoreResult<Vec<ConversationId>>;

    /// Cheap round trip used by `/readyz`.
    async fn ping(&self) -> StoreResult<()>;
}

pub(crate) fn validate_content(content: &str) -> StoreResult<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_pair(client_id: UserId, owner_id: UserId) -> StoreResult<()> {
    if client_id == owner_id {
        return Err(StoreError::Validation(
            "client and owner must be different users".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn require_role(
    principal: Option<Principal>,
    user_id: UserId,
    role: Role,
) -> StoreResult<Principal> {
    match principal {
        Some(principal) if principal.has_role(role) => Ok(principal),
        _ => Err(StoreError::NotFound(format!(
            "no {} with id {user_id}",
            match role {
                Role::Client => "client",
                Role::Owner => "owner",
                Role::Admin => "admin",
            }
        ))),
    }
}

pub(crate) fn require_participant(
    conversation: &Conversation,
    user_id: UserId,
    action: &str,
) -> StoreResult<()> {
    if conversation.is_participant(user_id) {
        Ok(())
    } else {
        Err(StoreError::Forbidden(format!(
            "user {user_id} may not {action} conversation {}",
            conversation.id
        )))
    }
}

pub(crate) fn listing_role(role: Role) -> StoreResult<Role> {
    match role {
        Role::Client | Role::Owner => Ok(role),
        Role::Admin => Err(StoreError::Validation(
            "conversations are listed per client or owner".to_string(),
        )),
    }
}

pub(crate) fn summary_or_placeholder(
    principal: Option<Principal>,
    user_id: UserId,
) -> ParticipantSummary {
    principal.map_or_else(
        || ParticipantSummary {
            id: user_id,
            display_name: String::new(),
            roles: Vec::new(),
        },
        |principal| principal.summary(),
    )
}
