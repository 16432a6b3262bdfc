use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ConversationId, ConversationPayload, MessageId, ParticipantSummary, Timestamp, UserId};

/// A single message in a conversation.
///
/// Immutable once stored, except for `is_read` flipping to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Denormalized from the conversation.
    pub client_id: UserId,
    /// Denormalized from the conversation.
    pub owner_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    pub is_read: bool,
}

/// Serialized message as published to the hub and returned by
/// `POST /api/conversations/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub content: String,
    pub created_at: Timestamp,
    pub is_read: bool,
    pub sender: ParticipantSummary,
    pub conversation: ConversationPayload,
    pub client: ParticipantSummary,
    pub owner: ParticipantSummary,
}

impl MessagePayload {
    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation.id
    }
}

/// Request body of `POST /api/conversations/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
}
