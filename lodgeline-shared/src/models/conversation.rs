use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ConversationId, Message, ParticipantSummary, Timestamp, UserId};

/// Maximum number of characters kept in [`Conversation::last_message_preview`].
pub const PREVIEW_LENGTH: usize = 50;

/// Marker appended to a preview when the content was truncated.
pub const PREVIEW_ELLIPSIS: char = '…';

/// The thread of messages between one client and one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub client_id: UserId,
    pub owner_id: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// First characters of the latest message.
    pub last_message_preview: Option<String>,
    /// Set when a message arrives, cleared once the counterpart reads it.
    pub has_new_messages: bool,
}

impl Conversation {
    #[must_use]
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.client_id == user_id || self.owner_id == user_id
    }

    /// The participant on the other side of `user_id`, if `user_id` takes part.
    #[must_use]
    pub fn counterpart_of(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.client_id {
            Some(self.owner_id)
        } else if user_id == self.owner_id {
            Some(self.client_id)
        } else {
            None
        }
    }
}

/// Conversation as embedded in a published message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub id: ConversationId,
    pub client: ParticipantSummary,
    pub owner: ParticipantSummary,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_message_preview: Option<String>,
    pub has_new_messages: bool,
}

/// Response body of `GET /api/conversations/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub client: ParticipantSummary,
    pub owner: ParticipantSummary,
    /// Messages in creation order.
    pub messages: Vec<Message>,
}

/// Request body of `POST /api/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub client_id: UserId,
    pub owner_id: UserId,
}

/// Query string of `GET /api/conversations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConversationsQuery {
    /// `client` or `owner`; defaults to the principal's own participant role.
    pub role: Option<String>,
}

/// Builds the conversation preview for `content`.
///
/// Keeps the first [`PREVIEW_LENGTH`] characters and appends
/// [`PREVIEW_ELLIPSIS`] only when something was cut off.
#[must_use]
pub fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let mut head: String = chars.by_ref().take(PREVIEW_LENGTH).collect();
    if chars.next().is_some() {
        head.push(PREVIEW_ELLIPSIS);
    }
    head
}
