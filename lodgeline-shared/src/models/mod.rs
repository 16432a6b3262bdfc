pub mod conversation;
pub mod errors;
pub mod message;
pub mod timestamp;
pub mod user;

pub use conversation::{
    Conversation, ConversationDetail, ConversationPayload, CreateConversationRequest,
    ListConversationsQuery, PREVIEW_ELLIPSIS, PREVIEW_LENGTH, preview,
};
pub use errors::ErrorResponse;
pub use message::{Message, MessagePayload, SendMessageRequest};
pub use timestamp::Timestamp;
pub use user::{HubCredentials, ParticipantSummary, Principal, Role};

/// Surrogate key of a user (client, owner or admin).
pub type UserId = i64;

/// Surrogate key of a conversation.
pub type ConversationId = i64;

/// Surrogate key of a message.
pub type MessageId = i64;
