#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    Conversation, ConversationDetail, ConversationPayload, CreateConversationRequest,
    ErrorResponse, HubCredentials, Message, MessagePayload, ParticipantSummary, Role,
    SendMessageRequest, Timestamp,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lodgeline API",
        version = "1.0.0",
        description = "Guest/host conversations with real-time hub delivery"
    ),
    paths(
        crate::handlers::conversations::create_conversation,
        crate::handlers::conversations::list_conversations,
        crate::handlers::conversations::open_conversation,
        crate::handlers::conversations::send_message,
        crate::handlers::conversations::get_message,
        crate::handlers::hub_token::hub_token,
    ),
    components(
        schemas(
            Conversation,
            ConversationDetail,
            ConversationPayload,
            CreateConversationRequest,
            ErrorResponse,
            HubCredentials,
            Message,
            MessagePayload,
            ParticipantSummary,
            Role,
            SendMessageRequest,
            Timestamp,
        )
    ),
    tags(
        (name = "Conversations", description = "Conversations between a client and an owner"),
        (name = "Hub", description = "Credentials for the real-time hub")
    )
)]
pub struct ApiDoc;

/// The OpenAPI document as pretty-printed JSON.
///
/// # Errors
/// Returns an error if the document cannot be serialized.
pub fn openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}
