use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{info, instrument};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    publisher::EventPublisher,
};
use shared::models::{
    Conversation, ConversationDetail, ConversationId, CreateConversationRequest,
    ListConversationsQuery, MessageId, MessagePayload, Principal, Role, SendMessageRequest,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/conversations/{conversation_id}", get(open_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            post(send_message),
        )
        .route("/messages/{message_id}", get(get_message))
}

fn ensure_may_view(principal: &Principal, conversation: &Conversation) -> AppResult<()> {
    if conversation.is_participant(principal.id) || principal.has_role(Role::Admin) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "user {} is not a participant of conversation {}",
            principal.id, conversation.id
        )))
    }
}

/// `client`/`owner` from the query, or the principal's own participant role.
fn listing_role(principal: &Principal, requested: Option<&str>) -> AppResult<Role> {
    let role = match requested {
        Some(raw) => Role::try_from(raw).map_err(ApiError::validation)?,
        None if principal.has_role(Role::Client) => Role::Client,
        None if principal.has_role(Role::Owner) => Role::Owner,
        None => {
            return Err(ApiError::validation(
                "role must be 'client' or 'owner'",
            ));
        }
    };
    if role == Role::Admin {
        return Err(ApiError::validation("role must be 'client' or 'owner'"));
    }
    Ok(role)
}

/// Returns the conversation between a client and an owner, creating it on
/// first contact.
#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 200, description = "Existing or new conversation", body = Conversation),
        (status = 401, description = "No authenticated principal", body = shared::models::ErrorResponse),
        (status = 403, description = "Principal is not part of the pair", body = shared::models::ErrorResponse),
        (status = 404, description = "Unknown client or owner", body = shared::models::ErrorResponse)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context, request), fields(client_id = request.client_id, owner_id = request.owner_id))]
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<CreateConversationRequest>,
) -> AppResult<Json<Conversation>> {
    let principal = context.require_principal()?;
    if !principal.has_role(Role::Admin)
        && principal.id != request.client_id
        && principal.id != request.owner_id
    {
        return Err(ApiError::forbidden(
            "conversations can only be opened by one of their participants",
        ));
    }

    let conversation = state
        .store
        .create_conversation(request.client_id, request.owner_id)
        .await?;
    Ok(Json(conversation))
}

/// Stores a message, then fans it out to the conversation and recipient
/// topics. Publishing never fails the request.
#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Stored message", body = MessagePayload),
        (status = 400, description = "Blank content", body = shared::models::ErrorResponse),
        (status = 401, description = "No authenticated principal", body = shared::models::ErrorResponse),
        (status = 403, description = "Sender is not a participant", body = shared::models::ErrorResponse),
        (status = 404, description = "Unknown conversation", body = shared::models::ErrorResponse)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context, request))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<ConversationId>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let principal = context.require_principal()?;
    let message = state
        .store
        .append_message(conversation_id, principal.id, &request.content)
        .await?;
    metrics::counter!("lodgeline_messages_appended_total").increment(1);

    let report = state.publisher.publish_message_event(&message).await;
    info!(
        message_id = message.id,
        delivered = report.all_delivered(),
        "message stored"
    );

    let payload = report
        .payload
        .unwrap_or_else(|| EventPublisher::detached_payload(&message));
    Ok((StatusCode::CREATED, Json(payload)))
}

/// Returns the conversation with its messages. Participants opening it mark
/// the counterpart's messages as read first; admins only observe.
#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}",
    params(("conversation_id" = i64, Path, description = "Conversation id")),
    responses(
        (status = 200, description = "Conversation with messages", body = ConversationDetail),
        (status = 401, description = "No authenticated principal", body = shared::models::ErrorResponse),
        (status = 403, description = "Not a participant", body = shared::models::ErrorResponse),
        (status = 404, description = "Unknown conversation", body = shared::models::ErrorResponse)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn open_conversation(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<ConversationId>,
) -> AppResult<Json<ConversationDetail>> {
    let principal = context.require_principal()?;
    let conversation = state.store.get_conversation(conversation_id).await?;
    ensure_may_view(principal, &conversation)?;

    if conversation.is_participant(principal.id) {
        let marked = state
            .store
            .mark_conversation_read(conversation_id, principal.id)
            .await?;
        metrics::counter!("lodgeline_messages_marked_read_total").increment(marked);
        info!(marked, "conversation read");
    }

    let detail = state.store.get_conversation_detail(conversation_id).await?;
    Ok(Json(detail))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    params(("role" = Option<String>, Query, description = "`client` or `owner`")),
    responses(
        (status = 200, description = "Conversations, most recent first", body = [Conversation]),
        (status = 400, description = "Unsupported role", body = shared::models::ErrorResponse),
        (status = 401, description = "No authenticated principal", body = shared::models::ErrorResponse)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context, query))]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ListConversationsQuery>,
) -> AppResult<Json<Vec<Conversation>>> {
    let principal = context.require_principal()?;
    let role = listing_role(principal, query.role.as_deref())?;
    let conversations = state
        .store
        .list_conversations_for_user(principal.id, role)
        .await?;
    Ok(Json(conversations))
}

/// Single message in the same shape the hub publishes.
#[utoipa::path(
    get,
    path = "/api/messages/{message_id}",
    params(("message_id" = i64, Path, description = "Message id")),
    responses(
        (status = 200, description = "Message payload", body = MessagePayload),
        (status = 403, description = "Not a participant", body = shared::models::ErrorResponse),
        (status = 404, description = "Unknown message", body = shared::models::ErrorResponse)
    ),
    tag = "Conversations"
)]
#[instrument(skip(state, context))]
pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(message_id): Path<MessageId>,
) -> AppResult<Json<MessagePayload>> {
    let principal = context.require_principal()?;
    let message = state.store.find_message(message_id).await?;
    let (payload, conversation) = state.publisher.build_payload(&message).await?;
    ensure_may_view(principal, &conversation)?;
    Ok(Json(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: Vec<Role>) -> Principal {
        Principal {
            id: 1,
            display_name: "Ana".into(),
            roles,
        }
    }

    #[test]
    fn listing_role_defaults_to_participant_role() {
        assert_eq!(
            listing_role(&principal(vec![Role::Owner]), None).unwrap(),
            Role::Owner
        );
        assert_eq!(
            listing_role(&principal(vec![Role::Client, Role::Owner]), None).unwrap(),
            Role::Client
        );
        assert_eq!(
            listing_role(&principal(vec![Role::Client]), Some("owner")).unwrap(),
            Role::Owner
        );
        assert!(listing_role(&principal(vec![Role::Admin]), None).is_err());
        assert!(listing_role(&principal(vec![Role::Client]), Some("admin")).is_err());
        assert!(listing_role(&principal(vec![Role::Client]), Some("guest")).is_err());
    }
}
