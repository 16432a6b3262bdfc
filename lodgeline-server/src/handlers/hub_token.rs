use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, State},
    http::header,
    response::{AppendHeaders, IntoResponse},
    routing::get,
};
use cookie::{Cookie, SameSite};
use shared::models::HubCredentials;
use tracing::{info, instrument};

use crate::{
    app_state::AppState,
    http::error::AppResult,
    hub::{AUTHORIZATION_COOKIE, HUB_PATH},
    middleware::request_context::RequestContext,
    tokens::grant_for,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/mercure-token", get(hub_token))
        .route("/mercure-info", get(hub_token))
}

/// Issues a subscription token for the calling principal together with the
/// hub URL to connect to.
///
/// The token is also set as the `mercureAuthorization` cookie so browser
/// `EventSource` clients can authenticate without query parameters.
#[utoipa::path(
    get,
    path = "/api/mercure-token",
    responses(
        (status = 200, description = "Subscription token and hub URL", body = HubCredentials),
        (status = 401, description = "No authenticated principal", body = shared::models::ErrorResponse)
    ),
    tag = "Hub"
)]
#[instrument(skip(state, context))]
pub async fn hub_token(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<impl IntoResponse> {
    let principal = context.require_principal()?;
    let grant = grant_for(principal, state.config.hub.grant_policy, state.store.as_ref()).await?;
    let issued = state
        .tokens
        .issue_subscription_token(Some(principal), &grant)?;
    info!(principal_id = principal.id, expires_at = %issued.expires_at, "hub token issued");

    let cookie = Cookie::build((AUTHORIZATION_COOKIE, issued.token.clone()))
        .path(HUB_PATH)
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(
            state.tokens.ttl().num_seconds(),
        ))
        .build();

    let credentials = HubCredentials {
        token: issued.token,
        hub_url: state.config.hub.public_url.clone(),
    };
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie.to_string())]),
        Json(credentials),
    ))
}
