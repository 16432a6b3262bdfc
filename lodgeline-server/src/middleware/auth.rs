use std::{str::FromStr, sync::Arc};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use shared::config::server::Config;
use shared::models::UserId;
use tracing::{Span, debug, warn};

use crate::{
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    store::MessageStore,
};

/// Resolves the principal named by the gateway-set identity header.
#[derive(Clone)]
pub struct PrincipalState {
    header: HeaderName,
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for PrincipalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrincipalState")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl PrincipalState {
    pub fn new(config: &Config, store: Arc<dyn MessageStore>) -> Self {
        let header = HeaderName::from_str(&config.auth.principal_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-authenticated-user"));
        Self { header, store }
    }
}

/// Attaches the principal to the [`RequestContext`].
///
/// A missing header leaves the request anonymous, and handlers that need a
/// principal answer `401`. A header that names no known user is rejected here.
pub async fn resolve_principal(
    State(state): State<PrincipalState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let principal = match principal_id(request.headers(), &state.header)? {
        Some(user_id) => {
            let principal = state.store.find_principal(user_id).await?;
            if principal.is_none() {
                warn!(user_id, "identity header names an unknown user");
                return Err(ApiError::unauthorized("unknown principal"));
            }
            Span::current().record("principal_id", user_id);
            principal
        }
        None => {
            debug!("anonymous request");
            None
        }
    };

    match request.extensions_mut().get_mut::<RequestContext>() {
        Some(context) => context.principal = principal,
        None => {
            request.extensions_mut().insert(RequestContext {
                request_id: String::new(),
                principal,
            });
        }
    }
    Ok(next.run(request).await)
}

fn principal_id(headers: &HeaderMap, header: &HeaderName) -> AppResult<Option<UserId>> {
    let Some(value) = headers.get(header) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<UserId>().ok())
        .map(Some)
        .ok_or_else(|| ApiError::unauthorized("malformed identity header"))
}
