pub mod health;
pub mod openapi;

use std::sync::Arc;

use axum::Router;

use crate::{app_state::AppState, handlers};

/// Everything served under `/api`.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        handlers::conversations::routes().merge(handlers::hub_token::routes()),
    )
}
