use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat, StorageBackend};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state::AppState,
    db::bootstrap,
    hub::{HubState, hub_router},
    middleware::{
        auth::{PrincipalState, resolve_principal},
        request_context::{RequestIdState, assign_request_id},
    },
    routes,
    store::{InMemoryMessageStore, MessageStore, PgMessageStore},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once and returns its handle.
///
/// When another recorder is already installed the handle renders an empty,
/// detached registry.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "prometheus recorder not installed");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
///
/// Returns the configured level. Calling it again after a subscriber is set
/// is a no-op.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

pub(crate) fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Opens the configured message store. The Postgres backend is bootstrapped
/// before it is handed out.
///
/// # Errors
/// Returns an error when the database is unreachable or a bootstrap script fails.
pub async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn MessageStore>> {
    match config.storage.backend {
        StorageBackend::Postgres => {
            let pool = create_database_pool(&config.database)
                .await
                .context("failed to connect to the database")?;
            bootstrap::run(&pool, &config.database)
                .await
                .context("database bootstrap failed")?;
            Ok(Arc::new(PgMessageStore::new(pool)))
        }
        StorageBackend::Memory => {
            info!(
                users = config.storage.seed_users.len(),
                "using in-memory message store"
            );
            Ok(Arc::new(InMemoryMessageStore::with_users(
                config.storage.seed_users.iter().cloned(),
            )))
        }
    }
}

/// Creates the CORS layer. No configured origins means any origin.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::any());

    if config.server.cors_allowed_origins.is_empty() {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins = config
            .server
            .cors_allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Creates the main application router with all middleware and routes.
///
/// The hub endpoints are mounted only when the hub runs in-process.
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let config = Arc::clone(&state.config);
    let request_id_state = RequestIdState::from_config(&config);
    let principal_state = PrincipalState::new(&config, Arc::clone(&state.store));

    let mut router = Router::new()
        .merge(routes::api_routes())
        .merge(routes::health::create_health_router())
        .merge(routes::openapi::openapi_routes())
        .route("/metrics", get(metrics_endpoint));

    if let Some(hub) = state.hub.as_ref() {
        router = router.merge(hub_router(HubState::new(
            Arc::clone(hub),
            Arc::clone(&state.tokens),
            &config.hub,
        )));
    }

    router
        .layer(middleware::from_fn_with_state(
            principal_state,
            resolve_principal,
        ))
        .layer(create_cors_layer(&config))
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            assign_request_id,
        ))
        .layer(Extension(metrics_handle))
        .with_state(state)
}

/// Resolves when Ctrl+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the store cannot be opened or the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let store = build_store(&config).await?;
    let state = Arc::new(AppState::new(Arc::clone(&config), store)?);
    info!(mode = ?config.hub.mode, hub_url = %config.hub.public_url, "hub configured");

    let app = create_app_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}
