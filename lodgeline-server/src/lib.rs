//! Lodgeline server: conversation store, hub credentials, message fan-out
//! and an embedded hub, served over axum.

pub mod app_state;
pub mod db;
mod handlers;
pub mod http;
pub mod hub;
pub mod middleware;
pub mod openapi;
pub mod publisher;
mod routes;
pub mod server;
pub mod store;
pub mod tokens;
mod tracer;
