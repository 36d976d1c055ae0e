//! Reference transport (spec.md §5): a thin axum binding of the
//! transport-agnostic `Router` onto HTTP (command surface) and WebSocket
//! (streaming event surface). Every other component in this crate is
//! reachable without this module — a different transport could be swapped
//! in without touching `router.rs` or below.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use tower_http::cors::{Any, CorsLayer};

use crate::router::Router;

/// Request bodies above this size are rejected before they reach a handler
/// (spec.md §4.7 item 1: "Validates shape and size (bodies ≤ 1 MiB...)").
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
}

pub fn build(router: Arc<Router>) -> AxumRouter {
    let state = AppState { router };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    AxumRouter::new()
        .route("/health", get(http::health))
        .route("/v1/register", post(http::register))
        .route("/v1/login", post(http::login))
        .route("/v1/logout", post(http::logout))
        .route("/v1/messages", get(http::list_messages).post(http::create_message))
        .route("/v1/messages/:id", axum::routing::patch(http::update_message).delete(http::delete_message))
        .route("/v1/writer/acquire", post(http::acquire_writer))
        .route("/v1/writer/release", post(http::release_writer))
        .route("/v1/writer/status", get(http::get_status))
        .route("/v1/writer/enabled", post(http::set_writer_enabled))
        .route("/v1/audit", get(http::list_audit))
        .route("/v1/events", get(ws::upgrade))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
