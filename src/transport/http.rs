//! HTTP command endpoints. Each handler extracts the bearer token (where the
//! command requires one), calls straight into the `Router`, and returns its
//! `Envelope` as JSON — the HTTP status code is always 200, per spec.md §5's
//! "the envelope is the source of truth, not the transport status code."

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::identity::Role;
use crate::router::{Caller, Envelope};

use super::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, Json<Value>> {
    let Some(token) = bearer_token(headers) else {
        return Err(Json(json!({
            "ok": false,
            "error": { "kind": "token-invalid", "message": "missing bearer token", "retry_after": null }
        })));
    };
    state.router.authenticate(token).map_err(|e| {
        Json(json!({
            "ok": false,
            "error": { "kind": e.kind, "message": e.message, "retry_after": e.retry_after }
        }))
    })
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Only meaningful on `register`; defaults to `reader` (spec.md §6.1).
    pub role: Option<Role>,
}

pub async fn register(State(state): State<AppState>, Json(body): Json<Credentials>) -> Json<Envelope> {
    Json(state.router.register(&body.username, &body.password, body.role).await)
}

pub async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> Json<Envelope> {
    Json(state.router.login(&body.username, &body.password).await)
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.logout(&caller).await)),
        Err(e) => e,
    }
}

#[derive(Debug, Deserialize)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

pub async fn list_messages(State(state): State<AppState>, headers: HeaderMap, Query(page): Query<Page>) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.list_messages(&caller, page.page, page.limit).await)),
        Err(e) => e,
    }
}

#[derive(Debug, Deserialize)]
pub struct Body {
    pub body: String,
}

pub async fn create_message(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<Body>) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.create_message(&caller, &req.body).await)),
        Err(e) => e,
    }
}

pub async fn update_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(req): Json<Body>,
) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.update_message(&caller, id, &req.body).await)),
        Err(e) => e,
    }
}

pub async fn delete_message(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<u64>) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.delete_message(&caller, id).await)),
        Err(e) => e,
    }
}

pub async fn acquire_writer(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.acquire_writer(&caller).await)),
        Err(e) => e,
    }
}

pub async fn release_writer(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.release_writer(&caller).await)),
        Err(e) => e,
    }
}

pub async fn get_status(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.get_status(&caller).await)),
        Err(e) => e,
    }
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

pub async fn set_writer_enabled(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EnabledBody>,
) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.set_writer_enabled(&caller, req.enabled).await)),
        Err(e) => e,
    }
}

pub async fn list_audit(State(state): State<AppState>, headers: HeaderMap, Query(page): Query<Page>) -> Json<Value> {
    match authenticate(&state, &headers).await {
        Ok(caller) => Json(envelope_to_value(state.router.list_audit(&caller, page.page, page.limit).await)),
        Err(e) => e,
    }
}

fn envelope_to_value(envelope: Envelope) -> Value {
    serde_json::to_value(envelope).unwrap_or(Value::Null)
}
