use crate::AppState;
use relay_core::config::{Config, RoutingConfig, RoutingMode};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ValueBody<T> {
    pub value: T,
}

/// Clone-modify-validate-swap for routing updates. Validation failures map
/// to 400 without touching the live config.
fn apply_routing_update(
    state: &AppState,
    update: impl FnOnce(&mut RoutingConfig),
) -> Result<(), String> {
    let current = state.config.load_full();
    let mut next: Config = (*current).clone();
    update(&mut next.routing);
    next.routing.validate().map_err(|e| e.to_string())?;
    persist_and_swap(state, next);
    Ok(())
}

/// Persist the YAML file best-effort, then swap the live config atomically.
fn persist_and_swap(state: &AppState, config: Config) {
    if let Ok(path) = state.config_path.lock()
        && !path.is_empty()
        && let Err(e) = config.save(&path)
    {
        tracing::warn!("failed to persist config to {}: {e}", *path);
    }
    state.config.store(Arc::new(config));
}

fn ok() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

fn validation_failed(message: String) -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "validation_failed", "message": message})),
    )
}

// ─── Routing mode ──────────────────────────────────────────────────────────

/// GET /routing/mode
pub async fn get_mode(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({"value": config.routing.mode.as_str()}))
}

/// PUT /routing/mode — accepts the write-side aliases, stores canonically.
pub async fn put_mode(
    State(state): State<AppState>,
    Json(body): Json<ValueBody<String>>,
) -> axum::response::Response {
    let Some(mode) = RoutingMode::parse_alias(&body.value) else {
        return validation_failed(format!("invalid routing mode: '{}'", body.value))
            .into_response();
    };
    match apply_routing_update(&state, |r| r.mode = mode) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

// ─── Fallback models ───────────────────────────────────────────────────────

/// GET /fallback/models
pub async fn get_fallback_models(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({"value": config.routing.fallback_models}))
}

/// PUT /fallback/models — rejected when the next-hop graph has a cycle.
pub async fn put_fallback_models(
    State(state): State<AppState>,
    Json(body): Json<ValueBody<HashMap<String, String>>>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| r.fallback_models = body.value) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

// ─── Fallback chain ────────────────────────────────────────────────────────

/// GET /fallback/chain
pub async fn get_fallback_chain(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({"value": config.routing.fallback_chain}))
}

/// PUT /fallback/chain — rejected beyond 20 entries.
pub async fn put_fallback_chain(
    State(state): State<AppState>,
    Json(body): Json<ValueBody<Vec<String>>>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| r.fallback_chain = body.value) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

// ─── Provider priority ─────────────────────────────────────────────────────

/// GET /provider-priority
pub async fn get_provider_priority(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({"value": config.routing.provider_priority}))
}

/// PUT /provider-priority
pub async fn put_provider_priority(
    State(state): State<AppState>,
    Json(body): Json<ValueBody<HashMap<String, Vec<String>>>>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| r.provider_priority = body.value) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

/// GET /provider-priority/{model}
pub async fn get_provider_priority_model(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({
        "value": config.routing.provider_priority.get(&model).cloned().unwrap_or_default(),
    }))
}

/// PUT /provider-priority/{model}
pub async fn put_provider_priority_model(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(body): Json<ValueBody<Vec<String>>>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| {
        r.provider_priority.insert(model, body.value);
    }) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

/// DELETE /provider-priority/{model}
pub async fn delete_provider_priority_model(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| {
        r.provider_priority.remove(&model);
    }) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}

// ─── Provider order ────────────────────────────────────────────────────────

/// GET /provider-order
pub async fn get_provider_order(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.load();
    Json(json!({"value": config.routing.provider_order}))
}

/// PUT /provider-order
pub async fn put_provider_order(
    State(state): State<AppState>,
    Json(body): Json<ValueBody<Vec<String>>>,
) -> axum::response::Response {
    match apply_routing_update(&state, |r| r.provider_order = body.value) {
        Ok(()) => ok().into_response(),
        Err(e) => validation_failed(e).into_response(),
    }
}
