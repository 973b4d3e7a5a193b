use crate::AppState;
use relay_core::error::ProxyError;
use axum::{Json, extract::State, response::IntoResponse};

/// OpenAI-style model listing built from the registry snapshot.
pub async fn list_models(State(state): State<AppState>) -> Result<impl IntoResponse, ProxyError> {
    let created = chrono::Utc::now().timestamp();

    let data: Vec<serde_json::Value> = state
        .registry
        .models()
        .into_iter()
        .map(|m| {
            serde_json::json!({
                "id": m.id,
                "object": "model",
                "created": created,
                "owned_by": m.owned_by,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "object": "list",
        "data": data,
    })))
}
