use crate::AppState;
use crate::dispatch::{DispatchRequest, dispatch};
use relay_core::error::ProxyError;
use relay_core::provider::Dialect;
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use serde_json::Value;

/// Legacy completions endpoint. The prompt is folded into a single user
/// message and the request rides the chat pipeline.
pub async fn completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let mut val: Value =
        serde_json::from_slice(&body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    let obj = val
        .as_object_mut()
        .ok_or_else(|| ProxyError::BadRequest("expected JSON object".into()))?;

    if let Some(prompt) = obj.remove("prompt") {
        let text = match prompt {
            Value::String(s) => s,
            Value::Array(parts) => parts
                .iter()
                .filter_map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        };
        obj.insert(
            "messages".to_string(),
            serde_json::json!([{"role": "user", "content": text}]),
        );
    }

    let body = Bytes::from(serde_json::to_vec(&val).map_err(ProxyError::from)?);
    let parsed = super::parse_request(&body)?;

    dispatch(
        &state,
        DispatchRequest {
            source_dialect: Dialect::OpenAI,
            model: parsed.model,
            stream: parsed.stream,
            body,
        },
    )
    .await
}
