use crate::AppState;
use crate::dispatch::{DispatchRequest, dispatch};
use relay_core::error::ProxyError;
use relay_core::provider::Dialect;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use bytes::Bytes;

/// Gemini GenerateContent surface:
/// `POST /v1beta/models/{model}:generateContent` and
/// `:streamGenerateContent`. The model and action share one path segment.
pub async fn generate_content(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let (model, action) = model_action
        .split_once(':')
        .ok_or_else(|| ProxyError::BadRequest("expected model:action path".into()))?;

    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return Err(ProxyError::BadRequest(format!(
                "unsupported action: {other}"
            )));
        }
    };

    dispatch(
        &state,
        DispatchRequest {
            source_dialect: Dialect::Gemini,
            model: model.to_string(),
            stream,
            body,
        },
    )
    .await
}
