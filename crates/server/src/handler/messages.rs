use crate::AppState;
use crate::dispatch::{DispatchRequest, dispatch};
use relay_core::error::ProxyError;
use relay_core::provider::Dialect;
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;

/// Anthropic Messages API (/v1/messages).
pub async fn messages(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let parsed = super::parse_request(&body)?;

    dispatch(
        &state,
        DispatchRequest {
            source_dialect: Dialect::Anthropic,
            model: parsed.model,
            stream: parsed.stream,
            body,
        },
    )
    .await
}
