pub mod admin;
pub mod chat_completions;
pub mod completions;
pub mod gemini;
pub mod health;
pub mod messages;
pub mod models;
pub mod responses;

use relay_core::error::ProxyError;
use bytes::Bytes;

pub(crate) struct ParsedRequest {
    pub model: String,
    pub stream: bool,
}

pub(crate) fn parse_request(body: &Bytes) -> Result<ParsedRequest, ProxyError> {
    let req_value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let model = req_value
        .get("model")
        .and_then(|m| m.as_str())
        .ok_or_else(|| ProxyError::BadRequest("missing model field".into()))?
        .to_string();

    let stream = req_value
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    Ok(ParsedRequest { model, stream })
}
