use crate::AppState;
use crate::dispatch::{DispatchRequest, dispatch};
use relay_core::error::ProxyError;
use relay_core::provider::Dialect;
use axum::extract::State;
use axum::response::IntoResponse;
use bytes::Bytes;
use serde_json::{Value, json};

/// OpenAI Responses API (/v1/responses). The request is reshaped onto the
/// chat pipeline and the completion is reshaped back.
pub async fn responses(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let chat_body = responses_to_chat_request(&body)?;
    let parsed = super::parse_request(&chat_body)?;

    if parsed.stream {
        return Err(ProxyError::NotImplemented("responses: stream".into()));
    }

    let response = dispatch(
        &state,
        DispatchRequest {
            source_dialect: Dialect::OpenAI,
            model: parsed.model,
            stream: false,
            body: chat_body,
        },
    )
    .await?;

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::Internal(format!("failed to read response body: {e}")))?;
    let reshaped = chat_to_responses_response(&bytes)?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        reshaped,
    )
        .into_response())
}

/// Convert a Responses API request body to Chat Completions shape.
fn responses_to_chat_request(body: &Bytes) -> Result<Bytes, ProxyError> {
    let mut val: Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;
    let obj = val
        .as_object_mut()
        .ok_or_else(|| ProxyError::BadRequest("expected JSON object".into()))?;

    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = obj.remove("instructions")
        && let Some(text) = instructions.as_str()
    {
        messages.push(json!({"role": "system", "content": text}));
    }

    match obj.remove("input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                messages.push(item);
            }
        }
        _ => return Err(ProxyError::BadRequest("missing input field".into())),
    }
    obj.insert("messages".to_string(), Value::Array(messages));

    if let Some(max) = obj.remove("max_output_tokens") {
        obj.insert("max_tokens".to_string(), max);
    }

    serde_json::to_vec(&val)
        .map(Bytes::from)
        .map_err(|e| ProxyError::Internal(e.to_string()))
}

/// Convert a Chat Completions response to Responses API shape.
fn chat_to_responses_response(body: &[u8]) -> Result<String, ProxyError> {
    let val: Value =
        serde_json::from_slice(body).map_err(|e| ProxyError::Internal(e.to_string()))?;

    let content = val
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let id = val.get("id").and_then(|i| i.as_str()).unwrap_or("");
    let model = val.get("model").and_then(|m| m.as_str()).unwrap_or("");
    let created = val.get("created").and_then(|c| c.as_u64()).unwrap_or(0);
    let status = match val
        .pointer("/choices/0/finish_reason")
        .and_then(|f| f.as_str())
    {
        Some("length") => "incomplete",
        _ => "completed",
    };

    let prompt_tokens = val
        .pointer("/usage/prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion_tokens = val
        .pointer("/usage/completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let out = json!({
        "id": format!("resp_{id}"),
        "object": "response",
        "created_at": created,
        "model": model,
        "status": status,
        "output": [{
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": content}],
        }],
        "usage": {
            "input_tokens": prompt_tokens,
            "output_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        }
    });

    serde_json::to_string(&out).map_err(|e| ProxyError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_reshaping() {
        let body = Bytes::from(
            json!({
                "model": "gpt-5.2",
                "instructions": "be brief",
                "input": "hello",
                "max_output_tokens": 50,
            })
            .to_string(),
        );
        let chat = responses_to_chat_request(&body).unwrap();
        let val: Value = serde_json::from_slice(&chat).unwrap();
        assert_eq!(val["messages"][0]["role"], "system");
        assert_eq!(val["messages"][1]["content"], "hello");
        assert_eq!(val["max_tokens"], 50);
        assert!(val.get("input").is_none());
    }

    #[test]
    fn test_response_reshaping() {
        let chat = json!({
            "id": "abc",
            "model": "gpt-5.2",
            "created": 1,
            "choices": [{"message": {"content": "out"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3},
        });
        let out = chat_to_responses_response(chat.to_string().as_bytes()).unwrap();
        let val: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(val["id"], "resp_abc");
        assert_eq!(val["status"], "completed");
        assert_eq!(val["output"][0]["content"][0]["text"], "out");
        assert_eq!(val["usage"]["total_tokens"], 5);
    }
}
