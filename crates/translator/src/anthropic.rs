//! Anthropic Messages inbound over OpenAI-dialect upstreams.
//!
//! `translate_request` rewrites a Messages body into a Chat Completions
//! body; the response half maps Chat Completions bodies and chunks back to
//! Messages responses and SSE events.

use crate::TranslateState;
use relay_core::error::ProxyError;
use serde_json::{Value, json};

pub fn translate_request(
    model: &str,
    raw_json: &[u8],
    stream: bool,
) -> Result<Vec<u8>, ProxyError> {
    let req: Value = serde_json::from_slice(raw_json)?;

    let mut messages: Vec<Value> = Vec::new();

    // system: string or content-block array, becomes the leading system message
    if let Some(system) = req.get("system") {
        let text = match system {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n\n"),
            _ => String::new(),
        };
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    for msg in req
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| ProxyError::Translation("missing messages field".to_string()))?
    {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        let content = flatten_content(msg.get("content"));
        messages.push(json!({"role": role, "content": content}));
    }

    let mut openai_req = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(max_tokens) = req.get("max_tokens") {
        openai_req["max_tokens"] = max_tokens.clone();
    }
    if let Some(temp) = req.get("temperature") {
        openai_req["temperature"] = temp.clone();
    }
    if let Some(top_p) = req.get("top_p") {
        openai_req["top_p"] = top_p.clone();
    }
    if let Some(stop) = req.get("stop_sequences") {
        openai_req["stop"] = stop.clone();
    }
    if stream {
        openai_req["stream"] = Value::Bool(true);
    }

    serde_json::to_vec(&openai_req).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Collapse a Messages content value (string or block array) into plain text.
fn flatten_content(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| {
                match b.get("type").and_then(|t| t.as_str()) {
                    Some("text") => b.get("text").and_then(|t| t.as_str()).map(str::to_string),
                    Some("tool_result") => b
                        .get("content")
                        .and_then(|c| c.as_str())
                        .map(str::to_string),
                    _ => None,
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn map_stop_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        _ => "end_turn",
    }
}

pub fn translate_non_stream(
    model: &str,
    _original_req: &[u8],
    data: &[u8],
) -> Result<String, ProxyError> {
    let resp: Value = serde_json::from_slice(data)?;

    let id = format!(
        "msg_{}",
        resp.get("id").and_then(|v| v.as_str()).unwrap_or("unknown")
    );
    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .cloned()
        .unwrap_or(Value::Null);
    let text = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let stop_reason = map_stop_reason(choice.get("finish_reason").and_then(|v| v.as_str()));

    let input_tokens = resp
        .pointer("/usage/prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = resp
        .pointer("/usage/completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let message = json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
        }
    });

    serde_json::to_string(&message).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Translate one Chat Completions chunk into zero or more Messages SSE
/// events. Each output line is `event: <type>\ndata: <json>`.
pub fn translate_stream(
    model: &str,
    _original_req: &[u8],
    _event_type: Option<&str>,
    data: &[u8],
    state: &mut TranslateState,
) -> Result<Vec<String>, ProxyError> {
    let chunk: Value = serde_json::from_slice(data)?;
    let mut out = Vec::new();

    if !state.message_started {
        state.message_started = true;
        state.response_id = format!(
            "msg_{}",
            chunk
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
        );
        state.model = model.to_string();
        let start = json!({
            "type": "message_start",
            "message": {
                "id": state.response_id,
                "type": "message",
                "role": "assistant",
                "model": state.model,
                "content": [],
                "stop_reason": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }
        });
        out.push(sse_event("message_start", &start));
    }

    let delta_text = chunk
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !delta_text.is_empty() {
        if !state.content_block_open {
            state.content_block_open = true;
            let start = json!({
                "type": "content_block_start",
                "index": state.current_content_index,
                "content_block": {"type": "text", "text": ""},
            });
            out.push(sse_event("content_block_start", &start));
        }
        let delta = json!({
            "type": "content_block_delta",
            "index": state.current_content_index,
            "delta": {"type": "text_delta", "text": delta_text},
        });
        out.push(sse_event("content_block_delta", &delta));
    }

    if let Some(usage) = chunk.get("usage")
        && let Some(prompt) = usage.get("prompt_tokens").and_then(|v| v.as_u64())
    {
        state.input_tokens = prompt;
    }

    if let Some(finish) = chunk
        .pointer("/choices/0/finish_reason")
        .and_then(|v| v.as_str())
    {
        if state.content_block_open {
            state.content_block_open = false;
            let stop = json!({
                "type": "content_block_stop",
                "index": state.current_content_index,
            });
            out.push(sse_event("content_block_stop", &stop));
            state.current_content_index += 1;
        }
        let output_tokens = chunk
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let delta = json!({
            "type": "message_delta",
            "delta": {"stop_reason": map_stop_reason(Some(finish)), "stop_sequence": null},
            "usage": {"input_tokens": state.input_tokens, "output_tokens": output_tokens},
        });
        out.push(sse_event("message_delta", &delta));
        out.push(sse_event("message_stop", &json!({"type": "message_stop"})));
    }

    Ok(out)
}

fn sse_event(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;

    #[test]
    fn test_request_translation() {
        let body = json!({
            "model": "claude-sonnet",
            "system": "be terse",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": [{"type": "text", "text": "hi"}]},
            ],
            "stop_sequences": ["END"],
        });
        let out =
            translate_request("upstream-model", &serde_json::to_vec(&body).unwrap(), true).unwrap();
        let val: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(val["model"], "upstream-model");
        assert_eq!(val["stream"], true);
        assert_eq!(val["max_tokens"], 64);
        assert_json_eq!(
            val["messages"],
            json!([
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi"},
            ])
        );
        assert_json_eq!(val["stop"], json!(["END"]));
    }

    #[test]
    fn test_non_stream_translation() {
        let resp = json!({
            "id": "abc",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "result"},
                "finish_reason": "length",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2},
        });
        let out =
            translate_non_stream("claude-x", b"{}", &serde_json::to_vec(&resp).unwrap()).unwrap();
        let val: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(val["id"], "msg_abc");
        assert_eq!(val["stop_reason"], "max_tokens");
        assert_eq!(val["content"][0]["text"], "result");
        assert_eq!(val["usage"]["input_tokens"], 10);
    }

    #[test]
    fn test_stream_emits_message_lifecycle() {
        let mut state = TranslateState::default();

        let first = json!({
            "id": "abc",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "he"}, "finish_reason": null}],
        });
        let events = translate_stream(
            "claude-x",
            b"{}",
            None,
            &serde_json::to_vec(&first).unwrap(),
            &mut state,
        )
        .unwrap();
        assert!(events[0].starts_with("event: message_start"));
        assert!(events[1].starts_with("event: content_block_start"));
        assert!(events[2].starts_with("event: content_block_delta"));

        let last = json!({
            "id": "abc",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 9},
        });
        let events = translate_stream(
            "claude-x",
            b"{}",
            None,
            &serde_json::to_vec(&last).unwrap(),
            &mut state,
        )
        .unwrap();
        let joined = events.join("\n");
        assert!(joined.contains("content_block_stop"));
        assert!(joined.contains("message_delta"));
        assert!(joined.contains("\"end_turn\""));
        assert!(joined.contains("message_stop"));
    }
}
