//! Gemini GenerateContent inbound over OpenAI-dialect upstreams.

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

    if let Some(system) = req
        .get("systemInstruction")
        .or_else(|| req.get("system_instruction"))
    {
        let text = collect_parts(system.get("parts"));
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    for content in req
        .get("contents")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ProxyError::Translation("missing contents field".to_string()))?
    {
        let role = match content.get("role").and_then(|r| r.as_str()) {
            Some("model") => "assistant",
            _ => "user",
        };
        messages.push(json!({
            "role": role,
            "content": collect_parts(content.get("parts")),
        }));
    }

    let mut openai_req = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(cfg) = req
        .get("generationConfig")
        .or_else(|| req.get("generation_config"))
    {
        if let Some(temp) = cfg.get("temperature") {
            openai_req["temperature"] = temp.clone();
        }
        if let Some(top_p) = cfg.get("topP") {
            openai_req["top_p"] = top_p.clone();
        }
        if let Some(max) = cfg.get("maxOutputTokens") {
            openai_req["max_tokens"] = max.clone();
        }
        if let Some(stop) = cfg.get("stopSequences") {
            openai_req["stop"] = stop.clone();
        }
    }
    if stream {
        openai_req["stream"] = Value::Bool(true);
    }

    serde_json::to_vec(&openai_req).map_err(|e| ProxyError::Translation(e.to_string()))
}

fn collect_parts(parts: Option<&Value>) -> String {
    parts
        .and_then(|p| p.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn map_finish_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "MAX_TOKENS",
        _ => "STOP",
    }
}

pub fn translate_non_stream(
    model: &str,
    _original_req: &[u8],
    data: &[u8],
) -> Result<String, ProxyError> {
    let resp: Value = serde_json::from_slice(data)?;

    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .cloned()
        .unwrap_or(Value::Null);
    let text = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let finish = map_finish_reason(choice.get("finish_reason").and_then(|v| v.as_str()));

    let prompt = resp
        .pointer("/usage/prompt_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let completion = resp
        .pointer("/usage/completion_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    let gemini_resp = json!({
        "candidates": [{
            "content": {"parts": [{"text": text}], "role": "model"},
            "finishReason": finish,
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": prompt,
            "candidatesTokenCount": completion,
            "totalTokenCount": prompt + completion,
        },
        "modelVersion": model,
    });

    serde_json::to_string(&gemini_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Translate one Chat Completions chunk into a Gemini streaming chunk.
pub fn translate_stream(
    model: &str,
    _original_req: &[u8],
    _event_type: Option<&str>,
    data: &[u8],
    state: &mut TranslateState,
) -> Result<Vec<String>, ProxyError> {
    let chunk: Value = serde_json::from_slice(data)?;

    let delta_text = chunk
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let finish = chunk
        .pointer("/choices/0/finish_reason")
        .and_then(|v| v.as_str());

    if let Some(usage) = chunk.get("usage")
        && let Some(prompt) = usage.get("prompt_tokens").and_then(|v| v.as_u64())
    {
        state.input_tokens = prompt;
    }

    if delta_text.is_empty() && finish.is_none() {
        return Ok(Vec::new());
    }

    let mut candidate = json!({
        "content": {"parts": [{"text": delta_text}], "role": "model"},
        "index": 0,
    });
    if let Some(f) = finish {
        candidate["finishReason"] = Value::String(map_finish_reason(Some(f)).to_string());
    }

    let mut out = json!({
        "candidates": [candidate],
        "modelVersion": model,
    });
    if finish.is_some() {
        let completion = chunk
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        out["usageMetadata"] = json!({
            "promptTokenCount": state.input_tokens,
            "candidatesTokenCount": completion,
            "totalTokenCount": state.input_tokens + completion,
        });
    }

    Ok(vec![out.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;

    #[test]
    fn test_request_translation() {
        let body = json!({
            "systemInstruction": {"parts": [{"text": "be helpful"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hello"}]},
                {"role": "model", "parts": [{"text": "hi"}]},
            ],
            "generationConfig": {"temperature": 0.5, "maxOutputTokens": 32},
        });
        let out = translate_request("gemini-2.0-flash", &serde_json::to_vec(&body).unwrap(), false)
            .unwrap();
        let val: Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(val["model"], "gemini-2.0-flash");
        assert_eq!(val["max_tokens"], 32);
        assert!(val.get("stream").is_none());
        assert_json_eq!(
            val["messages"],
            json!([
                {"role": "system", "content": "be helpful"},
                {"role": "user", "content": "hello"},
                {"role": "assistant", "content": "hi"},
            ])
        );
    }

    #[test]
    fn test_non_stream_translation() {
        let resp = json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "answer"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 3},
        });
        let out = translate_non_stream("gemini-2.0-flash", b"{}", &serde_json::to_vec(&resp).unwrap())
            .unwrap();
        let val: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(val["candidates"][0]["content"]["parts"][0]["text"], "answer");
        assert_eq!(val["candidates"][0]["finishReason"], "STOP");
        assert_eq!(val["usageMetadata"]["totalTokenCount"], 10);
    }

    #[test]
    fn test_stream_translation_skips_empty_chunks() {
        let mut state = TranslateState::default();
        let empty = json!({"choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]});
        let out = translate_stream(
            "g",
            b"{}",
            None,
            &serde_json::to_vec(&empty).unwrap(),
            &mut state,
        )
        .unwrap();
        assert!(out.is_empty());

        let final_chunk = json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 2, "completion_tokens": 5},
        });
        let out = translate_stream(
            "g",
            b"{}",
            None,
            &serde_json::to_vec(&final_chunk).unwrap(),
            &mut state,
        )
        .unwrap();
        let val: Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(val["candidates"][0]["finishReason"], "MAX_TOKENS");
        assert_eq!(val["usageMetadata"]["totalTokenCount"], 7);
    }
}
