pub mod anthropic;
pub mod gemini;

use relay_core::error::ProxyError;
use relay_core::provider::Dialect;
use std::collections::HashMap;

/// State accumulated during stream translation.
#[derive(Debug, Default)]
pub struct TranslateState {
    pub response_id: String,
    pub model: String,
    pub created: i64,
    pub current_content_index: i32,
    pub message_started: bool,
    pub content_block_open: bool,
    pub input_tokens: u64,
}

pub type RequestTransformFn =
    fn(model: &str, raw_json: &[u8], stream: bool) -> Result<Vec<u8>, ProxyError>;

pub type StreamTransformFn = fn(
    model: &str,
    original_req: &[u8],
    event_type: Option<&str>,
    data: &[u8],
    state: &mut TranslateState,
) -> Result<Vec<String>, ProxyError>;

pub type NonStreamTransformFn =
    fn(model: &str, original_req: &[u8], data: &[u8]) -> Result<String, ProxyError>;

pub struct ResponseTransform {
    pub stream: StreamTransformFn,
    pub non_stream: NonStreamTransformFn,
}

/// Opaque codec between inbound and upstream dialects.
///
/// Request transforms are keyed `(source, target)` and rewrite the inbound
/// body into the upstream's native dialect; the paired response transforms
/// rewrite upstream bodies and SSE lines back to the source dialect.
pub struct TranslatorRegistry {
    requests: HashMap<(Dialect, Dialect), RequestTransformFn>,
    responses: HashMap<(Dialect, Dialect), ResponseTransform>,
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            responses: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        from: Dialect,
        to: Dialect,
        request: RequestTransformFn,
        response: ResponseTransform,
    ) {
        self.requests.insert((from, to), request);
        self.responses.insert((from, to), response);
    }

    pub fn translate_request(
        &self,
        from: Dialect,
        to: Dialect,
        model: &str,
        raw_json: &[u8],
        stream: bool,
    ) -> Result<Vec<u8>, ProxyError> {
        if from == to {
            // Passthrough still rewrites the model (routing may have picked a
            // fallback).
            return relay_core::model::rewrite_model_field(raw_json, model)
                .ok_or_else(|| ProxyError::Translation("payload is not a JSON object".into()));
        }
        match self.requests.get(&(from, to)) {
            Some(f) => f(model, raw_json, stream),
            None => Ok(raw_json.to_vec()),
        }
    }

    pub fn translate_stream(
        &self,
        from: Dialect,
        to: Dialect,
        model: &str,
        orig_req: &[u8],
        event_type: Option<&str>,
        data: &[u8],
        state: &mut TranslateState,
    ) -> Result<Vec<String>, ProxyError> {
        if from == to {
            return Ok(vec![String::from_utf8_lossy(data).to_string()]);
        }
        match self.responses.get(&(from, to)) {
            Some(rt) => (rt.stream)(model, orig_req, event_type, data, state),
            None => Ok(vec![String::from_utf8_lossy(data).to_string()]),
        }
    }

    pub fn translate_non_stream(
        &self,
        from: Dialect,
        to: Dialect,
        model: &str,
        orig_req: &[u8],
        data: &[u8],
    ) -> Result<String, ProxyError> {
        if from == to {
            return Ok(String::from_utf8_lossy(data).to_string());
        }
        match self.responses.get(&(from, to)) {
            Some(rt) => (rt.non_stream)(model, orig_req, data),
            None => Ok(String::from_utf8_lossy(data).to_string()),
        }
    }

    pub fn has_response_translator(&self, from: Dialect, to: Dialect) -> bool {
        from != to && self.responses.contains_key(&(from, to))
    }
}

pub fn build_registry() -> TranslatorRegistry {
    let mut reg = TranslatorRegistry::new();

    // Anthropic inbound over OpenAI-dialect upstreams
    reg.register(
        Dialect::Anthropic,
        Dialect::OpenAI,
        anthropic::translate_request,
        ResponseTransform {
            stream: anthropic::translate_stream,
            non_stream: anthropic::translate_non_stream,
        },
    );

    // Gemini inbound over OpenAI-dialect upstreams
    reg.register(
        Dialect::Gemini,
        Dialect::OpenAI,
        gemini::translate_request,
        ResponseTransform {
            stream: gemini::translate_stream,
            non_stream: gemini::translate_non_stream,
        },
    );

    reg
}
