use crate::common;
use async_trait::async_trait;
use futures::StreamExt;
use relay_core::auth::Auth;
use relay_core::error::ProxyError;
use relay_core::model::split_reasoning_suffix;
use relay_core::provider::*;
use relay_core::registry::ModelDescriptor;
use relay_core::transport::TransportPool;
use serde_json::{Value, json};
use std::sync::Arc;

const DEFAULT_HOST: &str = "https://trae-api-sg.mchost.guru";
const CHAT_ENDPOINT: &str = "/api/ide/v1/chat";
const IDE_VERSION: &str = "1.2.10";
const IDE_VERSION_CODE: &str = "20250325";

pub struct TraeExecutor {
    pool: Arc<TransportPool>,
    global_proxy: Option<String>,
}

/// Reassembly state for reasoning output. A stream never opens a second
/// think block.
struct ThinkState {
    model: String,
    response_id: String,
    created: i64,
    think_open: bool,
    think_closed: bool,
    errored: bool,
}

impl ThinkState {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            think_open: false,
            think_closed: false,
            errored: false,
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> StreamChunk {
        let data = json!({
            "id": self.response_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        StreamChunk {
            event_type: None,
            data: data.to_string(),
        }
    }
}

/// Convert one upstream `output`/`done` event into OpenAI-style chunks,
/// wrapping reasoning content in a single `<think>` block.
fn convert_event(
    event_type: Option<&str>,
    data: &str,
    state: &mut ThinkState,
) -> Result<Vec<StreamChunk>, ProxyError> {
    if event_type == Some("done") {
        return Ok(vec![state.chunk(json!({}), Some("stop"))]);
    }

    let val: Value = serde_json::from_str(data)
        .map_err(|e| ProxyError::Stream(format!("malformed output event: {e}")))?;
    let mut out = Vec::new();

    let reasoning = val
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if !reasoning.is_empty() {
        let text = if state.think_open {
            reasoning.to_string()
        } else {
            state.think_open = true;
            format!("<think>\n\n{reasoning}")
        };
        out.push(state.chunk(json!({"content": text}), None));
    }

    let response = val.get("response").and_then(|v| v.as_str()).unwrap_or("");
    if !response.is_empty() {
        let text = if state.think_open && !state.think_closed {
            state.think_closed = true;
            format!("</think>\n\n{response}")
        } else {
            response.to_string()
        };
        out.push(state.chunk(json!({"content": text}), None));
    }

    if let Some(finish) = val.get("finish_reason").and_then(|v| v.as_str())
        && !finish.is_empty()
    {
        out.push(state.chunk(json!({}), Some(finish)));
    }

    Ok(out)
}

impl TraeExecutor {
    pub fn new(pool: Arc<TransportPool>, global_proxy: Option<String>) -> Self {
        Self { pool, global_proxy }
    }

    fn host(auth: &Auth) -> String {
        auth.attributes
            .get("base_url")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    fn token(&self, auth: &Auth) -> Result<String, ProxyError> {
        auth.secret(&["ide_token", "token"])
            .ok_or_else(|| common::missing_credential(self.identifier()))
    }
}

#[async_trait]
impl ProviderExecutor for TraeExecutor {
    fn identifier(&self) -> &'static str {
        "trae"
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAI
    }

    fn default_base_url(&self) -> &str {
        DEFAULT_HOST
    }

    fn prepare_request(
        &self,
        request: &mut ProviderRequest,
        auth: &Auth,
    ) -> Result<(), ProxyError> {
        self.token(auth)?;
        let (model, _suffix) = split_reasoning_suffix(&request.model);
        let model = model.to_string();
        // The IDE endpoint always answers over SSE
        request.payload = common::finalize_payload(&request.payload, &model, true, false)?.into();
        request.model = model;
        Ok(())
    }

    fn http_request(
        &self,
        auth: &Auth,
        request: &ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<reqwest::RequestBuilder, ProxyError> {
        let token = self.token(auth)?;
        let url = format!("{}{CHAT_ENDPOINT}", Self::host(auth));
        common::log_outbound(
            self.identifier(),
            auth,
            "POST",
            &url,
            &request.model,
            &request.payload,
        );

        let app_id = auth
            .attributes
            .get("app_id")
            .map(String::as_str)
            .unwrap_or("trae");

        let client = common::client_for(&self.pool, auth, self.global_proxy.as_deref());
        let mut req = client
            .post(&url)
            .header("content-type", "application/json")
            .header("x-app-id", app_id)
            .header("x-ide-version", IDE_VERSION)
            .header("x-ide-version-code", IDE_VERSION_CODE)
            .header("x-ide-version-type", "stable")
            .header("x-ide-token", token)
            .body(request.payload.to_vec());
        // Device identity headers are configured per credential
        for (key, value) in &auth.attributes {
            if key.starts_with("x-device-") {
                req = req.header(key.as_str(), value.as_str());
            }
        }
        req = common::apply_auth_headers(req, auth);
        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }
        Ok(req)
    }

    async fn execute(
        &self,
        auth: &Auth,
        request: ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<ProviderResponse, ProxyError> {
        // The upstream only streams; a unary call drains the stream and
        // assembles one completion body.
        let model = request.model.clone();
        let result = self.execute_stream(auth, request, opts).await?;
        let mut stream = result.stream;

        let mut content = String::new();
        let mut finish_reason = "stop".to_string();
        let mut id = String::new();
        let mut created = chrono::Utc::now().timestamp();

        while let Some(item) = stream.next().await {
            let chunk = item?;
            let val: Value = serde_json::from_str(&chunk.data)?;
            if let Some(chunk_id) = val.get("id").and_then(|v| v.as_str()) {
                id = chunk_id.to_string();
            }
            if let Some(ts) = val.get("created").and_then(|v| v.as_i64()) {
                created = ts;
            }
            if let Some(text) = val.pointer("/choices/0/delta/content").and_then(|v| v.as_str()) {
                content.push_str(text);
            }
            if let Some(finish) = val.pointer("/choices/0/finish_reason").and_then(|v| v.as_str()) {
                finish_reason = finish.to_string();
            }
        }

        let body = json!({
            "id": id,
            "object": "chat.completion",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason,
            }],
        });

        Ok(ProviderResponse {
            payload: bytes::Bytes::from(body.to_string()),
            headers: result.headers,
        })
    }

    async fn execute_stream(
        &self,
        auth: &Auth,
        request: ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<StreamResult, ProxyError> {
        let mut request = request;
        request.stream = true;
        self.prepare_request(&mut request, auth)?;
        let req = self.http_request(auth, &request, opts)?;
        let upstream = common::handle_stream_response(req.send().await?, opts).await?;

        let state = ThinkState::new(&request.model);
        let mapped = futures::stream::unfold(
            (upstream.stream, state),
            |(mut inner, mut state)| async move {
                if state.errored {
                    return None;
                }
                match inner.next().await {
                    Some(Ok(chunk)) => {
                        let items: Vec<Result<StreamChunk, ProxyError>> =
                            match convert_event(chunk.event_type.as_deref(), &chunk.data, &mut state)
                            {
                                Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                                Err(e) => {
                                    state.errored = true;
                                    vec![Err(e)]
                                }
                            };
                        Some((items, (inner, state)))
                    }
                    Some(Err(e)) => {
                        state.errored = true;
                        Some((vec![Err(e)], (inner, state)))
                    }
                    None => None,
                }
            },
        )
        .map(futures::stream::iter)
        .flatten();

        Ok(StreamResult {
            headers: upstream.headers,
            stream: Box::pin(mapped),
        })
    }

    // refresh is not available for IDE tokens; the default NotImplemented
    // applies.

    fn supported_models(&self, auth: &Auth) -> Vec<ModelDescriptor> {
        common::models_from_auth(auth, self.identifier(), "trae")
    }
}
