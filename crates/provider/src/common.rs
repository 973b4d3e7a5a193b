use crate::sse::parse_sse_stream;
use bytes::Bytes;
use relay_core::auth::Auth;
use relay_core::error::ProxyError;
use relay_core::provider::{ExecOptions, StreamChunk, StreamResult};
use relay_core::transport::TransportPool;
use relay_core::usage::Usage;
use std::collections::HashMap;
use tokio_stream::StreamExt;

/// Attribute keys with this prefix are applied verbatim as request headers.
pub const HEADER_ATTR_PREFIX: &str = "header:";

/// Fetch the pooled HTTP client for a credential. Resolution priority:
/// credential proxy, then global proxy, then direct.
pub fn client_for(
    pool: &TransportPool,
    auth: &Auth,
    global_proxy: Option<&str>,
) -> reqwest::Client {
    pool.client(auth.effective_proxy(global_proxy))
}

/// Apply user-configured custom headers from the credential's attributes.
pub fn apply_auth_headers(
    mut req: reqwest::RequestBuilder,
    auth: &Auth,
) -> reqwest::RequestBuilder {
    for (key, value) in &auth.attributes {
        if let Some(name) = key.strip_prefix(HEADER_ATTR_PREFIX) {
            req = req.header(name, value.as_str());
        }
    }
    req
}

/// Structural edits before the upstream call: pin the normalized model, match
/// the `stream` flag to the call mode, and opt into streamed usage totals
/// where the provider supports them.
pub fn finalize_payload(
    payload: &[u8],
    model: &str,
    stream: bool,
    include_usage: bool,
) -> Result<Vec<u8>, ProxyError> {
    let mut val: serde_json::Value = serde_json::from_slice(payload)?;
    let obj = val
        .as_object_mut()
        .ok_or_else(|| ProxyError::Translation("payload is not a JSON object".into()))?;

    obj.insert(
        "model".to_string(),
        serde_json::Value::String(model.to_string()),
    );
    obj.insert("stream".to_string(), serde_json::Value::Bool(stream));
    if stream && include_usage {
        obj.insert(
            "stream_options".to_string(),
            serde_json::json!({"include_usage": true}),
        );
    } else {
        obj.remove("stream_options");
    }

    serde_json::to_vec(&val).map_err(|e| ProxyError::Translation(e.to_string()))
}

pub fn log_outbound(provider: &str, auth: &Auth, method: &str, url: &str, model: &str, body: &[u8]) {
    tracing::debug!(
        provider,
        auth = %auth.log_tag(),
        method,
        url,
        model,
        body_bytes = body.len(),
        "outbound request"
    );
}

pub fn extract_headers(resp: &reqwest::Response) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (key, value) in resp.headers().iter() {
        if let Ok(v) = value.to_str() {
            headers.insert(key.as_str().to_string(), v.to_string());
        }
    }
    headers
}

/// Parse the `Retry-After` header value as integer seconds.
pub fn parse_retry_after(headers: &HashMap<String, String>) -> Option<u64> {
    headers.get("retry-after").and_then(|v| v.parse::<u64>().ok())
}

pub fn missing_credential(provider: &str) -> ProxyError {
    ProxyError::Unauthorized(format!("no usable credential secret for {provider}"))
}

/// Handle a non-streaming response: check status, publish usage, and echo the
/// caller's requested model back into the body when one was recorded.
pub async fn handle_response(
    resp: reqwest::Response,
    opts: &ExecOptions,
) -> Result<(Bytes, HashMap<String, String>), ProxyError> {
    let status = resp.status().as_u16();
    let headers = extract_headers(&resp);
    let body = resp.bytes().await?;

    if !(200..300).contains(&status) {
        opts.usage.publish_failure();
        return Err(ProxyError::Upstream {
            status,
            body: String::from_utf8_lossy(&body).to_string(),
            retry_after_secs: parse_retry_after(&headers),
        });
    }

    if let Ok(val) = serde_json::from_slice::<serde_json::Value>(&body) {
        if let Some(usage) = Usage::from_payload(&val) {
            opts.usage.ensure_published(usage);
        }
        if let Some(requested) = requested_model(opts)
            && val.get("model").is_some()
            && let Some(rewritten) = relay_core::model::rewrite_model_field(&body, &requested)
        {
            return Ok((Bytes::from(rewritten), headers));
        }
    }

    Ok((body, headers))
}

/// Handle a streaming response: check status, then hand back the lazy SSE
/// chunk stream. Blank and comment lines are dropped by the parser; the
/// `[DONE]` sentinel is consumed here; usage details are published as they
/// appear.
pub async fn handle_stream_response(
    resp: reqwest::Response,
    opts: &ExecOptions,
) -> Result<StreamResult, ProxyError> {
    let status = resp.status().as_u16();
    let headers = extract_headers(&resp);

    if !(200..300).contains(&status) {
        let body = resp.bytes().await?;
        opts.usage.publish_failure();
        return Err(ProxyError::Upstream {
            status,
            body: String::from_utf8_lossy(&body).to_string(),
            retry_after_secs: parse_retry_after(&headers),
        });
    }

    let stream = chunk_stream(parse_sse_stream(resp.bytes_stream()), opts);
    Ok(StreamResult {
        headers,
        stream: Box::pin(stream),
    })
}

/// Map parsed SSE events into chunks: drop the `[DONE]` sentinel, publish
/// usage details as they appear, echo the caller's requested model into each
/// chunk, and publish the empty fallback usage when the upstream closes
/// without having reported any. Every successful stream publishes exactly
/// once.
fn chunk_stream(
    events: impl tokio_stream::Stream<Item = Result<crate::sse::SseEvent, ProxyError>>
    + Send
    + 'static,
    opts: &ExecOptions,
) -> impl tokio_stream::Stream<Item = Result<StreamChunk, ProxyError>> + Send + 'static {
    let usage = opts.usage.clone();
    let requested = requested_model(opts);

    let mapped = events.filter_map(move |result| match result {
        Ok(event) => {
            if event.data == "[DONE]" {
                return None;
            }
            let mut data = event.data;
            if let Ok(mut val) = serde_json::from_str::<serde_json::Value>(&data) {
                if let Some(parsed) = Usage::from_payload(&val) {
                    usage.ensure_published(parsed);
                }
                if let Some(ref requested) = requested
                    && let Some(obj) = val.as_object_mut()
                    && obj.contains_key("model")
                {
                    obj.insert(
                        "model".to_string(),
                        serde_json::Value::String(requested.clone()),
                    );
                    data = val.to_string();
                }
            }
            Some(Ok(StreamChunk {
                event_type: event.event,
                data,
            }))
        }
        Err(e) => {
            usage.publish_failure();
            Some(Err(e))
        }
    });

    // Providers that never report usage in-stream still publish once when
    // the upstream closes cleanly.
    let finished = opts.usage.clone();
    mapped.chain(futures::stream::poll_fn(move |_| {
        if !finished.is_failed() {
            finished.ensure_published(Usage::default());
        }
        std::task::Poll::Ready(None)
    }))
}

fn requested_model(opts: &ExecOptions) -> Option<String> {
    opts.metadata
        .get("requested_model")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Build model descriptors from a credential's configured model list.
pub fn models_from_auth(auth: &Auth, kind: &str, owned_by: &str) -> Vec<relay_core::registry::ModelDescriptor> {
    auth.metadata
        .get("models")
        .and_then(|v| v.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.as_str())
                .map(|id| {
                    let mut desc = relay_core::registry::ModelDescriptor::new(id, kind);
                    desc.owned_by = owned_by.to_string();
                    desc
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_payload_sets_stream_fields() {
        let out = finalize_payload(br#"{"model":"a","messages":[]}"#, "b", true, true).unwrap();
        let val: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(val["model"], "b");
        assert_eq!(val["stream"], true);
        assert_eq!(val["stream_options"]["include_usage"], true);

        let out = finalize_payload(&out, "b", false, false).unwrap();
        let val: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(val["stream"], false);
        assert!(val.get("stream_options").is_none());
    }

    #[test]
    fn test_header_attributes() {
        let mut auth = Auth::new("a".into(), "a".into(), "ampcode".into());
        auth.attributes
            .insert("header:x-custom".into(), "v".into());
        auth.attributes.insert("token".into(), "secret".into());
        // Only the prefixed key becomes a header; plain attributes stay out
        // of the wire. Exercised indirectly through the builder type.
        let keys: Vec<_> = auth
            .attributes
            .keys()
            .filter(|k| k.starts_with(HEADER_ATTR_PREFIX))
            .collect();
        assert_eq!(keys, vec!["header:x-custom"]);
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HashMap::new();
        headers.insert("retry-after".to_string(), "30".to_string());
        assert_eq!(parse_retry_after(&headers), Some(30));
        headers.insert("retry-after".to_string(), "Wed, 21 Oct".to_string());
        assert_eq!(parse_retry_after(&headers), None);
    }

    use crate::sse::SseEvent;
    use relay_core::metrics::Metrics;
    use relay_core::usage::UsageReporter;
    use std::sync::Arc;

    fn stream_opts(requested_model: Option<&str>) -> ExecOptions {
        let mut metadata = HashMap::new();
        if let Some(model) = requested_model {
            metadata.insert(
                "requested_model".to_string(),
                serde_json::Value::String(model.to_string()),
            );
        }
        ExecOptions {
            original_request: bytes::Bytes::from_static(b"{}"),
            metadata,
            usage: Arc::new(UsageReporter::new(
                "ampcode",
                "a-1",
                "test/gpt-5.2",
                Arc::new(Metrics::new()),
            )),
            timeout: None,
        }
    }

    fn data_event(data: &str) -> Result<SseEvent, relay_core::error::ProxyError> {
        Ok(SseEvent {
            event: None,
            data: data.to_string(),
        })
    }

    #[tokio::test]
    async fn test_chunk_stream_echoes_requested_model_and_drops_done() {
        let opts = stream_opts(Some("gpt-5.2(xhigh)"));
        let events = futures::stream::iter(vec![
            data_event(r#"{"model":"test/gpt-5.2","choices":[{"delta":{"content":"x"}}]}"#),
            data_event("[DONE]"),
        ]);

        let chunks: Vec<_> = tokio_stream::StreamExt::collect::<Vec<_>>(Box::pin(
            chunk_stream(events, &opts),
        ))
        .await;
        assert_eq!(chunks.len(), 1);
        let val: serde_json::Value =
            serde_json::from_str(&chunks[0].as_ref().unwrap().data).unwrap();
        assert_eq!(val["model"], "gpt-5.2(xhigh)");
    }

    #[tokio::test]
    async fn test_chunk_stream_publishes_fallback_usage_on_clean_close() {
        let opts = stream_opts(None);
        let events = futures::stream::iter(vec![data_event(r#"{"choices":[]}"#)]);

        let usage = opts.usage.clone();
        let _chunks: Vec<_> = tokio_stream::StreamExt::collect::<Vec<_>>(Box::pin(
            chunk_stream(events, &opts),
        ))
        .await;
        assert!(usage.is_published());
        assert!(!usage.is_failed());
    }

    #[tokio::test]
    async fn test_chunk_stream_keeps_reported_usage_over_fallback() {
        let opts = stream_opts(None);
        let metrics = Arc::new(Metrics::new());
        let opts = ExecOptions {
            usage: Arc::new(UsageReporter::new("kilocode", "k-1", "glm-4.5", metrics.clone())),
            ..opts
        };
        let events = futures::stream::iter(vec![data_event(
            r#"{"choices":[],"usage":{"prompt_tokens":4,"completion_tokens":6}}"#,
        )]);

        let _chunks: Vec<_> = tokio_stream::StreamExt::collect::<Vec<_>>(Box::pin(
            chunk_stream(events, &opts),
        ))
        .await;
        // The in-stream numbers win; the close-time fallback is a no-op
        assert_eq!(metrics.snapshot()["total_prompt_tokens"], 4);
        assert_eq!(metrics.snapshot()["total_completion_tokens"], 6);
    }

    #[tokio::test]
    async fn test_chunk_stream_failure_suppresses_fallback_publish() {
        let opts = stream_opts(None);
        let events = futures::stream::iter(vec![
            data_event(r#"{"choices":[]}"#),
            Err(relay_core::error::ProxyError::Network("reset".into())),
        ]);

        let usage = opts.usage.clone();
        let chunks: Vec<_> = tokio_stream::StreamExt::collect::<Vec<_>>(Box::pin(
            chunk_stream(events, &opts),
        ))
        .await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_err());
        assert!(usage.is_failed());
        assert!(!usage.is_published());
    }
}
