use crate::AppState;
use crate::streaming::build_sse_response;
use bytes::Bytes;
use relay_core::config::{ModelMapping, RetryConfig};
use relay_core::error::ProxyError;
use relay_core::model::{split_reasoning_suffix, with_reasoning_suffix};
use relay_core::provider::{Dialect, ExecOptions, ProviderRequest, StreamChunk};
use relay_core::usage::{Usage, UsageReporter};
use relay_provider::routing::Attempt;
use relay_translator::TranslateState;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A dispatch request: everything needed to route and execute one API call.
pub struct DispatchRequest {
    /// Wire format of the incoming request.
    pub source_dialect: Dialect,
    /// The requested model name, exactly as the caller spelled it.
    pub model: String,
    /// Whether the client requested streaming.
    pub stream: bool,
    /// The raw request body.
    pub body: Bytes,
}

/// Walk the routing engine's attempt list until one attempt succeeds.
///
/// Retryable failures (401/403/429/5xx, network, translation) advance to the
/// next credential; other errors surface immediately. A credential is never
/// reused within one request: the attempt list is already deduplicated.
pub async fn dispatch(state: &AppState, req: DispatchRequest) -> Result<Response, ProxyError> {
    let start = Instant::now();
    let config = state.config.load();

    let attempts = state.engine.plan(&config.routing, &req.model);
    if attempts.is_empty() {
        state.metrics.record_error();
        return Err(ProxyError::NoCredentials {
            provider: "any".to_string(),
            model: req.model.clone(),
        });
    }

    let mut last_error: Option<ProxyError> = None;

    for attempt in attempts {
        let executor = match state.executors.get(&attempt.provider) {
            Some(e) => e,
            None => continue,
        };

        let mapped_model =
            apply_model_mapping(&config.model_mappings, &attempt.provider, &attempt.model);

        // Fallback models rewrite the logical model in the body; the
        // executor computes its own upstream normalization on top.
        let body = if attempt.model != req.model {
            relay_core::model::rewrite_model_field(&req.body, &attempt.model)
                .map(Bytes::from)
                .unwrap_or_else(|| req.body.clone())
        } else {
            req.body.clone()
        };

        let target = executor.dialect();
        let translated = match state.translators.translate_request(
            req.source_dialect,
            target,
            &mapped_model,
            &body,
            req.stream,
        ) {
            Ok(t) => t,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        state.store.ensure_index(&attempt.auth);
        state.metrics.record_request(&mapped_model, &attempt.provider);
        tracing::debug!(
            provider = %attempt.provider,
            auth = %attempt.auth.log_tag(),
            model = %mapped_model,
            stream = req.stream,
            "dispatch attempt"
        );

        let usage = Arc::new(UsageReporter::new(
            &attempt.provider,
            &attempt.auth.id,
            &mapped_model,
            state.metrics.clone(),
        ));
        let opts = ExecOptions {
            original_request: body.clone(),
            metadata: HashMap::from([(
                "requested_model".to_string(),
                serde_json::Value::String(req.model.clone()),
            )]),
            usage: usage.clone(),
            timeout: None,
        };
        let provider_request = ProviderRequest {
            model: mapped_model.clone(),
            payload: Bytes::from(translated),
            source_dialect: req.source_dialect,
            stream: req.stream,
        };

        if req.stream {
            match executor
                .execute_stream(&attempt.auth, provider_request, &opts)
                .await
            {
                Ok(stream_result) => {
                    state.metrics.record_latency_ms(start.elapsed().as_millis());
                    return Ok(stream_response(
                        state,
                        config.streaming.keepalive_seconds,
                        req.source_dialect,
                        target,
                        mapped_model,
                        body,
                        stream_result.stream,
                    ));
                }
                Err(e) => {
                    usage.publish_failure();
                    handle_attempt_error(state, &attempt, &e, &config.retry);
                    if !e.is_retryable() {
                        state.metrics.record_latency_ms(start.elapsed().as_millis());
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        } else {
            match executor.execute(&attempt.auth, provider_request, &opts).await {
                Ok(response) => {
                    state.metrics.record_latency_ms(start.elapsed().as_millis());
                    // Providers that report no usage still publish once
                    usage.ensure_published(Usage::default());

                    let translated = state.translators.translate_non_stream(
                        req.source_dialect,
                        target,
                        &req.model,
                        &body,
                        &response.payload,
                    )?;

                    let resp = axum::http::Response::builder()
                        .header(axum::http::header::CONTENT_TYPE, "application/json")
                        .body(axum::body::Body::from(translated))
                        .map_err(|e| {
                            ProxyError::Internal(format!("failed to build response: {e}"))
                        })?;
                    return Ok(resp.into_response());
                }
                Err(e) => {
                    usage.publish_failure();
                    handle_attempt_error(state, &attempt, &e, &config.retry);
                    if !e.is_retryable() {
                        state.metrics.record_latency_ms(start.elapsed().as_millis());
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }
    }

    state.metrics.record_error();
    state.metrics.record_latency_ms(start.elapsed().as_millis());

    Err(last_error.unwrap_or_else(|| ProxyError::NoCredentials {
        provider: "any".to_string(),
        model: req.model.clone(),
    }))
}

/// Apply the provider group's model rewrites, carrying any thinking suffix
/// across the mapping unchanged.
pub fn apply_model_mapping(
    mappings: &HashMap<String, Vec<ModelMapping>>,
    provider: &str,
    model: &str,
) -> String {
    let (base, suffix) = split_reasoning_suffix(model);
    if let Some(entries) = mappings.get(provider)
        && let Some(mapping) = entries.iter().find(|m| m.name == base)
    {
        return with_reasoning_suffix(&mapping.alias, suffix);
    }
    model.to_string()
}

fn stream_response(
    state: &AppState,
    keepalive: u64,
    source: Dialect,
    target: Dialect,
    model: String,
    original_body: Bytes,
    upstream: std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = Result<StreamChunk, ProxyError>> + Send>,
    >,
) -> Response {
    // OpenAI-dialect callers expect the [DONE] terminator; the other
    // dialects close with their own terminal events.
    let terminate_with_done = source == Dialect::OpenAI;

    if !state.translators.has_response_translator(source, target) {
        let data_stream = tokio_stream::StreamExt::map(upstream, |result| {
            result.map(|chunk| match chunk.event_type {
                Some(event) => format!("event: {event}\ndata: {}", chunk.data),
                None => chunk.data,
            })
        });
        return build_sse_response(data_stream, keepalive, terminate_with_done).into_response();
    }

    let translated = translate_stream(
        upstream,
        state.translators.clone(),
        source,
        target,
        model,
        original_body,
    );
    build_sse_response(translated, keepalive, terminate_with_done).into_response()
}

/// Re-translate upstream chunks on the fly. All fan-out lines of one chunk
/// are emitted before the next chunk is read; a translation failure closes
/// the stream after surfacing the error.
fn translate_stream(
    upstream: std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = Result<StreamChunk, ProxyError>> + Send>,
    >,
    translators: Arc<relay_translator::TranslatorRegistry>,
    from: Dialect,
    to: Dialect,
    model: String,
    orig_req: Bytes,
) -> impl tokio_stream::Stream<Item = Result<String, ProxyError>> + Send {
    futures::stream::unfold(
        (upstream, TranslateState::default(), true),
        move |(mut stream, mut state, active)| {
            let translators = translators.clone();
            let model = model.clone();
            let orig_req = orig_req.clone();
            async move {
                if !active {
                    return None;
                }

                use tokio_stream::StreamExt;
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        match translators.translate_stream(
                            from,
                            to,
                            &model,
                            &orig_req,
                            chunk.event_type.as_deref(),
                            chunk.data.as_bytes(),
                            &mut state,
                        ) {
                            Ok(lines) => {
                                let combined = lines.join("\n");
                                Some((Ok(combined), (stream, state, true)))
                            }
                            Err(e) => Some((Err(e), (stream, state, false))),
                        }
                    }
                    Some(Err(e)) => Some((Err(e), (stream, state, false))),
                    None => None,
                }
            }
        },
    )
}

/// Classify a failed attempt: rate limits and upstream faults put the
/// credential into cooldown so later plans skip it while it recovers.
fn handle_attempt_error(state: &AppState, attempt: &Attempt, error: &ProxyError, retry: &RetryConfig) {
    state.metrics.record_error();
    match error {
        ProxyError::Upstream {
            status,
            retry_after_secs,
            ..
        } => match *status {
            429 => {
                let secs = retry_after_secs.unwrap_or(retry.cooldown_429_secs);
                state
                    .store
                    .mark_cooldown(&attempt.auth.id, Duration::from_secs(secs));
                tracing::warn!(
                    provider = %attempt.provider,
                    auth = %attempt.auth.log_tag(),
                    "rate limited, cooling down credential for {secs}s"
                );
            }
            s if (500..=599).contains(&s) => {
                let secs = retry_after_secs.unwrap_or(retry.cooldown_5xx_secs);
                state
                    .store
                    .mark_cooldown(&attempt.auth.id, Duration::from_secs(secs));
                tracing::warn!(
                    provider = %attempt.provider,
                    auth = %attempt.auth.log_tag(),
                    "upstream error ({s}), cooling down credential for {secs}s"
                );
            }
            _ => {}
        },
        ProxyError::Network(_) => {
            let secs = retry.cooldown_network_secs;
            state
                .store
                .mark_cooldown(&attempt.auth.id, Duration::from_secs(secs));
            tracing::warn!(
                provider = %attempt.provider,
                auth = %attempt.auth.log_tag(),
                "network error, cooling down credential for {secs}s"
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_model_mapping_preserves_thinking_suffix() {
        let mappings = HashMap::from([(
            "ampcode".to_string(),
            vec![ModelMapping {
                name: "gpt-5.2".into(),
                alias: "test/gpt-5.2".into(),
                fork: false,
            }],
        )]);

        assert_eq!(
            apply_model_mapping(&mappings, "ampcode", "gpt-5.2(xhigh)"),
            "test/gpt-5.2(xhigh)"
        );
        assert_eq!(
            apply_model_mapping(&mappings, "ampcode", "gpt-5.2"),
            "test/gpt-5.2"
        );
        // Unmapped models and other provider groups pass through
        assert_eq!(apply_model_mapping(&mappings, "ampcode", "other"), "other");
        assert_eq!(
            apply_model_mapping(&mappings, "kilocode", "gpt-5.2"),
            "gpt-5.2"
        );
    }
}
