use crate::metrics::Metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Token counts for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl Usage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    /// Read usage numbers out of a provider response payload. Understands the
    /// OpenAI, Anthropic, and Gemini spellings.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        if let Some(usage) = payload.get("usage") {
            let prompt = usage
                .get("prompt_tokens")
                .and_then(|v| v.as_u64())
                .or_else(|| usage.get("input_tokens").and_then(|v| v.as_u64()))?;
            let completion = usage
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .or_else(|| usage.get("output_tokens").and_then(|v| v.as_u64()))
                .unwrap_or(0);
            return Some(Self::new(prompt, completion));
        }
        if let Some(usage) = payload.get("usageMetadata") {
            let prompt = usage.get("promptTokenCount").and_then(|v| v.as_u64())?;
            let completion = usage
                .get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            return Some(Self::new(prompt, completion));
        }
        None
    }
}

/// Per-call usage publication with at-most-once semantics.
///
/// Executors parse usage numbers from unary bodies or SSE chunks and publish
/// through this reporter; the conductor inspects the outcome for credential
/// scoring. `ensure_published` deduplicates so a stream that reports usage in
/// several frames still publishes once.
pub struct UsageReporter {
    provider: String,
    auth_id: String,
    model: String,
    metrics: Arc<Metrics>,
    published: AtomicBool,
    failed: AtomicBool,
}

impl UsageReporter {
    pub fn new(provider: &str, auth_id: &str, model: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            provider: provider.to_string(),
            auth_id: auth_id.to_string(),
            model: model.to_string(),
            metrics,
            published: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    /// Publish usage once; later calls are no-ops.
    pub fn ensure_published(&self, usage: Usage) {
        if self
            .published
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.metrics.record_tokens(usage.prompt, usage.completion);
        tracing::debug!(
            provider = %self.provider,
            auth = %self.auth_id,
            model = %self.model,
            prompt = usage.prompt,
            completion = usage.completion,
            total = usage.total,
            "usage published"
        );
    }

    /// Mark the attempt failed; no usage will be published.
    pub fn publish_failure(&self) {
        if self
            .failed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.metrics.record_error();
            self.metrics.record_credential_failure(&self.auth_id);
        }
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}
