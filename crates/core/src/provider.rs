use crate::auth::Auth;
use crate::error::ProxyError;
use crate::registry::ModelDescriptor;
use crate::usage::UsageReporter;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;

/// Wire-format families the proxy speaks on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    OpenAI,
    Anthropic,
    Gemini,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            _ => Err(format!("unknown dialect: {s}")),
        }
    }
}

/// A request to be executed by a provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Logical model decided by routing; `prepare_request` normalizes it
    /// into the provider's upstream spelling.
    pub model: String,
    pub payload: Bytes,
    pub source_dialect: Dialect,
    pub stream: bool,
}

/// Per-call execution options.
#[derive(Clone)]
pub struct ExecOptions {
    /// The untranslated inbound body, used as the translation baseline.
    pub original_request: Bytes,
    pub metadata: HashMap<String, serde_json::Value>,
    pub usage: Arc<UsageReporter>,
    /// Per-call deadline; applied at the request level so the shared
    /// transport stays timeout-free for streaming.
    pub timeout: Option<Duration>,
}

/// A non-streaming response from a provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// SSE event type, when the upstream frames with `event:` lines.
    pub event_type: Option<String>,
    /// The JSON data payload.
    pub data: String,
}

/// The result of a streaming provider execution.
pub struct StreamResult {
    pub headers: HashMap<String, String>,
    pub stream: Pin<Box<dyn Stream<Item = Result<StreamChunk, ProxyError>> + Send>>,
}

/// Trait for provider executors that forward requests to upstream APIs.
///
/// One instance per provider kind; instances share no state and are
/// registered in a map keyed by `identifier()`.
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    /// Provider kind, e.g. "ampcode", "kilocode", "cline", "trae".
    fn identifier(&self) -> &'static str;

    /// The dialect this executor emits to and parses from its upstream.
    fn dialect(&self) -> Dialect;

    fn default_base_url(&self) -> &str;

    /// Normalize the model and apply the provider's structural payload
    /// edits in place. Fails with `Unauthorized` when the credential holds
    /// no usable secret.
    fn prepare_request(&self, request: &mut ProviderRequest, auth: &Auth)
    -> Result<(), ProxyError>;

    /// Build the outbound HTTP request for an already-prepared payload.
    fn http_request(
        &self,
        auth: &Auth,
        request: &ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<reqwest::RequestBuilder, ProxyError>;

    /// Execute a non-streaming request.
    async fn execute(
        &self,
        auth: &Auth,
        request: ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<ProviderResponse, ProxyError>;

    /// Execute a streaming request.
    async fn execute_stream(
        &self,
        auth: &Auth,
        request: ProviderRequest,
        opts: &ExecOptions,
    ) -> Result<StreamResult, ProxyError>;

    /// Count tokens for a request without generating.
    async fn count_tokens(
        &self,
        _auth: &Auth,
        _request: ProviderRequest,
        _opts: &ExecOptions,
    ) -> Result<ProviderResponse, ProxyError> {
        Err(ProxyError::NotImplemented(format!(
            "{}: count_tokens",
            self.identifier()
        )))
    }

    /// Refresh the credential. API-key providers return the auth unchanged;
    /// failures surface at call time instead.
    async fn refresh(&self, auth: Arc<Auth>) -> Result<Arc<Auth>, ProxyError> {
        let _ = auth;
        Err(ProxyError::NotImplemented(format!(
            "{}: refresh",
            self.identifier()
        )))
    }

    /// Models this provider serves for the given credential.
    fn supported_models(&self, auth: &Auth) -> Vec<ModelDescriptor>;
}
