use crate::common;
use async_trait::async_trait;
use relay_core::auth::Auth;
use relay_core::error::ProxyError;
use relay_core::model::split_reasoning_suffix;
use relay_core::provider::*;
use relay_core::registry::ModelDescriptor;
use relay_core::transport::TransportPool;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.kilo.ai";
const CHAT_ENDPOINT: &str = "/api/openrouter/chat/completions";

pub struct KilocodeExecutor {
    pool: Arc<TransportPool>,
    global_proxy: Option<String>,
}

/// Rewrite a caller-facing Kilocode model id into the API spelling.
/// Strips the `kilocode-` prefix, preserves a `:free` suffix, and maps the
/// dash-separated minor versions onto dots (`glm-4-5` → `glm-4.5`,
/// `kimi-k2-…` → `kimi-k2.…`).
pub fn normalize_model_for_api(model: &str) -> String {
    let model = model.strip_prefix("kilocode-").unwrap_or(model);
    let (base, free) = match model.strip_suffix(":free") {
        Some(base) => (base, true),
        None => (model, false),
    };
    let base = if let Some(rest) = base.strip_prefix("glm-4-") {
        format!("glm-4.{rest}")
    } else if let Some(rest) = base.strip_prefix("kimi-k2-") {
        format!("kimi-k2.{rest}")
    } else {
        base.to_string()
    };
    if free { format!("{base}:free") } else { base }
}

impl KilocodeExecutor {
    pub fn new(pool: Arc<TransportPool>, global_proxy: Option<String>) -> Self {
        Self { pool, global_proxy }
    }

    fn token(&self, auth: &Auth) -> Result<String, ProxyError> {
        auth.secret(&["token"])
            .ok_or_else(|| common::missing_credential(self.identifier()))
    }
}

#[async_trait]
impl ProviderExecutor for KilocodeExecutor {
    fn identifier(&self) -> &'static str {
        "kilocode"
    }

    fn dialect(&self) -> Dialect {
        Dialect::OpenAI
    }

    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn prepare_request(
        &self,
        request: &mut ProviderRequest,
        auth: &Auth,
    ) -> Result<(), ProxyError> {
        self.token(auth)?;
        let (model, _suffix) = split_reasoning_suffix(&request.model);
        let model = normalize_model_for_api(model);
        request.payload =
            common::finalize_payload(&request.payload, &model, request.stream, request.stream)?
                .into();
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
        let url = format!("{DEFAULT_BASE_URL}{CHAT_ENDPOINT}");
        common::log_outbound(
            self.identifier(),
            auth,
            "POST",
            &url,
            &request.model,
            &request.payload,
        );

        let client = common::client_for(&self.pool, auth, self.global_proxy.as_deref());
        let mut req = client
            .post(&url)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {token}"))
            .header("http-referer", "https://kilocode.ai")
            .header("x-title", "Kilo Code")
            .header("x-kilocode-version", "3.26.0")
            .header("user-agent", "Kilo-Code/3.26.0")
            .header("x-kilocode-tester", "SUPPRESS")
            .header("x-kilocode-editorname", "Visual Studio Code 1.96.0")
            .body(request.payload.to_vec());
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
        let mut request = request;
        request.stream = false;
        self.prepare_request(&mut request, auth)?;
        let req = self.http_request(auth, &request, opts)?;
        let (body, headers) = common::handle_response(req.send().await?, opts).await?;
        Ok(ProviderResponse {
            payload: body,
            headers,
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
        common::handle_stream_response(req.send().await?, opts).await
    }

    // count_tokens is not offered by the Kilocode API; the default
    // NotImplemented applies.

    async fn refresh(&self, auth: Arc<Auth>) -> Result<Arc<Auth>, ProxyError> {
        Ok(auth)
    }

    fn supported_models(&self, auth: &Auth) -> Vec<ModelDescriptor> {
        common::models_from_auth(auth, self.identifier(), "kilocode")
    }
}
