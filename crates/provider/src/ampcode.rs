use crate::common;
use async_trait::async_trait;
use relay_core::auth::Auth;
use relay_core::error::ProxyError;
use relay_core::model::split_reasoning_suffix;
use relay_core::provider::*;
use relay_core::registry::ModelDescriptor;
use relay_core::transport::TransportPool;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://ampcode.com";

/// Metadata/attribute keys checked for the API secret, in order. A label
/// matching the AmpCode user-key shape is accepted as a last resort.
const SECRET_KEYS: &[&str] = &["api_key", "token"];
const USER_KEY_PREFIX: &str = "sgamp_user_";

pub struct AmpCodeExecutor {
    pool: Arc<TransportPool>,
    global_proxy: Option<String>,
}

impl AmpCodeExecutor {
    pub fn new(pool: Arc<TransportPool>, global_proxy: Option<String>) -> Self {
        Self { pool, global_proxy }
    }

    fn resolve_secret(&self, auth: &Auth) -> Result<String, ProxyError> {
        if let Some(secret) = auth.secret(SECRET_KEYS) {
            return Ok(secret);
        }
        if auth.label.starts_with(USER_KEY_PREFIX) {
            return Ok(auth.label.clone());
        }
        Err(common::missing_credential(self.identifier()))
    }
}

#[async_trait]
impl ProviderExecutor for AmpCodeExecutor {
    fn identifier(&self) -> &'static str {
        "ampcode"
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
        self.resolve_secret(auth)?;
        // Thinking suffixes are stripped for the upstream call; the
        // requested spelling is restored on the way back out.
        let (model, _suffix) = split_reasoning_suffix(&request.model);
        let model = model.to_string();
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
        let secret = self.resolve_secret(auth)?;
        let url = format!("{DEFAULT_BASE_URL}/v1/chat/completions");
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
            .header("authorization", format!("Bearer {secret}"))
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

    async fn refresh(&self, auth: Arc<Auth>) -> Result<Arc<Auth>, ProxyError> {
        // API-key credential; invalid keys surface at call time
        Ok(auth)
    }

    fn supported_models(&self, auth: &Auth) -> Vec<ModelDescriptor> {
        common::models_from_auth(auth, self.identifier(), "ampcode")
    }
}
