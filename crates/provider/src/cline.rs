use crate::common;
use async_trait::async_trait;
use relay_core::auth::Auth;
use relay_core::error::ProxyError;
use relay_core::model::split_reasoning_suffix;
use relay_core::provider::*;
use relay_core::registry::ModelDescriptor;
use relay_core::transport::TransportPool;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://api.cline.bot";
const CHAT_ENDPOINT: &str = "/api/v1/chat/completions";
const CLIENT_VERSION: &str = "3.64.0";

pub struct ClineExecutor {
    pool: Arc<TransportPool>,
    global_proxy: Option<String>,
}

impl ClineExecutor {
    pub fn new(pool: Arc<TransportPool>, global_proxy: Option<String>) -> Self {
        Self { pool, global_proxy }
    }

    fn token(&self, auth: &Auth) -> Result<String, ProxyError> {
        auth.secret(&["token", "api_key"])
            .ok_or_else(|| common::missing_credential(self.identifier()))
    }
}

#[async_trait]
impl ProviderExecutor for ClineExecutor {
    fn identifier(&self) -> &'static str {
        "cline"
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

        let platform = auth
            .attributes
            .get("platform")
            .map(String::as_str)
            .unwrap_or("vscode");

        let client = common::client_for(&self.pool, auth, self.global_proxy.as_deref());
        let mut req = client
            .post(&url)
            .header("content-type", "application/json")
            // The workos: prefix is mandatory
            .header("authorization", format!("Bearer workos:{token}"))
            .header("x-platform", platform)
            .header("x-platform-version", "1.96.0")
            .header("x-client-version", CLIENT_VERSION)
            .header("x-client-type", "extension")
            .header("x-core-version", CLIENT_VERSION)
            .header("x-is-multiroot", "false")
            .header("http-referer", "https://cline.bot")
            .header("x-title", "Cline")
            .header("user-agent", format!("Cline/{CLIENT_VERSION}"))
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
        Ok(auth)
    }

    fn supported_models(&self, auth: &Auth) -> Vec<ModelDescriptor> {
        common::models_from_auth(auth, self.identifier(), "cline")
    }
}
