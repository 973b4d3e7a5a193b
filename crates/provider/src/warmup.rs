use crate::ExecutorRegistry;
use relay_core::auth::AuthStore;
use relay_core::config::WarmupConfig;
use relay_core::metrics::Metrics;
use relay_core::provider::{Dialect, ExecOptions, ProviderExecutor, ProviderRequest};
use relay_core::usage::UsageReporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const INTER_CREDENTIAL_DELAY: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default model used to exercise a provider's credentials.
pub fn default_warmup_model(provider: &str) -> &'static str {
    if provider == "antigravity" {
        "gemini-2.5-pro"
    } else if provider.contains("gemini") {
        "gemini-2.0-flash"
    } else if provider.contains("claude") || provider.contains("anthropic") {
        "claude-sonnet-4-20250514"
    } else {
        "gpt-4o-mini"
    }
}

/// The minimal chat body a warmup call sends.
pub fn warmup_payload(message: &str) -> Vec<u8> {
    serde_json::json!({
        "messages": [{"role": "user", "content": message}],
        "max_tokens": 1,
    })
    .to_string()
    .into_bytes()
}

struct Inner {
    running: bool,
    stop_tx: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

/// Keeps credentials warm: one long-lived task per provider, each tick
/// iterating that provider's credentials with a fixed inter-credential delay.
pub struct WarmupScheduler {
    executors: Arc<ExecutorRegistry>,
    store: Arc<AuthStore>,
    metrics: Arc<Metrics>,
    inner: tokio::sync::Mutex<Inner>,
}

impl WarmupScheduler {
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        store: Arc<AuthStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            executors,
            store,
            metrics,
            inner: tokio::sync::Mutex::new(Inner {
                running: false,
                stop_tx: None,
                handles: Vec::new(),
            }),
        }
    }

    /// Idempotent: a second call while running is a no-op, as is starting
    /// with warmup disabled.
    pub async fn start(&self, cfg: &WarmupConfig) {
        let mut inner = self.inner.lock().await;
        if inner.running || !cfg.enabled {
            return;
        }
        inner.running = true;

        let (stop_tx, stop_rx) = watch::channel(false);
        inner.stop_tx = Some(stop_tx);

        for (provider, executor) in self.executors.all() {
            let provider = provider.clone();
            let executor = executor.clone();
            let store = self.store.clone();
            let metrics = self.metrics.clone();
            let cfg = cfg.clone();
            let stop_rx = stop_rx.clone();
            inner.handles.push(tokio::spawn(provider_loop(
                provider, executor, store, metrics, cfg, stop_rx,
            )));
        }
        tracing::info!("warmup scheduler started");
    }

    /// Cancel the shared stop channel and wait for every provider task.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return;
        }
        if let Some(tx) = inner.stop_tx.take() {
            let _ = tx.send(true);
        }
        for handle in inner.handles.drain(..) {
            let _ = handle.await;
        }
        inner.running = false;
        tracing::info!("warmup scheduler stopped");
    }

    pub async fn update_config(&self, cfg: &WarmupConfig) {
        self.stop().await;
        self.start(cfg).await;
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }
}

async fn provider_loop(
    provider: String,
    executor: Arc<dyn ProviderExecutor>,
    store: Arc<AuthStore>,
    metrics: Arc<Metrics>,
    cfg: WarmupConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_tick(&provider, &*executor, &store, &metrics, &cfg, &mut stop_rx).await;
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// One tick: exercise each of the provider's credentials in stored order.
/// Failures are logged and never halt the remaining credentials.
pub(crate) async fn run_tick(
    provider: &str,
    executor: &dyn ProviderExecutor,
    store: &AuthStore,
    metrics: &Arc<Metrics>,
    cfg: &WarmupConfig,
    stop_rx: &mut watch::Receiver<bool>,
) {
    let mut first = true;
    for auth in store.for_provider(provider) {
        if auth.disabled {
            continue;
        }
        if !first {
            tokio::select! {
                _ = tokio::time::sleep(INTER_CREDENTIAL_DELAY) => {}
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
            }
        }
        first = false;

        store.ensure_index(&auth);
        let model = default_warmup_model(provider);
        let payload = warmup_payload(&cfg.message);
        let usage = Arc::new(UsageReporter::new(provider, &auth.id, model, metrics.clone()));
        let request = ProviderRequest {
            model: model.to_string(),
            payload: payload.clone().into(),
            source_dialect: Dialect::OpenAI,
            stream: false,
        };
        let opts = ExecOptions {
            original_request: payload.into(),
            metadata: Default::default(),
            usage,
            timeout: Some(CALL_TIMEOUT),
        };

        match executor.execute(&auth, request, &opts).await {
            Ok(_) => {
                tracing::debug!(provider, auth = %auth.log_tag(), model, "warmup ok");
            }
            Err(e) => {
                tracing::warn!(provider, auth = %auth.log_tag(), model, "warmup failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::auth::Auth;
    use relay_core::error::ProxyError;
    use relay_core::provider::{ProviderResponse, StreamResult};
    use relay_core::registry::ModelDescriptor;
    use std::sync::Mutex;

    /// Records every warmup call; fails for auth ids listed in `fail_ids`.
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, String)>>,
        fail_ids: Vec<String>,
    }

    impl RecordingExecutor {
        fn new(fail_ids: Vec<String>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_ids,
            }
        }
    }

    #[async_trait]
    impl ProviderExecutor for RecordingExecutor {
        fn identifier(&self) -> &'static str {
            "recording"
        }

        fn dialect(&self) -> Dialect {
            Dialect::OpenAI
        }

        fn default_base_url(&self) -> &str {
            "http://localhost"
        }

        fn prepare_request(
            &self,
            _request: &mut ProviderRequest,
            _auth: &Auth,
        ) -> Result<(), ProxyError> {
            Ok(())
        }

        fn http_request(
            &self,
            _auth: &Auth,
            _request: &ProviderRequest,
            _opts: &ExecOptions,
        ) -> Result<reqwest::RequestBuilder, ProxyError> {
            Ok(reqwest::Client::new().post(self.default_base_url()))
        }

        async fn execute(
            &self,
            auth: &Auth,
            request: ProviderRequest,
            _opts: &ExecOptions,
        ) -> Result<ProviderResponse, ProxyError> {
            self.calls
                .lock()
                .unwrap()
                .push((auth.id.clone(), request.model.clone()));
            if self.fail_ids.contains(&auth.id) {
                return Err(ProxyError::Network("boom".into()));
            }
            Ok(ProviderResponse {
                payload: bytes::Bytes::from_static(b"{}"),
                headers: Default::default(),
            })
        }

        async fn execute_stream(
            &self,
            _auth: &Auth,
            _request: ProviderRequest,
            _opts: &ExecOptions,
        ) -> Result<StreamResult, ProxyError> {
            unreachable!("warmup only uses unary calls")
        }

        fn supported_models(&self, _auth: &Auth) -> Vec<ModelDescriptor> {
            Vec::new()
        }
    }

    fn auth(id: &str, provider: &str, disabled: bool) -> Auth {
        let mut a = Auth::new(id.into(), id.into(), provider.into());
        a.disabled = disabled;
        a
    }

    #[test]
    fn test_default_warmup_model() {
        assert_eq!(default_warmup_model("gemini"), "gemini-2.0-flash");
        assert_eq!(default_warmup_model("antigravity"), "gemini-2.5-pro");
        assert_eq!(
            default_warmup_model("claude-oauth"),
            "claude-sonnet-4-20250514"
        );
        assert_eq!(default_warmup_model("ampcode"), "gpt-4o-mini");
    }

    #[test]
    fn test_warmup_payload_shape() {
        let payload = warmup_payload("hi");
        let val: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(val["messages"][0]["role"], "user");
        assert_eq!(val["messages"][0]["content"], "hi");
        assert_eq!(val["max_tokens"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_skips_disabled_and_survives_failures() {
        let store = AuthStore::new();
        store.replace_all(vec![
            auth("w1", "recording", false),
            auth("w2", "recording", true),
            auth("w3", "recording", false),
            auth("w4", "recording", false),
        ]);
        let executor = RecordingExecutor::new(vec!["w3".into()]);
        let metrics = Arc::new(Metrics::new());
        let cfg = WarmupConfig {
            enabled: true,
            ..Default::default()
        };
        let (_tx, mut rx) = watch::channel(false);

        run_tick("recording", &executor, &store, &metrics, &cfg, &mut rx).await;

        let calls = executor.calls.lock().unwrap().clone();
        // Disabled w2 skipped; the w3 failure does not stop w4
        assert_eq!(
            calls,
            vec![
                ("w1".to_string(), "gpt-4o-mini".to_string()),
                ("w3".to_string(), "gpt-4o-mini".to_string()),
                ("w4".to_string(), "gpt-4o-mini".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_waits() {
        let executors = Arc::new(ExecutorRegistry::new());
        let store = Arc::new(AuthStore::new());
        let metrics = Arc::new(Metrics::new());
        let scheduler = WarmupScheduler::new(executors, store, metrics);

        let disabled = WarmupConfig::default();
        scheduler.start(&disabled).await;
        assert!(!scheduler.is_running().await);

        let enabled = WarmupConfig {
            enabled: true,
            ..Default::default()
        };
        scheduler.start(&enabled).await;
        assert!(scheduler.is_running().await);
        scheduler.start(&enabled).await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        // Stopping twice is harmless
        scheduler.stop().await;

        // update_config with warmup turned off leaves the scheduler stopped
        scheduler.update_config(&disabled).await;
        assert!(!scheduler.is_running().await);
    }
}
