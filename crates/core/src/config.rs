use crate::auth::Auth;
use arc_swap::ArcSwap;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Hard bound on the fallback chain and on fallback-model walks.
pub const MAX_FALLBACK_DEPTH: usize = 20;

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Client auth
    pub api_keys: Vec<String>,
    #[serde(skip)]
    pub api_keys_set: HashSet<String>,

    // Global proxy
    pub proxy_url: Option<String>,

    // Logging
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    // Routing
    pub routing: RoutingConfig,

    // Streaming
    pub streaming: StreamingConfig,

    // Request body size limit (MB)
    pub body_limit_mb: usize,

    // Credential cooldowns after retryable failures
    pub retry: RetryConfig,

    // Credential warmup
    pub warmup: WarmupConfig,

    // Per provider-group model rewrites
    pub model_mappings: HashMap<String, Vec<ModelMapping>>,

    // Provider credentials
    pub credentials: Vec<CredentialEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8317,
            api_keys: Vec::new(),
            api_keys_set: HashSet::new(),
            proxy_url: None,
            logging_to_file: false,
            log_dir: None,
            routing: RoutingConfig::default(),
            streaming: StreamingConfig::default(),
            body_limit_mb: 10,
            retry: RetryConfig::default(),
            warmup: WarmupConfig::default(),
            model_mappings: HashMap::new(),
            credentials: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a YAML file, sanitize, and validate.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml_ng::from_str(&contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to the YAML file. Used by the management API after a
    /// validated write.
    pub fn save(&self, path: &str) -> Result<(), anyhow::Error> {
        let yaml = serde_yaml_ng::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.routing.validate()?;
        for entry in &self.credentials {
            if let Some(ref proxy) = entry.proxy_url {
                crate::transport::validate_proxy_url(proxy)?;
            }
            anyhow::ensure!(
                !entry.provider.is_empty(),
                "credential '{}' has no provider",
                entry.label
            );
        }
        if let Some(ref proxy) = self.proxy_url {
            crate::transport::validate_proxy_url(proxy)?;
        }
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.credentials.retain(|e| !e.provider.trim().is_empty());
        for entry in self.credentials.iter_mut() {
            entry.provider = entry.provider.trim().to_lowercase();
            if entry.id.is_empty() {
                entry.id = uuid::Uuid::new_v4().to_string();
            }
        }
        // Deduplicate by id
        let mut seen = HashSet::new();
        self.credentials.retain(|e| seen.insert(e.id.clone()));

        self.model_mappings = sanitize_model_mappings(&self.model_mappings);
        self.api_keys_set = self.api_keys.iter().cloned().collect();
    }

    /// Materialize `Auth` records for the store.
    pub fn build_auths(&self) -> Vec<Auth> {
        self.credentials
            .iter()
            .map(|entry| {
                let mut auth = Auth::new(
                    entry.id.clone(),
                    entry.label.clone(),
                    entry.provider.clone(),
                );
                auth.metadata = entry.metadata.clone();
                if let Some(ref key) = entry.api_key
                    && !key.is_empty()
                {
                    auth.metadata
                        .entry("api_key".to_string())
                        .or_insert_with(|| serde_json::Value::String(key.clone()));
                }
                if !entry.models.is_empty() {
                    auth.metadata
                        .insert("models".to_string(), serde_json::json!(entry.models));
                }
                auth.attributes = entry.attributes.clone();
                auth.proxy_url = entry.proxy_url.clone();
                auth.disabled = entry.disabled;
                auth
            })
            .collect()
    }
}

// ─── Routing ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    #[default]
    ProviderBased,
    KeyBased,
}

impl RoutingMode {
    /// Canonical storage spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderBased => "provider-based",
            Self::KeyBased => "key-based",
        }
    }

    /// Accept the write-side aliases. "model-only" selects key-based mode:
    /// model expansion alone drives retry there.
    pub fn parse_alias(s: &str) -> Option<Self> {
        match s {
            "" | "provider" | "provider-based" => Some(Self::ProviderBased),
            "key" | "key-based" | "model-only" => Some(Self::KeyBased),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Stable credential order by stored index.
    #[default]
    Stable,
    /// Rotate a per-provider cursor across invocations.
    RoundRobin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    /// Directed next-hop graph: model → model. Must stay acyclic.
    pub fallback_models: HashMap<String, String>,
    /// Ordered sequence of models to try, max 20 entries.
    pub fallback_chain: Vec<String>,
    /// Per-model ordered provider kinds.
    pub provider_priority: HashMap<String, Vec<String>>,
    /// Global ordered provider kinds for models without a priority entry.
    pub provider_order: Vec<String>,
    pub strategy: RoutingStrategy,
}

impl RoutingConfig {
    /// Enforced on every config write. An empty config is legal and means
    /// "use the requested model only".
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            self.fallback_chain.len() <= MAX_FALLBACK_DEPTH,
            "fallback-chain has {} entries, maximum is {MAX_FALLBACK_DEPTH}",
            self.fallback_chain.len()
        );
        detect_fallback_cycle(&self.fallback_models)?;
        Ok(())
    }
}

/// Follow next-hop pointers from every key; fail if any walk revisits a node.
/// Self-references count as cycles.
fn detect_fallback_cycle(map: &HashMap<String, String>) -> Result<(), anyhow::Error> {
    for start in map.keys() {
        let mut visited = HashSet::new();
        visited.insert(start.as_str());
        let mut current = start.as_str();
        while let Some(next) = map.get(current) {
            if !visited.insert(next.as_str()) {
                anyhow::bail!("fallback-models contains a cycle through '{next}'");
            }
            current = next.as_str();
        }
    }
    Ok(())
}

// ─── Model mappings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModelMapping {
    /// Model name as requested by the caller.
    pub name: String,
    /// Upstream model to substitute.
    pub alias: String,
    /// Whether the alias forks into a provider-specific variant.
    pub fork: bool,
}

impl Default for ModelMapping {
    fn default() -> Self {
        Self {
            name: String::new(),
            alias: String::new(),
            fork: false,
        }
    }
}

/// Normalize mapping groups: trim group/name/alias, lowercase the group key,
/// preserve insertion order and the fork flag. N:1 and 1:N entries are
/// allowed. Idempotent.
pub fn sanitize_model_mappings(
    mappings: &HashMap<String, Vec<ModelMapping>>,
) -> HashMap<String, Vec<ModelMapping>> {
    let mut out: HashMap<String, Vec<ModelMapping>> = HashMap::new();
    for (group, entries) in mappings {
        let group = group.trim().to_lowercase();
        let sanitized = out.entry(group).or_default();
        for entry in entries {
            sanitized.push(ModelMapping {
                name: entry.name.trim().to_string(),
                alias: entry.alias.trim().to_string(),
                fork: entry.fork,
            });
        }
    }
    out
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StreamingConfig {
    pub keepalive_seconds: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub cooldown_429_secs: u64,
    pub cooldown_5xx_secs: u64,
    pub cooldown_network_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            cooldown_429_secs: 60,
            cooldown_5xx_secs: 15,
            cooldown_network_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WarmupConfig {
    pub enabled: bool,
    /// Seconds between scheduler ticks per provider.
    pub interval_secs: u64,
    /// User message sent in the minimal warmup payload.
    pub message: String,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 300,
            message: "hi".to_string(),
        }
    }
}

// ─── Provider credential entry ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CredentialEntry {
    /// Stable id; generated when absent.
    pub id: String,
    pub label: String,
    pub provider: String,
    /// Convenience spelling; folded into `metadata.api_key`.
    pub api_key: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub attributes: HashMap<String, String>,
    pub proxy_url: Option<String>,
    pub disabled: bool,
    /// Model ids this credential serves, registered with the model registry.
    pub models: Vec<String>,
}

impl Default for CredentialEntry {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            provider: String::new(),
            api_key: None,
            metadata: HashMap::new(),
            attributes: HashMap::new(),
            proxy_url: None,
            disabled: false,
            models: Vec::new(),
        }
    }
}

// ─── Config Watcher ────────────────────────────────────────────────────────

pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching a config file. On changes (debounced 150ms, SHA-256
    /// dedup), reload and atomically swap in via ArcSwap.
    pub fn start(
        path: String,
        config: Arc<ArcSwap<Config>>,
        on_reload: impl Fn(&Config) + Send + Sync + 'static,
    ) -> Result<Self, anyhow::Error> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res
                && (event.kind.is_modify() || event.kind.is_create())
            {
                let _ = tx.blocking_send(());
            }
        })?;
        watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            let mut last_hash: Option<[u8; 32]> = None;
            let mut debounce: Option<tokio::time::Instant> = None;

            loop {
                tokio::select! {
                    Some(()) = rx.recv() => {
                        debounce = Some(tokio::time::Instant::now() + Duration::from_millis(150));
                    }
                    _ = async {
                        match debounce {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        debounce = None;
                        match std::fs::read(&path) {
                            Ok(contents) => {
                                let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
                                if last_hash.as_ref() == Some(&hash) {
                                    continue;
                                }
                                last_hash = Some(hash);

                                match Config::load(&path) {
                                    Ok(new_cfg) => {
                                        tracing::info!("configuration reloaded");
                                        on_reload(&new_cfg);
                                        config.store(Arc::new(new_cfg));
                                    }
                                    Err(e) => {
                                        tracing::error!("config reload failed: {e}");
                                    }
                                }
                            }
                            Err(e) => tracing::error!("config file read failed: {e}"),
                        }
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}
