use crate::ExecutorRegistry;
use relay_core::auth::{Auth, AuthStore};
use relay_core::config::{MAX_FALLBACK_DEPTH, RoutingConfig, RoutingMode, RoutingStrategy};
use relay_core::registry::ModelRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Provider kind used when nothing else claims a model: requests for unknown
/// models pass straight through to AmpCode.
const DEFAULT_PROVIDER: &str = "ampcode";

/// One (model, provider, credential) tuple the conductor may try.
#[derive(Clone)]
pub struct Attempt {
    pub model: String,
    pub provider: String,
    pub auth: Arc<Auth>,
}

/// Applies routing mode, fallback model map, fallback chain, provider
/// priority and order to produce the ordered attempt list for a request.
pub struct RoutingEngine {
    store: Arc<AuthStore>,
    registry: Arc<ModelRegistry>,
    executors: Arc<ExecutorRegistry>,
    /// Per-provider rotation pointer for round-robin credential spreading.
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoutingEngine {
    pub fn new(
        store: Arc<AuthStore>,
        registry: Arc<ModelRegistry>,
        executors: Arc<ExecutorRegistry>,
    ) -> Self {
        Self {
            store,
            registry,
            executors,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Produce the ordered attempt list for a requested model. The caller
    /// walks the list until one attempt succeeds; `(provider, credential)`
    /// pairs are deduplicated with first occurrence preserved.
    pub fn plan(&self, cfg: &RoutingConfig, requested_model: &str) -> Vec<Attempt> {
        let models = expand_models(cfg, requested_model);
        let mut attempts = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for model in &models {
            match cfg.mode {
                RoutingMode::ProviderBased => {
                    for provider in self.expand_providers(cfg, model) {
                        for auth in self.credentials(&provider, cfg.strategy) {
                            if seen.insert((provider.clone(), auth.id.clone())) {
                                attempts.push(Attempt {
                                    model: model.clone(),
                                    provider: provider.clone(),
                                    auth,
                                });
                            }
                        }
                    }
                }
                RoutingMode::KeyBased => {
                    // Each credential pairs with its own declared provider;
                    // model expansion alone drives retry.
                    for provider in self.key_mode_providers(cfg) {
                        for auth in self.credentials(&provider, cfg.strategy) {
                            if seen.insert((auth.provider.clone(), auth.id.clone())) {
                                attempts.push(Attempt {
                                    model: model.clone(),
                                    provider: auth.provider.clone(),
                                    auth,
                                });
                            }
                        }
                    }
                }
            }
        }

        attempts
    }

    /// Ordered provider kinds for a model: model priority wins over the
    /// global order, which wins over registry declarations. Unknown models
    /// fall through to the default provider when it holds credentials.
    fn expand_providers(&self, cfg: &RoutingConfig, model: &str) -> Vec<String> {
        let candidates = if let Some(priority) = cfg.provider_priority.get(model)
            && !priority.is_empty()
        {
            priority.clone()
        } else if !cfg.provider_order.is_empty() {
            cfg.provider_order.clone()
        } else {
            let declared = self.registry.providers_for(model);
            if declared.is_empty() {
                if self.store.for_provider(DEFAULT_PROVIDER).is_empty() {
                    Vec::new()
                } else {
                    vec![DEFAULT_PROVIDER.to_string()]
                }
            } else {
                declared
            }
        };

        // Only providers with a linked executor are eligible
        candidates
            .into_iter()
            .filter(|p| self.executors.get(p).is_some())
            .collect()
    }

    /// Provider iteration order for key-based mode: the configured order
    /// first, then any remaining store providers alphabetically.
    fn key_mode_providers(&self, cfg: &RoutingConfig) -> Vec<String> {
        let mut out: Vec<String> = cfg
            .provider_order
            .iter()
            .filter(|p| self.executors.get(p).is_some())
            .cloned()
            .collect();
        let mut rest: Vec<String> = self
            .store
            .providers()
            .into_iter()
            .filter(|p| !out.contains(p) && self.executors.get(p).is_some())
            .collect();
        rest.sort();
        out.extend(rest);
        out
    }

    /// Eligible credentials for a provider. Stable stored order by default;
    /// round-robin rotates a per-provider cursor across invocations.
    fn credentials(&self, provider: &str, strategy: RoutingStrategy) -> Vec<Arc<Auth>> {
        let mut creds: Vec<Arc<Auth>> = self
            .store
            .for_provider(provider)
            .into_iter()
            .filter(|a| a.is_available())
            .collect();
        for auth in &creds {
            self.store.ensure_index(auth);
        }

        if strategy == RoutingStrategy::RoundRobin && creds.len() > 1 {
            let start = {
                let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
                let cursor = cursors.entry(provider.to_string()).or_insert(0);
                let start = *cursor % creds.len();
                *cursor = cursor.wrapping_add(1);
                start
            };
            creds.rotate_left(start);
        }
        creds
    }
}

/// The ordered sequence of models to try for a request: the requested model,
/// then the chain suffix when the model sits in the fallback chain, otherwise
/// the fallback-models walk. The walk is capped and tracks a visited set as
/// runtime defense even when the config validator was bypassed.
fn expand_models(cfg: &RoutingConfig, requested: &str) -> Vec<String> {
    let mut models = vec![requested.to_string()];

    if !cfg.fallback_chain.is_empty()
        && let Some(pos) = cfg.fallback_chain.iter().position(|m| m == requested)
    {
        for model in &cfg.fallback_chain[pos + 1..] {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        return models;
    }

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(requested);
    let mut current = requested;
    for _ in 0..MAX_FALLBACK_DEPTH {
        match cfg.fallback_models.get(current) {
            Some(next) if visited.insert(next.as_str()) => {
                models.push(next.clone());
                current = next.as_str();
            }
            _ => break,
        }
    }

    models
}
