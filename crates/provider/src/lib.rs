pub mod ampcode;
pub mod cline;
pub mod common;
pub mod kilocode;
pub mod routing;
pub mod sse;
pub mod trae;
pub mod warmup;

use relay_core::provider::ProviderExecutor;
use relay_core::transport::TransportPool;
use std::collections::HashMap;
use std::sync::Arc;

pub use common::{extract_headers, parse_retry_after};

/// Heterogeneous provider executors keyed by provider kind.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ProviderExecutor>>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, executor: Arc<dyn ProviderExecutor>) {
        self.executors
            .insert(executor.identifier().to_string(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &Arc<dyn ProviderExecutor>)> {
        self.executors.iter()
    }
}

/// Build the standard registry: one executor instance per provider kind,
/// all sharing the transport pool.
pub fn build_registry(pool: Arc<TransportPool>, global_proxy: Option<String>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.insert(Arc::new(ampcode::AmpCodeExecutor::new(
        pool.clone(),
        global_proxy.clone(),
    )));
    registry.insert(Arc::new(kilocode::KilocodeExecutor::new(
        pool.clone(),
        global_proxy.clone(),
    )));
    registry.insert(Arc::new(cline::ClineExecutor::new(
        pool.clone(),
        global_proxy.clone(),
    )));
    registry.insert(Arc::new(trae::TraeExecutor::new(pool, global_proxy)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_registry_links_all_providers() {
        let registry = build_registry(Arc::new(TransportPool::new()), None);
        for kind in ["ampcode", "kilocode", "cline", "trae"] {
            let executor = registry.get(kind).expect(kind);
            assert_eq!(executor.identifier(), kind);
        }
        assert!(registry.get("unknown").is_none());
    }
}
