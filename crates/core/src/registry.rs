use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// A model exposed by a provider client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub owned_by: String,
    /// Provider kind that serves this model.
    pub kind: String,
    pub context_length: Option<u64>,
    pub max_completion_tokens: Option<u64>,
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: String::new(),
            owned_by: String::new(),
            kind: String::new(),
            context_length: None,
            max_completion_tokens: None,
        }
    }
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let id = id.into();
        let kind = kind.into();
        Self {
            display_name: id.clone(),
            owned_by: kind.clone(),
            id,
            kind,
            context_length: None,
            max_completion_tokens: None,
        }
    }
}

struct ClientModels {
    client_id: String,
    provider: String,
    models: Vec<ModelDescriptor>,
}

/// Declares which provider-client can serve which model id.
///
/// Clients register and unregister dynamically (e.g. when credentials are
/// added or a dynamic provider refreshes its list). Registration order is
/// preserved; readers take snapshots.
pub struct ModelRegistry {
    clients: RwLock<Vec<ClientModels>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
        }
    }

    /// Register (or replace) a client's model list.
    pub fn register_client(&self, client_id: &str, provider: &str, models: Vec<ModelDescriptor>) {
        if let Ok(mut clients) = self.clients.write() {
            if let Some(existing) = clients.iter_mut().find(|c| c.client_id == client_id) {
                existing.provider = provider.to_string();
                existing.models = models;
            } else {
                clients.push(ClientModels {
                    client_id: client_id.to_string(),
                    provider: provider.to_string(),
                    models,
                });
            }
        }
    }

    pub fn unregister_client(&self, client_id: &str) {
        if let Ok(mut clients) = self.clients.write() {
            clients.retain(|c| c.client_id != client_id);
        }
    }

    /// Providers that declare the model, in registration order, deduplicated.
    pub fn providers_for(&self, model: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        if let Ok(clients) = self.clients.read() {
            for client in clients.iter() {
                if client.models.iter().any(|m| m.id == model) && !out.contains(&client.provider) {
                    out.push(client.provider.clone());
                }
            }
        }
        out
    }

    /// Snapshot of every registered model, deduplicated by id in
    /// registration order.
    pub fn models(&self) -> Vec<ModelDescriptor> {
        let mut out: Vec<ModelDescriptor> = Vec::new();
        if let Ok(clients) = self.clients.read() {
            for client in clients.iter() {
                for model in &client.models {
                    if !out.iter().any(|m| m.id == model.id) {
                        out.push(model.clone());
                    }
                }
            }
        }
        out
    }

    pub fn supports(&self, model: &str) -> bool {
        !self.providers_for(model).is_empty()
    }
}
