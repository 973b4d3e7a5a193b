use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// A credential bound to a single upstream provider.
///
/// Identity fields are immutable for the lifetime of the record; runtime
/// state (log index, cooldown) uses atomics or a per-record lock so executors
/// can hold the record read-only during a call.
#[derive(Debug)]
pub struct Auth {
    pub id: String,
    pub label: String,
    pub provider: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub attributes: HashMap<String, String>,
    pub proxy_url: Option<String>,
    pub disabled: bool,
    /// Assigned on first use for stable logging. -1 until assigned.
    index: AtomicI64,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Auth {
    pub fn new(id: String, label: String, provider: String) -> Self {
        Self {
            id,
            label,
            provider,
            metadata: HashMap::new(),
            attributes: HashMap::new(),
            proxy_url: None,
            disabled: false,
            index: AtomicI64::new(-1),
            cooldown_until: Mutex::new(None),
        }
    }

    /// Assign a stable log index on first use; later calls return the same value.
    pub fn ensure_index(&self, counter: &AtomicI64) -> i64 {
        let current = self.index.load(Ordering::Acquire);
        if current >= 0 {
            return current;
        }
        let next = counter.fetch_add(1, Ordering::AcqRel);
        match self
            .index
            .compare_exchange(-1, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => next,
            Err(existing) => existing,
        }
    }

    pub fn index(&self) -> i64 {
        self.index.load(Ordering::Acquire)
    }

    /// Resolve a secret by checking `metadata` string values first, then
    /// `attributes`, for each key in order.
    pub fn secret(&self, keys: &[&str]) -> Option<String> {
        for key in keys {
            if let Some(v) = self.metadata.get(*key).and_then(|v| v.as_str())
                && !v.is_empty()
            {
                return Some(v.to_string());
            }
            if let Some(v) = self.attributes.get(*key)
                && !v.is_empty()
            {
                return Some(v.to_string());
            }
        }
        None
    }

    /// Resolve the effective proxy URL (credential-level overrides global).
    pub fn effective_proxy<'a>(&'a self, global_proxy: Option<&'a str>) -> Option<&'a str> {
        match self.proxy_url.as_deref() {
            Some("") => None,
            Some(url) => Some(url),
            None => global_proxy,
        }
    }

    pub fn set_cooldown(&self, duration: Duration) {
        if let Ok(mut until) = self.cooldown_until.lock() {
            *until = Some(Instant::now() + duration);
        }
    }

    pub fn is_available(&self) -> bool {
        if self.disabled {
            return false;
        }
        if let Ok(until) = self.cooldown_until.lock()
            && let Some(t) = *until
            && Instant::now() < t
        {
            return false;
        }
        true
    }

    /// `index:label` trailer used in outbound request logs.
    pub fn log_tag(&self) -> String {
        format!("{}:{}", self.index(), self.label)
    }
}

/// Typed registry of credentials, indexed by provider kind.
///
/// The store owns every record behind `Arc`; structural mutations (replace,
/// upsert, remove) are serialized behind the write lock while readers take
/// snapshots. Records never move between providers.
pub struct AuthStore {
    records: RwLock<HashMap<String, Vec<Arc<Auth>>>>,
    index_counter: AtomicI64,
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            index_counter: AtomicI64::new(0),
        }
    }

    /// Replace the full credential set, preserving cooldown state for records
    /// that survive (matched by id within the same provider).
    pub fn replace_all(&self, auths: Vec<Auth>) {
        let mut map: HashMap<String, Vec<Arc<Auth>>> = HashMap::new();
        for auth in auths {
            map.entry(auth.provider.clone())
                .or_default()
                .push(Arc::new(auth));
        }
        if let Ok(mut records) = self.records.write() {
            for (provider, entries) in map.iter() {
                if let Some(old_entries) = records.get(provider) {
                    for entry in entries {
                        if let Some(old) = old_entries.iter().find(|o| o.id == entry.id)
                            && let (Ok(mut new_cd), Ok(old_cd)) =
                                (entry.cooldown_until.lock(), old.cooldown_until.lock())
                        {
                            *new_cd = *old_cd;
                        }
                    }
                }
            }
            *records = map;
        }
    }

    /// Credentials for one provider, in stored (config) order.
    pub fn for_provider(&self, provider: &str) -> Vec<Arc<Auth>> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.get(provider).cloned())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<Auth>> {
        let mut out = Vec::new();
        if let Ok(records) = self.records.read() {
            for entries in records.values() {
                out.extend(entries.iter().cloned());
            }
        }
        out
    }

    pub fn providers(&self) -> Vec<String> {
        self.records
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Auth>> {
        self.records
            .read()
            .ok()?
            .values()
            .flatten()
            .find(|a| a.id == id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        if let Ok(mut records) = self.records.write() {
            for entries in records.values_mut() {
                let before = entries.len();
                entries.retain(|a| a.id != id);
                if entries.len() != before {
                    return true;
                }
            }
        }
        false
    }

    /// Assign (or read) the stable log index for a record.
    pub fn ensure_index(&self, auth: &Auth) -> i64 {
        auth.ensure_index(&self.index_counter)
    }

    /// Put a credential into cooldown for a duration.
    pub fn mark_cooldown(&self, id: &str, duration: Duration) {
        if let Some(auth) = self.get(id) {
            auth.set_cooldown(duration);
        }
    }
}
