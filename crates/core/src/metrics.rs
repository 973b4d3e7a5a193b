use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lightweight in-memory metrics using atomic counters.
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    pub total_prompt_tokens: AtomicU64,
    pub total_completion_tokens: AtomicU64,
    /// Per-model request counts.
    model_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Per-provider request counts.
    provider_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Per-credential failed-call counts, for credential scoring.
    credential_failures: RwLock<HashMap<String, AtomicU64>>,
    /// Latency histogram buckets (ms): <100, <500, <1000, <5000, <30000, >=30000.
    pub latency_buckets: [AtomicU64; 6],
    total_latency_ms: AtomicU64,
    created_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_prompt_tokens: AtomicU64::new(0),
            total_completion_tokens: AtomicU64::new(0),
            model_counts: RwLock::new(HashMap::new()),
            provider_counts: RwLock::new(HashMap::new()),
            credential_failures: RwLock::new(HashMap::new()),
            latency_buckets: Default::default(),
            total_latency_ms: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_request(&self, model: &str, provider: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        increment_map(&self.model_counts, model);
        increment_map(&self.provider_counts, provider);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.total_prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.total_completion_tokens
            .fetch_add(completion, Ordering::Relaxed);
    }

    pub fn record_credential_failure(&self, auth_id: &str) {
        increment_map(&self.credential_failures, auth_id);
    }

    pub fn record_latency_ms(&self, ms: u128) {
        let bucket = match ms {
            0..=99 => 0,
            100..=499 => 1,
            500..=999 => 2,
            1000..=4999 => 3,
            5000..=29999 => 4,
            _ => 5,
        };
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(ms as u64, Ordering::Relaxed);
    }

    /// Snapshot current metrics as a JSON-serializable value.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.created_at.elapsed().as_secs(),
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "total_errors": self.total_errors.load(Ordering::Relaxed),
            "total_prompt_tokens": self.total_prompt_tokens.load(Ordering::Relaxed),
            "total_completion_tokens": self.total_completion_tokens.load(Ordering::Relaxed),
            "model_requests": snapshot_map(&self.model_counts),
            "provider_requests": snapshot_map(&self.provider_counts),
            "credential_failures": snapshot_map(&self.credential_failures),
            "latency_buckets_ms": {
                "lt_100": self.latency_buckets[0].load(Ordering::Relaxed),
                "lt_500": self.latency_buckets[1].load(Ordering::Relaxed),
                "lt_1000": self.latency_buckets[2].load(Ordering::Relaxed),
                "lt_5000": self.latency_buckets[3].load(Ordering::Relaxed),
                "lt_30000": self.latency_buckets[4].load(Ordering::Relaxed),
                "ge_30000": self.latency_buckets[5].load(Ordering::Relaxed),
            },
            "total_latency_ms": self.total_latency_ms.load(Ordering::Relaxed),
        })
    }
}

fn increment_map(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
    if let Ok(counts) = map.read()
        && let Some(counter) = counts.get(key)
    {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if let Ok(mut counts) = map.write() {
        counts
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn snapshot_map(map: &RwLock<HashMap<String, AtomicU64>>) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    if let Ok(counts) = map.read() {
        for (k, v) in counts.iter() {
            out.insert(k.clone(), serde_json::json!(v.load(Ordering::Relaxed)));
        }
    }
    serde_json::Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record_request("glm-4.5", "kilocode");
        metrics.record_request("glm-4.5", "kilocode");
        metrics.record_tokens(10, 20);
        metrics.record_latency_ms(250);
        metrics.record_credential_failure("cred-1");

        let snap = metrics.snapshot();
        assert_eq!(snap["total_requests"], 2);
        assert_eq!(snap["model_requests"]["glm-4.5"], 2);
        assert_eq!(snap["provider_requests"]["kilocode"], 2);
        assert_eq!(snap["total_prompt_tokens"], 10);
        assert_eq!(snap["latency_buckets_ms"]["lt_500"], 1);
        assert_eq!(snap["credential_failures"]["cred-1"], 1);
    }
}
