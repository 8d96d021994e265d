use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;

const STATS_FORMAT_VERSION: u32 = 1;

/// Per-upstream counters (C2). All counters monotonically increase;
/// `last_used` monotonically advances. Invariant: `errors <= requests`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EndpointStat {
    pub requests: u64,
    pub errors: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
}

impl EndpointStat {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub endpoints: HashMap<String, EndpointStat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    version: u32,
    endpoints: HashMap<String, EndpointStat>,
    #[serde(default)]
    total_requests: u64,
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
}

/// Process-wide counters keyed by upstream name. Every
/// operation locks only the single entry it touches conceptually, though
/// this implementation uses one map-wide lock since the map itself is
/// rarely contended relative to the I/O each request performs around it.
#[derive(Debug, Default)]
pub struct StatsStore {
    endpoints: RwLock<HashMap<String, EndpointStat>>,
}

impl StatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `requests += 1`, `lastUsed = now`. Must precede any
    /// `record_tokens`/`record_error` for the same logical request.
    pub async fn record_attempt(&self, name: &str) {
        let mut endpoints = self.endpoints.write().await;
        let stat = endpoints.entry(name.to_string()).or_default();
        stat.requests += 1;
        stat.last_used = Some(OffsetDateTime::now_utc());
    }

    pub async fn record_tokens(&self, name: &str, input: u64, output: u64) {
        let mut endpoints = self.endpoints.write().await;
        let stat = endpoints.entry(name.to_string()).or_default();
        stat.input_tokens += input;
        stat.output_tokens += output;
    }

    pub async fn record_error(&self, name: &str) {
        let mut endpoints = self.endpoints.write().await;
        let stat = endpoints.entry(name.to_string()).or_default();
        stat.errors += 1;
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let endpoints = self.endpoints.read().await;
        let total_requests = endpoints.values().map(|s| s.requests).sum();
        StatsSnapshot {
            total_requests,
            endpoints: endpoints.clone(),
        }
    }

    /// Writes the full map to `path` as JSON with a format version tag.
    pub async fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let endpoints = self.endpoints.read().await.clone();
        let total_requests = endpoints.values().map(|s| s.requests).sum();
        let persisted = PersistedStats {
            version: STATS_FORMAT_VERSION,
            endpoints,
            total_requests,
            saved_at: OffsetDateTime::now_utc(),
        };
        let body = serde_json::to_vec_pretty(&persisted)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        tokio::fs::write(path, body).await
    }

    /// Rehydrates the map from `path`. A missing or malformed file yields
    /// an empty store, logged at warn level — never fatal.
    pub async fn load(path: &Path) -> Self {
        let store = Self::new();
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "stats file missing, starting empty");
                return store;
            }
        };
        match serde_json::from_slice::<PersistedStats>(&body) {
            Ok(persisted) => {
                *store.endpoints.write().await = persisted.endpoints;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "stats file corrupt, starting empty");
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempt_then_tokens_then_error_accumulate() {
        let stats = StatsStore::new();
        stats.record_attempt("a").await;
        stats.record_tokens("a", 3, 1).await;
        let snapshot = stats.snapshot().await;
        let stat = snapshot.endpoints.get("a").unwrap();
        assert_eq!(stat.requests, 1);
        assert_eq!(stat.input_tokens, 3);
        assert_eq!(stat.output_tokens, 1);
        assert_eq!(stat.errors, 0);
    }

    #[tokio::test]
    async fn errors_never_exceed_requests_in_steady_use() {
        let stats = StatsStore::new();
        stats.record_attempt("a").await;
        stats.record_error("a").await;
        let snapshot = stats.snapshot().await;
        let stat = snapshot.endpoints.get("a").unwrap();
        assert!(stat.errors <= stat.requests);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let stats = StatsStore::new();
        stats.record_attempt("a").await;
        stats.record_tokens("a", 5, 2).await;
        stats.save(&path).await.unwrap();

        let loaded = StatsStore::load(&path).await;
        let snapshot = loaded.snapshot().await;
        let stat = snapshot.endpoints.get("a").unwrap();
        assert_eq!(stat.requests, 1);
        assert_eq!(stat.input_tokens, 5);
        assert_eq!(stat.output_tokens, 2);
    }

    #[tokio::test]
    async fn load_missing_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let loaded = StatsStore::load(&path).await;
        assert!(loaded.snapshot().await.endpoints.is_empty());
    }
}
