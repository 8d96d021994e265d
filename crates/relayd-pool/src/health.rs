use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

const BASE_COOLDOWN: Duration = Duration::from_secs(60);
const MAX_COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
struct CooldownEntry {
    until: Instant,
    streak: u32,
}

/// Transient health map for the pool. Tracks
/// `disabledUntil` per upstream name plus a failure streak used to double
/// the cooldown on back-to-back failures, capped at ten minutes and reset
/// on the next success — grounded on the credential pool's per-key
/// unavailability map, simplified since this map only needs "is it past
/// its cooldown", not a recovery broadcast queue.
#[derive(Debug, Default)]
pub struct HealthMap {
    entries: RwLock<HashMap<String, CooldownEntry>>,
}

impl HealthMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `disabledUntil[name] = now + cooldown`, doubling the previous
    /// cooldown if this is a back-to-back failure. Idempotent in the sense
    /// that repeated calls only ever extend the cooldown.
    pub async fn mark_failed(&self, name: &str) {
        let mut entries = self.entries.write().await;
        let streak = entries.get(name).map(|e| e.streak).unwrap_or(0);
        let cooldown = (BASE_COOLDOWN.saturating_mul(1 << streak.min(16))).min(MAX_COOLDOWN);
        entries.insert(
            name.to_string(),
            CooldownEntry {
                until: Instant::now() + cooldown,
                streak: streak + 1,
            },
        );
    }

    /// Clears `disabledUntil[name]` and resets the failure streak.
    pub async fn mark_ok(&self, name: &str) {
        self.entries.write().await.remove(name);
    }

    /// `true` iff `disabledUntil` is absent or in the past.
    pub async fn is_healthy(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) => Instant::now() >= entry.until,
            None => true,
        }
    }

    /// Drops entries for names no longer in the pool.
    pub async fn prune(&self, keep: &[String]) {
        let mut entries = self.entries.write().await;
        entries.retain(|name, _| keep.contains(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_failure_uses_base_cooldown() {
        let health = HealthMap::new();
        assert!(health.is_healthy("a").await);
        health.mark_failed("a").await;
        assert!(!health.is_healthy("a").await);
    }

    #[tokio::test]
    async fn success_clears_cooldown() {
        let health = HealthMap::new();
        health.mark_failed("a").await;
        health.mark_ok("a").await;
        assert!(health.is_healthy("a").await);
    }

    #[tokio::test]
    async fn prune_drops_removed_names() {
        let health = HealthMap::new();
        health.mark_failed("a").await;
        health.prune(&["b".to_string()]).await;
        assert!(health.is_healthy("a").await);
    }
}
