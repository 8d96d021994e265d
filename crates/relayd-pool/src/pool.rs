use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::PoolError;
use crate::health::HealthMap;
use crate::upstream::Upstream;

/// The live, mutable set of upstream descriptors plus a "current" pointer
/// and per-upstream transient health state (C3). A single read-write lock
/// guards the ordered list and pin; the health map uses its own per-key
/// discipline so readers never hold a lock across network I/O.
pub struct PoolState {
    list: RwLock<Vec<Upstream>>,
    pin: RwLock<Option<String>>,
    health: Arc<HealthMap>,
}

impl PoolState {
    pub fn new() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
            pin: RwLock::new(None),
            health: Arc::new(HealthMap::new()),
        }
    }

    /// Atomically substitutes the ordered upstream list. Rejects the
    /// replacement (leaving the current list untouched) if names are
    /// non-unique, any name is empty, or any non-Claude upstream is
    /// missing `defaultModel`.
    pub async fn replace(&self, upstreams: Vec<Upstream>) -> Result<(), PoolError> {
        let mut seen = std::collections::HashSet::with_capacity(upstreams.len());
        for upstream in &upstreams {
            if upstream.name.is_empty() {
                return Err(PoolError::InvalidPool("upstream name must not be empty".to_string()));
            }
            if !seen.insert(upstream.name.as_str()) {
                return Err(PoolError::InvalidPool(format!("duplicate upstream name: {}", upstream.name)));
            }
            if upstream.requires_default_model() && upstream.default_model.as_deref().unwrap_or("").is_empty() {
                return Err(PoolError::InvalidPool(format!(
                    "upstream {} requires a defaultModel",
                    upstream.name
                )));
            }
        }

        let names: Vec<String> = upstreams.iter().map(|u| u.name.clone()).collect();
        *self.list.write().await = upstreams;
        self.health.prune(&names).await;

        let mut pin = self.pin.write().await;
        if let Some(pinned) = pin.as_ref() {
            let still_valid = self
                .list
                .read()
                .await
                .iter()
                .any(|u| u.name == *pinned && u.enabled);
            if !still_valid {
                *pin = None;
            }
        }

        Ok(())
    }

    /// Returns the upstreams, in priority order, that are enabled and not
    /// currently in cool-down.
    pub async fn eligible(&self) -> Vec<Upstream> {
        let list = self.list.read().await;
        let mut eligible = Vec::with_capacity(list.len());
        for upstream in list.iter() {
            if upstream.enabled && self.health.is_healthy(&upstream.name).await {
                eligible.push(upstream.clone());
            }
        }
        eligible
    }

    /// `Eligible()` with the pin (if still eligible) moved to the front,
    /// matching the order the engine must try upstreams in.
    pub async fn attempt_order(&self) -> Vec<Upstream> {
        let mut eligible = self.eligible().await;
        if let Some(pinned) = self.pin.read().await.clone() {
            if let Some(pos) = eligible.iter().position(|u| u.name == pinned) {
                let upstream = eligible.remove(pos);
                eligible.insert(0, upstream);
            }
        }
        eligible
    }

    pub async fn mark_failed(&self, name: &str) {
        self.health.mark_failed(name).await;
    }

    pub async fn mark_ok(&self, name: &str) {
        self.health.mark_ok(name).await;
    }

    /// Pins `name` as the preferred upstream. Fails if no enabled upstream
    /// with that name exists.
    pub async fn pin(&self, name: &str) -> Result<(), PoolError> {
        let exists = self
            .list
            .read()
            .await
            .iter()
            .any(|u| u.name == name && u.enabled);
        if !exists {
            return Err(PoolError::NoSuchUpstream(name.to_string()));
        }
        *self.pin.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn clear_pin(&self) {
        *self.pin.write().await = None;
    }

    /// The pinned upstream if it's still eligible, else the head of
    /// `Eligible()`, else `None`.
    pub async fn current(&self) -> Option<Upstream> {
        let eligible = self.eligible().await;
        if let Some(pinned) = self.pin.read().await.clone() {
            if let Some(upstream) = eligible.iter().find(|u| u.name == pinned) {
                return Some(upstream.clone());
            }
        }
        eligible.into_iter().next()
    }

    pub async fn snapshot_list(&self) -> Vec<Upstream> {
        self.list.read().await.clone()
    }
}

impl Default for PoolState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamKind;

    fn upstream(name: &str, enabled: bool) -> Upstream {
        Upstream {
            name: name.to_string(),
            host: "api.example.com".to_string(),
            credential: "k".to_string(),
            kind: UpstreamKind::Claude,
            default_model: None,
            enabled,
            remark: String::new(),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_names() {
        let pool = PoolState::new();
        let err = pool
            .replace(vec![upstream("a", true), upstream("a", true)])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidPool(_)));
    }

    #[tokio::test]
    async fn requires_default_model_for_non_claude() {
        let pool = PoolState::new();
        let mut openai = upstream("a", true);
        openai.kind = UpstreamKind::Openai;
        let err = pool.replace(vec![openai]).await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidPool(_)));
    }

    #[tokio::test]
    async fn eligible_excludes_disabled_and_cooling_down() {
        let pool = PoolState::new();
        pool.replace(vec![upstream("a", true), upstream("b", false)])
            .await
            .unwrap();
        assert_eq!(pool.eligible().await.len(), 1);

        pool.mark_failed("a").await;
        assert!(pool.eligible().await.is_empty());

        pool.mark_ok("a").await;
        assert_eq!(pool.eligible().await.len(), 1);
    }

    #[tokio::test]
    async fn pin_survives_replace_only_while_present_and_enabled() {
        let pool = PoolState::new();
        pool.replace(vec![upstream("a", true), upstream("b", true)])
            .await
            .unwrap();
        pool.pin("b").await.unwrap();
        assert_eq!(pool.current().await.unwrap().name, "b");

        pool.replace(vec![upstream("a", true)]).await.unwrap();
        assert_eq!(pool.current().await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn pin_is_tried_first() {
        let pool = PoolState::new();
        pool.replace(vec![upstream("a", true), upstream("b", true)])
            .await
            .unwrap();
        pool.pin("b").await.unwrap();
        let order = pool.attempt_order().await;
        assert_eq!(order[0].name, "b");
    }

    #[tokio::test]
    async fn pin_requires_existing_enabled_upstream() {
        let pool = PoolState::new();
        pool.replace(vec![upstream("a", true)]).await.unwrap();
        let err = pool.pin("missing").await.unwrap_err();
        assert!(matches!(err, PoolError::NoSuchUpstream(_)));
    }
}
