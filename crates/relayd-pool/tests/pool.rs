use relayd_pool::{PoolState, StatsStore, Upstream, UpstreamKind};

fn upstream(name: &str) -> Upstream {
    Upstream {
        name: name.to_string(),
        host: "api.example.com".to_string(),
        credential: "k".to_string(),
        kind: UpstreamKind::Claude,
        default_model: None,
        enabled: true,
        remark: String::new(),
    }
}

/// Pool = [A (fails), B (succeeds)]; the failing
/// upstream is skipped on the next request, and stats for both are
/// visible regardless of which one ultimately served the request.
#[tokio::test]
async fn failover_marks_failed_upstream_unhealthy_without_dropping_it() {
    let pool = PoolState::new();
    let stats = StatsStore::new();
    pool.replace(vec![upstream("a"), upstream("b")]).await.unwrap();

    let attempts = pool.attempt_order().await;
    assert_eq!(attempts.len(), 2);

    stats.record_attempt("a").await;
    stats.record_error("a").await;
    pool.mark_failed("a").await;

    stats.record_attempt("b").await;
    stats.record_tokens("b", 3, 1).await;
    pool.mark_ok("b").await;

    let remaining = pool.eligible().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "b");

    let snapshot = stats.snapshot().await;
    assert_eq!(snapshot.endpoints.get("a").unwrap().errors, 1);
    assert_eq!(snapshot.endpoints.get("b").unwrap().output_tokens, 1);
}

/// Replacing the pool while a request against a
/// removed upstream is in flight must not erase that upstream's stats —
/// telemetry is append-only even after the upstream disappears.
#[tokio::test]
async fn replace_does_not_erase_stats_for_removed_upstream() {
    let pool = PoolState::new();
    let stats = StatsStore::new();
    pool.replace(vec![upstream("a")]).await.unwrap();
    stats.record_attempt("a").await;
    stats.record_tokens("a", 2, 2).await;

    pool.replace(vec![upstream("b")]).await.unwrap();

    let snapshot = stats.snapshot().await;
    assert!(snapshot.endpoints.contains_key("a"));
    assert!(pool.eligible().await.iter().all(|u| u.name != "a"));
}
