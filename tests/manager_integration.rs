//! End-to-end tests for the resource manager: startup, the request gate,
//! maintenance tasks, and the aggregated health payload.

use resman::cache::CacheConfig;
use resman::executor::PreloadQuery;
use resman::limiter::LimiterConfig;
use resman::pool::{MemoryStore, PoolConfig};
use resman::service::{HealthStatus, ResourceConfig, ResourceManager};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn startup_warms_pool_and_cache() {
    let store = MemoryStore::new().with_rows("SELECT * FROM api_keys", vec![json!({"p": "x"})]);
    let manager = ResourceManager::new(
        ResourceConfig::new().with_pool(PoolConfig::new().with_warm_connections(2)),
        Box::new(store),
    );
    let loaded = manager
        .warm(&[PreloadQuery {
            sql: "SELECT * FROM api_keys".into(),
            params: vec![],
            ttl: None,
        }])
        .await
        .unwrap();
    assert_eq!(loaded, 1);

    let report = manager.stats();
    // Two warmed connections plus the one the preload borrowed and returned.
    assert_eq!(report.connection_pool.pool_size, 2);
    assert_eq!(report.connection_pool.active_connections, 0);
    assert_eq!(report.cache.entries, 1);
}

#[tokio::test]
async fn gated_request_flow_memoizes_answers() {
    let manager = ResourceManager::new(ResourceConfig::new(), Box::new(MemoryStore::new()));

    let decision = manager.admit_ai_request("driver-7");
    assert!(decision.allowed);
    assert!(manager
        .cached_answer::<String>("driver-7", "eld status?")
        .is_none());
    manager
        .store_answer("driver-7", "eld status?", &"all units compliant", None)
        .unwrap();

    // Same question again: admitted, then answered from cache.
    assert!(manager.admit_ai_request("driver-7").allowed);
    assert_eq!(
        manager
            .cached_answer::<String>("driver-7", "eld status?")
            .as_deref(),
        Some("all units compliant")
    );

    let report = manager.stats();
    assert_eq!(report.cache.hits, 1);
    assert_eq!(report.rate_limiter.total_allowed, 2);
    assert_eq!(report.rate_limiter.active_identities, 1);
}

#[tokio::test]
async fn maintenance_tasks_sweep_cache_and_reclaim_pool() {
    let manager = ResourceManager::new(
        ResourceConfig::new()
            .with_pool(
                PoolConfig::new()
                    .with_min_connections(0)
                    .with_idle_timeout(Duration::from_millis(10))
                    .with_reclaim_interval(Duration::from_millis(20)),
            )
            .with_cache(
                CacheConfig::new()
                    .with_default_ttl(Duration::from_millis(10))
                    .with_cleanup_interval(Duration::from_millis(20)),
            )
            .with_limiter(
                LimiterConfig::new()
                    .with_window(Duration::from_millis(10))
                    .with_cleanup_interval(Duration::from_millis(20)),
            ),
        Box::new(MemoryStore::new()),
    );
    manager.start();

    let conn = manager.pool().acquire().await.unwrap();
    manager.pool().release(&conn);
    manager
        .cache()
        .set(&resman::CacheKey::new("k"), &1, None)
        .unwrap();
    manager.limiter().check_default("u");

    tokio::time::sleep(Duration::from_millis(120)).await;

    let report = manager.stats();
    assert_eq!(report.connection_pool.pool_size, 0);
    assert_eq!(report.cache.entries, 0);
    assert!(report.cache.evictions >= 1);
    assert_eq!(report.rate_limiter.active_identities, 0);

    manager.close();
}

#[tokio::test]
async fn health_payload_serializes_for_dashboards() {
    let manager = ResourceManager::new(ResourceConfig::new(), Box::new(MemoryStore::new()));
    manager.admit_request("u");
    let health = manager.health_check();
    assert_eq!(health.status, HealthStatus::Healthy);

    let payload = serde_json::to_value(&health).unwrap();
    assert!(payload["report"]["connection_pool"]["pool_size"].is_number());
    assert!(payload["report"]["cache"]["hits"].is_number());
    assert!(payload["report"]["rate_limiter"]["active_identities"].is_number());
    assert!(payload["report"]["performance"]["recommendations"].is_array());
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let manager = ResourceManager::new(ResourceConfig::new(), Box::new(MemoryStore::new()));
    manager.start();
    manager.close();
    manager.close();
    assert_eq!(manager.health_check().status, HealthStatus::Unhealthy);
    assert!(manager.pool().acquire().await.is_err());
}
