//! Behavioral tests for the caching query executor: hit short-circuiting,
//! guaranteed release, TTL lapse, slow-query tracking, and reporting.

use resman::cache::{CacheConfig, ResponseCache};
use resman::executor::{CachingQueryExecutor, ExecutorConfig, PreloadQuery};
use resman::pool::{ConnectionPool, MemoryStore, PoolConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    pool: Arc<ConnectionPool>,
    executor: CachingQueryExecutor,
}

fn fixture(store: MemoryStore, executor_config: ExecutorConfig) -> Fixture {
    let pool = Arc::new(ConnectionPool::new(
        PoolConfig::new().with_max_connections(2),
        Box::new(store),
    ));
    let cache = Arc::new(ResponseCache::new(CacheConfig::new()));
    let executor = CachingQueryExecutor::new(pool.clone(), cache, executor_config);
    Fixture { pool, executor }
}

#[tokio::test]
async fn second_identical_query_skips_the_pool() {
    let fx = fixture(
        MemoryStore::new().with_rows("SELECT * FROM companies", vec![json!({"id": 1})]),
        ExecutorConfig::new(),
    );
    let first = fx
        .executor
        .execute_with_cache("SELECT * FROM companies", &[], None)
        .await
        .unwrap();
    let second = fx
        .executor
        .execute_with_cache("SELECT * FROM companies", &[], None)
        .await
        .unwrap();
    assert_eq!(first, second);

    // Only the miss touched the pool.
    assert_eq!(fx.pool.stats().total_requests, 1);
    let report = fx.executor.query_report();
    assert_eq!(report.top_queries[0].count, 2);
    assert_eq!(report.top_queries[0].cache_hits, 1);
    assert_eq!(report.cache.hits, 1);
}

#[tokio::test]
async fn different_params_are_different_entries() {
    let fx = fixture(
        MemoryStore::new().with_rows("SELECT * FROM users WHERE id = ?", vec![json!({"id": 7})]),
        ExecutorConfig::new(),
    );
    fx.executor
        .execute_with_cache("SELECT * FROM users WHERE id = ?", &[json!(1)], None)
        .await
        .unwrap();
    fx.executor
        .execute_with_cache("SELECT * FROM users WHERE id = ?", &[json!(2)], None)
        .await
        .unwrap();
    assert_eq!(fx.pool.stats().total_requests, 2);
    // Both executions aggregate under one normalized query shape.
    assert_eq!(fx.executor.query_report().tracked_queries, 1);
}

#[tokio::test]
async fn connection_comes_back_after_query_failure() {
    let fx = fixture(
        MemoryStore::new().with_failure("SELECT boom"),
        ExecutorConfig::new(),
    );
    fx.pool.warm().await.unwrap();
    let idle_before = fx.pool.stats().available_connections;

    assert!(fx
        .executor
        .execute_with_cache("SELECT boom", &[], None)
        .await
        .is_err());

    let stats = fx.pool.stats();
    assert_eq!(stats.available_connections, idle_before);
    assert_eq!(stats.active_connections, 0);
}

#[tokio::test]
async fn expired_entries_hit_the_store_again() {
    let fx = fixture(
        MemoryStore::new().with_rows("SELECT now", vec![json!({"t": 0})]),
        ExecutorConfig::new(),
    );
    fx.executor
        .execute_with_cache("SELECT now", &[], Some(Duration::from_millis(30)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    fx.executor
        .execute_with_cache("SELECT now", &[], Some(Duration::from_millis(30)))
        .await
        .unwrap();
    assert_eq!(fx.pool.stats().total_requests, 2);
}

#[tokio::test]
async fn slow_queries_land_in_a_bounded_ring() {
    let fx = fixture(
        MemoryStore::new().with_latency(Duration::from_millis(25)),
        ExecutorConfig::new()
            .with_slow_query_threshold(Duration::from_millis(10))
            .with_slow_query_capacity(2),
    );
    for sql in ["SELECT a", "SELECT b", "SELECT c"] {
        fx.executor.execute_with_cache(sql, &[], None).await.unwrap();
    }
    let report = fx.executor.query_report();
    assert_eq!(report.slow_queries.len(), 2);
    // Oldest entry fell off the ring.
    assert_eq!(report.slow_queries[0].query, "select b");
    assert_eq!(report.slow_queries[1].query, "select c");
    assert!(report.slow_queries.iter().all(|s| s.execution_ms >= 10));
}

#[tokio::test]
async fn invalidation_forces_re_execution() {
    let fx = fixture(
        MemoryStore::new().with_rows("SELECT * FROM settings", vec![json!({"theme": "dark"})]),
        ExecutorConfig::new(),
    );
    fx.executor
        .execute_with_cache("SELECT * FROM settings", &[], None)
        .await
        .unwrap();
    assert_eq!(fx.executor.invalidate("db_query"), 1);
    fx.executor
        .execute_with_cache("SELECT * FROM settings", &[], None)
        .await
        .unwrap();
    assert_eq!(fx.pool.stats().total_requests, 2);
}

#[tokio::test]
async fn preload_warms_subsequent_reads() {
    let fx = fixture(
        MemoryStore::new().with_rows("SELECT * FROM api_keys", vec![json!({"provider": "x"})]),
        ExecutorConfig::new(),
    );
    let loaded = fx
        .executor
        .preload(&[PreloadQuery {
            sql: "SELECT * FROM api_keys".into(),
            params: vec![],
            ttl: Some(Duration::from_secs(3600)),
        }])
        .await;
    assert_eq!(loaded, 1);
    fx.executor
        .execute_with_cache("SELECT * FROM api_keys", &[], None)
        .await
        .unwrap();
    assert_eq!(fx.pool.stats().total_requests, 1);
}

#[tokio::test]
async fn performance_report_flags_poor_hit_rate() {
    let fx = fixture(MemoryStore::new(), ExecutorConfig::new());
    fx.executor
        .execute_with_cache("SELECT one", &[], None)
        .await
        .unwrap();
    let report = fx.executor.performance_report();
    assert!(report.cache_hit_rate < 0.5);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("cache TTL")));
    assert_eq!(report.tracked_queries, 1);
}
