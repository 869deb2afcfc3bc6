//! Resource-manager orchestration.
//!
//! [`ResourceManager`] wires the four components together with explicit
//! dependency injection: one pool, one cache, one limiter, and one executor
//! per process, constructed once at startup and passed by handle to all
//! callers. It owns the periodic maintenance tasks and stops them
//! deterministically on shutdown, and it aggregates the per-component
//! statistics into a single health payload for a dashboard or health route.

use crate::cache::{CacheConfig, CacheStats, ResponseCache};
use crate::executor::{
    CachingQueryExecutor, ExecutorConfig, PerformanceReport, PreloadQuery,
};
use crate::limiter::{LimiterConfig, LimiterStats, RateDecision, RateLimiter};
use crate::pool::{ConnectionPool, PoolConfig, PoolStats, StoreBackend};
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Aggregate construction parameters, supplied once at process startup.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub limiter: LimiterConfig,
    pub executor: ExecutorConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            // The shared cache serves every component, so it gets more room
            // and a tighter sweep cadence than a standalone instance.
            cache: CacheConfig::new()
                .with_max_entries(2000)
                .with_cleanup_interval(Duration::from_secs(30)),
            limiter: LimiterConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

/// One aggregated, serializable view over all component statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub connection_pool: PoolStats,
    pub cache: CacheStats,
    pub rate_limiter: LimiterStats,
    pub performance: PerformanceReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub report: HealthReport,
}

/// Long-lived service object composing pool, cache, limiter, and executor.
pub struct ResourceManager {
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    executor: Arc<CachingQueryExecutor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig, backend: Box<dyn StoreBackend>) -> Self {
        let pool = Arc::new(ConnectionPool::new(config.pool, backend));
        let cache = Arc::new(ResponseCache::new(config.cache));
        let limiter = Arc::new(RateLimiter::new(config.limiter));
        let executor = Arc::new(CachingQueryExecutor::new(
            pool.clone(),
            cache.clone(),
            config.executor,
        ));
        Self {
            pool,
            cache,
            limiter,
            executor,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn executor(&self) -> &Arc<CachingQueryExecutor> {
        &self.executor
    }

    /// Spawn the periodic maintenance tasks: pool reclamation, cache expiry
    /// sweep, and limiter cleanup, each on its configured interval. Calling
    /// it twice is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(spawn_periodic(
            self.pool.config().reclaim_interval,
            self.pool.clone(),
            |pool| {
                pool.reclaim_idle();
            },
        ));
        tasks.push(spawn_periodic(
            self.cache.config().cleanup_interval,
            self.cache.clone(),
            |cache| {
                cache.sweep_expired();
            },
        ));
        tasks.push(spawn_periodic(
            self.limiter.config().cleanup_interval,
            self.limiter.clone(),
            |limiter| {
                limiter.cleanup();
            },
        ));
        info!("resource maintenance tasks started");
    }

    /// Pre-establish pool connections and warm the query cache.
    pub async fn warm(&self, preload: &[PreloadQuery]) -> Result<usize> {
        self.pool.warm().await?;
        Ok(self.executor.preload(preload).await)
    }

    // Request gate: rate limiter and cache composed directly, independent of
    // the query executor.

    pub fn admit_request(&self, identity: &str) -> RateDecision {
        self.limiter.check_default(identity)
    }

    pub fn admit_ai_request(&self, identity: &str) -> RateDecision {
        self.limiter.check_ai(identity)
    }

    pub fn admit_voice_request(&self, identity: &str) -> RateDecision {
        self.limiter.check_voice(identity)
    }

    /// Memoized answer for a previously stored user message, if still live.
    pub fn cached_answer<T: DeserializeOwned>(&self, identity: &str, message: &str) -> Option<T> {
        self.cache.cached_ai_response(identity, message)
    }

    pub fn store_answer<T: Serialize>(
        &self,
        identity: &str,
        message: &str,
        answer: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.cache.cache_ai_response(identity, message, answer, ttl)
    }

    // Administrative surface, intended for operator callers.

    /// Clear an identity's rate-limit window and block, and its cached
    /// entries.
    pub fn reset_identity(&self, identity: &str) {
        self.limiter.reset(identity);
        self.cache.clear_user(identity);
    }

    pub fn invalidate(&self, fragment: &str) -> usize {
        self.cache.invalidate(fragment)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> HealthReport {
        HealthReport {
            connection_pool: self.pool.stats(),
            cache: self.cache.stats(),
            rate_limiter: self.limiter.stats(),
            performance: self.executor.performance_report(),
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        let status = if self.pool.is_closed() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        HealthCheck {
            status,
            report: self.stats(),
        }
    }

    /// Stop the maintenance tasks and close the pool. Idempotent.
    pub fn close(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.pool.close();
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        // Maintenance timers must not outlive the service.
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

fn spawn_periodic<C, F>(period: Duration, component: Arc<C>, step: F) -> JoinHandle<()>
where
    C: Send + Sync + 'static,
    F: Fn(&C) + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first real pass
        // happens one full period after startup.
        tick.tick().await;
        loop {
            tick.tick().await;
            step(&component);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::DenyReason;
    use crate::pool::MemoryStore;

    fn manager() -> ResourceManager {
        ResourceManager::new(ResourceConfig::new(), Box::new(MemoryStore::new()))
    }

    #[test]
    fn default_config_sizes_the_shared_cache_up() {
        let config = ResourceConfig::new();
        assert_eq!(config.cache.max_entries, 2000);
        assert_eq!(config.cache.cleanup_interval, Duration::from_secs(30));
        // Component defaults pass through untouched.
        assert_eq!(config.pool.max_connections, PoolConfig::default().max_connections);
        assert_eq!(config.limiter.default_limit, LimiterConfig::default().default_limit);
    }

    #[tokio::test]
    async fn gate_allows_then_memoizes() {
        let manager = manager();
        assert!(manager.admit_ai_request("u").allowed);
        assert!(manager.cached_answer::<String>("u", "hello").is_none());
        manager
            .store_answer("u", "hello", &"hi there", None)
            .unwrap();
        assert_eq!(
            manager.cached_answer::<String>("u", "hello").as_deref(),
            Some("hi there")
        );
    }

    #[tokio::test]
    async fn reset_identity_clears_limits_and_cache() {
        let manager = ResourceManager::new(
            ResourceConfig::new().with_limiter(LimiterConfig::new().with_ai_limit(1)),
            Box::new(MemoryStore::new()),
        );
        manager.store_answer("u", "hello", &"hi", None).unwrap();
        assert!(manager.admit_ai_request("u").allowed);
        assert!(!manager.admit_ai_request("u").allowed);
        manager.reset_identity("u");
        assert!(manager.admit_ai_request("u").allowed);
        assert!(manager.cached_answer::<String>("u", "hello").is_none());
    }

    #[tokio::test]
    async fn health_reflects_pool_closure() {
        let manager = manager();
        manager.start();
        assert_eq!(manager.health_check().status, HealthStatus::Healthy);
        manager.close();
        assert_eq!(manager.health_check().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn blocked_identity_reported_in_stats() {
        let manager = ResourceManager::new(
            ResourceConfig::new().with_limiter(LimiterConfig::new().with_ai_limit(2)),
            Box::new(MemoryStore::new()),
        );
        for _ in 0..4 {
            manager.admit_ai_request("abuser");
        }
        assert_eq!(
            manager.admit_ai_request("abuser").reason,
            Some(DenyReason::Blocked)
        );
        let report = manager.stats();
        assert_eq!(report.rate_limiter.blocked_identities, 1);
    }
}
