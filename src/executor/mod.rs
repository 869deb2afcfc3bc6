//! Cache-aware, instrumented query execution.
//!
//! A [`CachingQueryExecutor`] composes the connection pool and the response
//! cache: results are memoized under a deterministic key derived from the
//! normalized statement text and its parameters, misses borrow a pooled
//! connection (released on every path), and every execution feeds per-query
//! running statistics plus a bounded ring of recent slow queries.

use crate::cache::{hex_digest, normalize_query, CacheKey, CacheStats, ResponseCache};
use crate::pool::{ConnectionPool, Row};
use crate::Result;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Query statements are truncated to this length in stats and reports.
const QUERY_DISPLAY_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executions slower than this land in the slow-query ring.
    pub slow_query_threshold: Duration,
    /// How many recent slow queries are retained.
    pub slow_query_capacity: usize,
    /// TTL applied when the caller does not supply one.
    pub default_ttl: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(100),
            slow_query_capacity: 50,
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }
    pub fn with_slow_query_capacity(mut self, capacity: usize) -> Self {
        self.slow_query_capacity = capacity;
        self
    }
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Running statistics for one normalized query shape. Structurally identical
/// statements aggregate together regardless of literal parameter values.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryStats {
    pub query: String,
    pub count: u64,
    pub total_time_ms: u64,
    pub avg_time_ms: f64,
    pub cache_hits: u64,
}

/// One slow execution retained for operational inspection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SlowQuery {
    pub query: String,
    pub execution_ms: u64,
    pub recorded_at: SystemTime,
}

/// Execution statistics plus cache counters, for dashboards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryReport {
    pub tracked_queries: usize,
    pub slow_queries: Vec<SlowQuery>,
    pub top_queries: Vec<QueryStats>,
    pub slowest_queries: Vec<QueryStats>,
    pub cache: CacheStats,
}

/// Condensed operational summary with tuning recommendations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PerformanceReport {
    pub cache_hit_rate: f64,
    pub cache_total_requests: u64,
    pub cache_entries: usize,
    pub cache_memory_bytes: usize,
    pub tracked_queries: usize,
    pub slow_query_count: usize,
    pub average_execution_ms: f64,
    pub recommendations: Vec<String>,
}

/// A statement to warm the cache with at startup.
#[derive(Debug, Clone)]
pub struct PreloadQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub ttl: Option<Duration>,
}

struct ExecutorState {
    query_stats: HashMap<String, QueryStats>,
    slow_queries: VecDeque<SlowQuery>,
}

/// Orchestrates [`ConnectionPool`] and [`ResponseCache`] for store queries:
/// check the cache, on miss acquire / execute / release, cache the result,
/// record timing.
pub struct CachingQueryExecutor {
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    config: ExecutorConfig,
    state: Mutex<ExecutorState>,
}

impl CachingQueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>, cache: Arc<ResponseCache>, config: ExecutorConfig) -> Self {
        Self {
            pool,
            cache,
            config,
            state: Mutex::new(ExecutorState {
                query_stats: HashMap::new(),
                slow_queries: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a read statement through the cache. On a hit no connection is
    /// acquired; on a miss the borrowed connection is released whether the
    /// query succeeds or fails, and the result is cached under `ttl`.
    pub async fn execute_with_cache(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
    ) -> Result<Vec<Row>> {
        let started = Instant::now();
        let normalized = normalize_query(sql);
        let key = CacheKey::query(&normalized, params);

        if let Some(rows) = self.cache.get::<Vec<Row>>(&key) {
            self.record(&normalized, started.elapsed(), true);
            debug!(query = %truncate(&normalized), "query served from cache");
            return Ok(rows);
        }

        // pool.query releases the connection on both paths before returning.
        let rows = self.pool.query(sql, params).await?;
        let elapsed = started.elapsed();

        self.cache
            .set(&key, &rows, Some(ttl.unwrap_or(self.config.default_ttl)))?;
        self.record(&normalized, elapsed, false);

        if elapsed > self.config.slow_query_threshold {
            let mut st = self.state.lock().unwrap();
            st.slow_queries.push_back(SlowQuery {
                query: truncate(&normalized),
                execution_ms: elapsed.as_millis() as u64,
                recorded_at: SystemTime::now(),
            });
            while st.slow_queries.len() > self.config.slow_query_capacity {
                st.slow_queries.pop_front();
            }
            warn!(
                query = %truncate(&normalized),
                execution_ms = elapsed.as_millis() as u64,
                "slow query"
            );
        }

        Ok(rows)
    }

    /// Remove cached results whose key contains the fragment.
    pub fn invalidate(&self, fragment: &str) -> usize {
        self.cache.invalidate(fragment)
    }

    /// Warm the cache with frequently accessed statements. Failures are
    /// logged and skipped; returns how many preloaded successfully.
    pub async fn preload(&self, queries: &[PreloadQuery]) -> usize {
        let mut loaded = 0usize;
        for preload in queries {
            match self
                .execute_with_cache(&preload.sql, &preload.params, preload.ttl)
                .await
            {
                Ok(_) => loaded += 1,
                Err(e) => warn!(query = %truncate(&preload.sql), error = %e, "preload failed"),
            }
        }
        debug!(loaded, requested = queries.len(), "preload completed");
        loaded
    }

    pub fn query_report(&self) -> QueryReport {
        let st = self.state.lock().unwrap();
        let mut by_count: Vec<QueryStats> = st.query_stats.values().cloned().collect();
        let mut by_avg = by_count.clone();
        by_count.sort_by(|a, b| b.count.cmp(&a.count));
        by_avg.sort_by(|a, b| b.avg_time_ms.total_cmp(&a.avg_time_ms));
        by_count.truncate(10);
        by_avg.truncate(10);
        QueryReport {
            tracked_queries: st.query_stats.len(),
            slow_queries: st.slow_queries.iter().cloned().collect(),
            top_queries: by_count,
            slowest_queries: by_avg,
            cache: self.cache.stats(),
        }
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let report = self.query_report();
        let cache = &report.cache;
        let average_execution_ms = if report.top_queries.is_empty() {
            0.0
        } else {
            report.top_queries.iter().map(|q| q.avg_time_ms).sum::<f64>()
                / report.top_queries.len() as f64
        };

        let mut recommendations = Vec::new();
        if cache.hit_rate() < 0.5 && cache.total_requests > 0 {
            recommendations
                .push("Consider increasing cache TTL for frequently accessed data".to_string());
        }
        if report.slow_queries.len() > 10 {
            recommendations.push(
                "Multiple slow queries detected - consider adding database indexes".to_string(),
            );
        }
        if cache.memory_bytes > 100 * 1024 * 1024 {
            recommendations.push(
                "Cache memory usage is high - consider reducing cache size or TTL".to_string(),
            );
        }

        PerformanceReport {
            cache_hit_rate: cache.hit_rate(),
            cache_total_requests: cache.total_requests,
            cache_entries: cache.entries,
            cache_memory_bytes: cache.memory_bytes,
            tracked_queries: report.tracked_queries,
            slow_query_count: report.slow_queries.len(),
            average_execution_ms,
            recommendations,
        }
    }

    fn record(&self, normalized: &str, elapsed: Duration, from_cache: bool) {
        let digest = hex_digest(normalized);
        let mut st = self.state.lock().unwrap();
        let stats = st
            .query_stats
            .entry(digest)
            .or_insert_with(|| QueryStats {
                query: truncate(normalized),
                count: 0,
                total_time_ms: 0,
                avg_time_ms: 0.0,
                cache_hits: 0,
            });
        stats.count += 1;
        stats.total_time_ms += elapsed.as_millis() as u64;
        stats.avg_time_ms = stats.total_time_ms as f64 / stats.count as f64;
        if from_cache {
            stats.cache_hits += 1;
        }
    }
}

fn truncate(query: &str) -> String {
    query.chars().take(QUERY_DISPLAY_CHARS).collect()
}
