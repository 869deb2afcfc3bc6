//! # resman
//!
//! In-process resource-management runtime for single-process backends that
//! serve many concurrent callers: a bounded database-connection pool, a
//! TTL response cache, a multi-tier rate limiter, and a cache-aware query
//! executor composing them.
//!
//! ## Overview
//!
//! A single backend process handling both human users and automated AI
//! callers needs three guarantees: it never exhausts backing-store handles,
//! it never re-issues identical expensive calls, and bursts of traffic never
//! starve it. `resman` provides exactly that layer:
//!
//! - **Bounded acquisition**: at most N connections are busy at once; excess
//!   demand queues FIFO up to a timeout rather than failing immediately.
//! - **Memoization**: expensive responses are cached with per-entry TTLs
//!   under a capacity ceiling, evicting the least-recently-accessed entry.
//! - **Layered throttling**: per-identity fixed windows with tighter
//!   ceilings for expensive operation classes and an escalating block for
//!   sustained abuse.
//! - **Observability**: every component exposes a read-only statistics
//!   snapshot, aggregated into one serializable health payload.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pool`] | Bounded connection pool with FIFO wait queue and idle reclamation |
//! | [`cache`] | TTL response cache with least-recently-accessed eviction |
//! | [`limiter`] | Per-identity fixed-window rate limiting with escalating blocks |
//! | [`executor`] | Cache-aware, instrumented query execution |
//! | [`service`] | Orchestration, maintenance tasks, aggregated health |
//!
//! ## Quick Start
//!
//! ```rust
//! use resman::pool::MemoryStore;
//! use resman::service::{ResourceConfig, ResourceManager};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> resman::Result<()> {
//!     let manager = ResourceManager::new(
//!         ResourceConfig::new(),
//!         Box::new(MemoryStore::new()),
//!     );
//!     manager.start();
//!
//!     let decision = manager.admit_ai_request("user-42");
//!     if decision.allowed {
//!         // Call the expensive service, then memoize the answer.
//!         manager.store_answer("user-42", "what can you do?", &"plenty", None)?;
//!     }
//!
//!     manager.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! Every component owns its state behind a single lock that is never held
//! across an await point: each public operation is one atomic state
//! transition. Only `acquire` and query execution suspend. Waiting
//! acquirers are served strictly FIFO relative to releases, and a queued
//! waiter is resolved exactly once: granted or timed out, never both.

pub mod cache;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod pool;
pub mod service;

pub use error::Error;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
pub use executor::{CachingQueryExecutor, ExecutorConfig, PreloadQuery};
pub use limiter::{DenyReason, LimiterConfig, RateDecision, RateLimiter};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use service::{HealthReport, ResourceConfig, ResourceManager};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
