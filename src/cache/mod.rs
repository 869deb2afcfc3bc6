//! Response caching.
//!
//! A [`ResponseCache`] memoizes named values under a total-entry ceiling
//! with independent per-entry TTLs. Expired entries are removed lazily on
//! read and proactively by a periodic sweep; capacity pressure evicts the
//! least-recently-accessed entry. Running hit/miss/eviction counters feed
//! the operational health payload.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResponseCache`] | TTL store with LRA eviction and statistics |
//! | [`CacheConfig`] | Capacity, default TTL, sweep cadence |
//! | [`CacheKey`] | Deterministic `namespace:scope:params` key construction |
//! | [`CacheStats`] | Read-only counters with `hit_rate()` |
//!
//! ## Example
//!
//! ```rust
//! use resman::cache::{CacheConfig, CacheKey, ResponseCache};
//! use std::time::Duration;
//!
//! let cache = ResponseCache::new(CacheConfig::new().with_max_entries(500));
//! let key = CacheKey::ai_response("user-42", "what are my IFTA deadlines?");
//! cache.set(&key, &"quarterly, next on Oct 31", Some(Duration::from_secs(300))).unwrap();
//! assert!(cache.get::<String>(&key).is_some());
//! ```

mod key;
mod store;

pub use key::{normalize_query, CacheKey};
pub(crate) use key::hex_digest;
pub use store::{CacheConfig, CacheStats, ResponseCache};
