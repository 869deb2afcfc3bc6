//! TTL response cache with least-recently-accessed eviction.

use super::key::CacheKey;
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default TTLs for the domain-specific wrappers.
const AI_RESPONSE_TTL: Duration = Duration::from_secs(300);
const API_KEY_TTL: Duration = Duration::from_secs(3600);
const VOICE_PREFERENCE_TTL: Duration = Duration::from_secs(1800);
const CONVERSATION_HISTORY_TTL: Duration = Duration::from_secs(600);
const COMMON_RESPONSE_TTL: Duration = Duration::from_secs(1800);

/// Fixed accounting overhead per entry in the memory estimate.
const ENTRY_OVERHEAD_BYTES: usize = 48;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total-entry ceiling; inserting past it evicts the least recently
    /// accessed entry.
    pub max_entries: usize,
    /// TTL applied when the caller does not supply one.
    pub default_ttl: Duration,
    /// Cadence of the expiry sweep run by the owning service.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Read-only cache snapshot. `evictions` counts both expiry-driven removal
/// (lazy and swept) and capacity-driven eviction.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_requests: u64,
    pub decode_errors: u64,
    pub entries: usize,
    pub memory_bytes: usize,
}

impl CacheStats {
    /// Hits over total requests; 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total_requests: AtomicU64,
    decode_errors: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.total_requests.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
    }
}

struct Entry {
    data: Vec<u8>,
    expires_at: Instant,
    last_accessed: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Size-bounded key/value store with per-entry TTLs.
///
/// Expiry works through two independent mechanisms: a lazy check on every
/// `get`, and the periodic [`sweep_expired`](Self::sweep_expired) pass that
/// bounds memory regardless of access pattern. Capacity pressure evicts the
/// single least-recently-accessed entry per insert.
pub struct ResponseCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, Entry>>,
    stats: AtomicStats,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            stats: AtomicStats::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Unconditional upsert. Inserting a new key at capacity first evicts
    /// the least-recently-accessed entry.
    pub fn set_bytes(&self, key: &CacheKey, data: Vec<u8>, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(key.as_str()) && entries.len() >= self.config.max_entries {
            self.evict_least_recently_accessed(&mut entries);
        }
        entries.insert(
            key.as_str().to_string(),
            Entry {
                data,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
    }

    /// Fetch a live entry's payload. An expired entry is deleted on the
    /// spot and counted as both a miss and an eviction.
    pub fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(key.as_str()) {
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key.as_str());
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_accessed = now;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.set_bytes(key, serde_json::to_vec(value)?, ttl);
        Ok(())
    }

    /// Typed fetch. A payload that no longer deserializes reads as a miss
    /// and bumps the decode-error counter.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let data = self.get_bytes(key)?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "cached payload failed to decode");
                None
            }
        }
    }

    /// Remove every entry whose key contains the given fragment. Returns how
    /// many were removed.
    pub fn invalidate(&self, fragment: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|k, _| !k.contains(fragment));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(fragment, removed, "invalidated cache entries");
        }
        removed
    }

    /// Drop everything scoped to one user.
    pub fn clear_user(&self, user_id: &str) -> usize {
        self.invalidate(&format!(":{user_id}:"))
    }

    /// One expiry sweep: proactively removes expired entries so memory stays
    /// bounded even without reads. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = entries.len(), "swept expired entries");
        }
        removed
    }

    /// Live-entry count: expired-but-unswept entries are not counted, so the
    /// figure always matches what `get` can actually return.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and reset all counters.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.stats.reset();
        debug!("cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        let mut live = 0usize;
        let mut memory_bytes = 0usize;
        for (key, entry) in entries.iter() {
            if !entry.is_expired(now) {
                live += 1;
                memory_bytes += key.len() + entry.data.len() + ENTRY_OVERHEAD_BYTES;
            }
        }
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            decode_errors: self.stats.decode_errors.load(Ordering::Relaxed),
            entries: live,
            memory_bytes,
        }
    }

    fn evict_least_recently_accessed(&self, entries: &mut HashMap<String, Entry>) {
        // O(n) scan; acceptable at the target scale of a few thousand entries.
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Domain-specific key conventions over set/get.

    pub fn cache_ai_response<T: Serialize>(
        &self,
        user_id: &str,
        message: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.set(
            &CacheKey::ai_response(user_id, message),
            value,
            Some(ttl.unwrap_or(AI_RESPONSE_TTL)),
        )
    }

    pub fn cached_ai_response<T: DeserializeOwned>(
        &self,
        user_id: &str,
        message: &str,
    ) -> Option<T> {
        self.get(&CacheKey::ai_response(user_id, message))
    }

    pub fn cache_api_key(&self, provider: &str, key: &str) -> Result<()> {
        self.set(&CacheKey::api_key(provider), &key, Some(API_KEY_TTL))
    }

    pub fn cached_api_key(&self, provider: &str) -> Option<String> {
        self.get(&CacheKey::api_key(provider))
    }

    pub fn cache_voice_preference(&self, user_id: &str, voice: &str) -> Result<()> {
        self.set(
            &CacheKey::voice_preference(user_id),
            &voice,
            Some(VOICE_PREFERENCE_TTL),
        )
    }

    pub fn cached_voice_preference(&self, user_id: &str) -> Option<String> {
        self.get(&CacheKey::voice_preference(user_id))
    }

    pub fn cache_conversation_history<T: Serialize>(
        &self,
        user_id: &str,
        conversation_id: &str,
        history: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.set(
            &CacheKey::conversation_history(user_id, conversation_id),
            history,
            Some(ttl.unwrap_or(CONVERSATION_HISTORY_TTL)),
        )
    }

    pub fn cached_conversation_history<T: DeserializeOwned>(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Option<T> {
        self.get(&CacheKey::conversation_history(user_id, conversation_id))
    }

    pub fn cache_common_response<T: Serialize>(&self, template: &str, value: &T) -> Result<()> {
        self.set(
            &CacheKey::common_response(template),
            value,
            Some(COMMON_RESPONSE_TTL),
        )
    }

    pub fn cached_common_response<T: DeserializeOwned>(&self, template: &str) -> Option<T> {
        self.get(&CacheKey::common_response(template))
    }
}
