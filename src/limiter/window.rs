//! Fixed-window rate limiting with escalating blocks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Fixed window over which requests are counted per identity.
    pub window: Duration,
    /// Ceiling applied when a call site does not pass its own.
    pub default_limit: u32,
    /// How long an identity that hit `2 * limit` stays blocked. Independent
    /// of window resets.
    pub block_duration: Duration,
    /// Cadence of the cleanup pass run by the owning service.
    pub cleanup_interval: Duration,
    /// Tighter ceiling for LLM calls.
    pub ai_limit: u32,
    /// Tightest ceiling, for voice synthesis.
    pub voice_limit: u32,
    /// Looser ceiling for plain data reads.
    pub read_limit: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        let window = Duration::from_secs(60);
        Self {
            window,
            default_limit: 100,
            block_duration: window * 5,
            cleanup_interval: Duration::from_secs(60),
            ai_limit: 20,
            voice_limit: 10,
            read_limit: 200,
        }
    }
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit;
        self
    }
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
    pub fn with_ai_limit(mut self, limit: u32) -> Self {
        self.ai_limit = limit;
        self
    }
    pub fn with_voice_limit(mut self, limit: u32) -> Self {
        self.voice_limit = limit;
        self
    }
    pub fn with_read_limit(mut self, limit: u32) -> Self {
        self.read_limit = limit;
        self
    }
}

/// Why a request was denied. Denial is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The identity is in the blocked set; block checks precede window checks.
    Blocked,
    /// The window count reached the limit.
    LimitExceeded,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::Blocked => write!(f, "blocked"),
            DenyReason::LimitExceeded => write!(f, "rate limit exceeded"),
        }
    }
}

/// Outcome of a rate-limit check. Callers branch on `allowed` instead of
/// catching anything.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window when allowed; 0 when denied.
    pub remaining: u32,
    /// Time until the window (or block) expires.
    pub reset_after: Duration,
    pub reason: Option<DenyReason>,
}

/// Non-mutating projection of one identity's current standing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IdentityStatus {
    pub count: u32,
    pub remaining: u32,
    pub blocked: bool,
    pub reset_after_ms: u64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LimiterStats {
    pub active_identities: usize,
    pub blocked_identities: usize,
    pub total_allowed: u64,
    pub total_denied: u64,
    pub total_blocks: u64,
    pub avg_requests_per_identity: f64,
}

struct Window {
    count: u32,
    reset_at: Instant,
}

struct LimiterState {
    windows: HashMap<String, Window>,
    blocked: HashMap<String, Instant>,
    total_allowed: u64,
    total_denied: u64,
    total_blocks: u64,
}

/// Per-identity request throttling over rolling fixed windows.
///
/// One general limit plus tighter per-operation-class ceilings layered on
/// top by the `check_*` helpers; the mechanism is identical, only the
/// threshold differs. An identity that reaches twice its limit within one
/// window is blocked outright for `block_duration`, surviving window resets.
pub struct RateLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                blocked: HashMap::new(),
                total_allowed: 0,
                total_denied: 0,
                total_blocks: 0,
            }),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Check and count one request from `identity` against `limit`.
    ///
    /// Denied requests still advance the window count; that is what lets a
    /// misbehaving identity reach `2 * limit` and trip the block.
    pub fn check(&self, identity: &str, limit: u32) -> RateDecision {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();

        if let Some(&until) = st.blocked.get(identity) {
            if now < until {
                st.total_denied += 1;
                return RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_after: until - now,
                    reason: Some(DenyReason::Blocked),
                };
            }
            st.blocked.remove(identity);
        }

        let window_len = self.config.window;
        let window = st
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + window_len,
            });
        if now > window.reset_at {
            window.count = 0;
            window.reset_at = now + window_len;
        }
        window.count += 1;
        let count = window.count;
        let reset_after = window.reset_at.saturating_duration_since(now);

        if count > limit {
            let escalate = count >= limit.saturating_mul(2);
            if escalate {
                st.blocked
                    .insert(identity.to_string(), now + self.config.block_duration);
                st.total_blocks += 1;
                warn!(identity, count, limit, "identity blocked for sustained abuse");
            }
            st.total_denied += 1;
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
                reason: Some(DenyReason::LimitExceeded),
            };
        }

        st.total_allowed += 1;
        RateDecision {
            allowed: true,
            remaining: limit - count,
            reset_after,
            reason: None,
        }
    }

    pub fn check_default(&self, identity: &str) -> RateDecision {
        self.check(identity, self.config.default_limit)
    }

    pub fn check_ai(&self, identity: &str) -> RateDecision {
        self.check(identity, self.config.ai_limit)
    }

    pub fn check_voice(&self, identity: &str) -> RateDecision {
        self.check(identity, self.config.voice_limit)
    }

    pub fn check_read(&self, identity: &str) -> RateDecision {
        self.check(identity, self.config.read_limit)
    }

    /// Current standing of an identity without mutating any state. An
    /// already-expired window reads as a fresh one.
    pub fn status(&self, identity: &str) -> IdentityStatus {
        let now = Instant::now();
        let st = self.state.lock().unwrap();
        let blocked = st
            .blocked
            .get(identity)
            .map(|&until| now < until)
            .unwrap_or(false);
        let (count, reset_after) = match st.windows.get(identity) {
            Some(w) if now <= w.reset_at => (w.count, w.reset_at - now),
            _ => (0, self.config.window),
        };
        IdentityStatus {
            count,
            remaining: self.config.default_limit.saturating_sub(count),
            blocked,
            reset_after_ms: reset_after.as_millis() as u64,
        }
    }

    /// Administrative override: clear both the window and any block.
    pub fn reset(&self, identity: &str) {
        let mut st = self.state.lock().unwrap();
        st.windows.remove(identity);
        st.blocked.remove(identity);
        debug!(identity, "rate limiter state reset");
    }

    /// One cleanup pass: drop expired windows and expired blocks so memory
    /// stays bounded by the live identity population.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();
        let before = st.windows.len() + st.blocked.len();
        st.windows.retain(|_, w| now <= w.reset_at);
        st.blocked.retain(|_, &mut until| now < until);
        let removed = before - (st.windows.len() + st.blocked.len());
        if removed > 0 {
            debug!(removed, active = st.windows.len(), "rate limiter cleanup");
        }
        removed
    }

    pub fn stats(&self) -> LimiterStats {
        let now = Instant::now();
        let st = self.state.lock().unwrap();
        let active = st.windows.len();
        let total_count: u64 = st.windows.values().map(|w| w.count as u64).sum();
        LimiterStats {
            active_identities: active,
            blocked_identities: st.blocked.values().filter(|&&u| now < u).count(),
            total_allowed: st.total_allowed,
            total_denied: st.total_denied,
            total_blocks: st.total_blocks,
            avg_requests_per_identity: if active == 0 {
                0.0
            } else {
                total_count as f64 / active as f64
            },
        }
    }
}
