//! Per-identity rate limiting.
//!
//! A [`RateLimiter`] counts requests per identity over a fixed window, with
//! tighter ceilings layered on for expensive operation classes and an
//! escalating block for identities that reach twice their limit. Denial is a
//! plain [`RateDecision`] value rather than an error, so throttling composes
//! with request handling without exception-style control flow.
//!
//! ## Example
//!
//! ```rust
//! use resman::limiter::{LimiterConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(LimiterConfig::new().with_default_limit(50));
//! let decision = limiter.check_default("user-42");
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 49);
//! ```

mod window;

pub use window::{
    DenyReason, IdentityStatus, LimiterConfig, LimiterStats, RateDecision, RateLimiter,
};
