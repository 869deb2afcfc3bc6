use std::time::Duration;
use thiserror::Error;

/// Unified error type for the resource-management runtime.
///
/// Only genuine faults become errors. The two expected, frequent outcomes,
/// a cache miss and a rate-limit denial, are ordinary return values
/// (`Option` and [`crate::limiter::RateDecision`] respectively), so callers
/// branch on them without exception-style control flow.
#[derive(Debug, Error)]
pub enum Error {
    /// A queued acquisition waited longer than the configured acquire
    /// timeout. Retryable by the caller; the pool never retries internally.
    #[error("timed out waiting for a pooled connection after {}ms", .waited.as_millis())]
    AcquireTimeout { waited: Duration },

    /// The pool has been closed; no further acquisitions are served.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Establishing a backing-store connection failed. Pool bookkeeping is
    /// unaffected: the failed attempt is not counted as a created connection.
    #[error("backing store connection failed: {message}")]
    Connect { message: String },

    /// The backing store rejected a statement. The borrowed connection is
    /// always released before this propagates.
    #[error("query failed: {message}")]
    Query { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn connect(message: impl Into<String>) -> Self {
        Error::Connect {
            message: message.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AcquireTimeout { .. })
    }
}
