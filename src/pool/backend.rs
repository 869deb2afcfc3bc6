//! Backing-store seam.
//!
//! The pool is agnostic to the actual store: it hands out connections that
//! implement [`StoreConnection`], produced by a [`StoreBackend`]. The crate
//! ships [`MemoryStore`], a programmable in-memory implementation used by the
//! tests and the demo; real deployments plug in a driver-backed
//! implementation behind the same pair of traits.

use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A single result row. Rows are schemaless JSON objects so the pool stays
/// independent of any particular driver's row type.
pub type Row = Value;

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct UpdateResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Factory for backing-store sessions. Establishment is asynchronous and may
/// fail; the pool surfaces that failure to the caller of `acquire`.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;
    fn name(&self) -> &'static str;
}

/// A live backing-store session. The pool guarantees at most one logical
/// caller uses a connection at a time.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>>;
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<UpdateResult>;
}

struct MemoryInner {
    results: RwLock<HashMap<String, Vec<Row>>>,
    failing: RwLock<HashSet<String>>,
}

/// In-memory backing store with canned results.
///
/// Results are registered per statement text. Latency and failures are
/// injectable, which is what the integration tests lean on for the
/// slow-query and guaranteed-release properties.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
    latency: Duration,
    refuse_connections: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                results: RwLock::new(HashMap::new()),
                failing: RwLock::new(HashSet::new()),
            }),
            latency: Duration::ZERO,
            refuse_connections: false,
        }
    }

    /// Register the rows returned for an exact statement text.
    pub fn with_rows(self, sql: impl Into<String>, rows: Vec<Row>) -> Self {
        self.inner.results.write().unwrap().insert(sql.into(), rows);
        self
    }

    /// Make an exact statement text fail with a query error.
    pub fn with_failure(self, sql: impl Into<String>) -> Self {
        self.inner.failing.write().unwrap().insert(sql.into());
        self
    }

    /// Simulated per-statement execution latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Refuse all connection attempts, for establishment-failure tests.
    pub fn with_connect_failure(mut self) -> Self {
        self.refuse_connections = true;
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        if self.refuse_connections {
            return Err(Error::connect("memory store refused the connection"));
        }
        Ok(Box::new(MemoryConnection {
            inner: self.inner.clone(),
            latency: self.latency,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    inner: Arc<MemoryInner>,
    latency: Duration,
}

impl MemoryConnection {
    async fn run(&self, sql: &str) -> Result<Vec<Row>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.inner.failing.read().unwrap().contains(sql) {
            return Err(Error::query(format!("injected failure for: {sql}")));
        }
        Ok(self
            .inner
            .results
            .read()
            .unwrap()
            .get(sql)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.run(sql).await
    }

    async fn query_one(&self, sql: &str, _params: &[Value]) -> Result<Option<Row>> {
        Ok(self.run(sql).await?.into_iter().next())
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<UpdateResult> {
        self.run(sql).await?;
        Ok(UpdateResult {
            rows_affected: 1,
            last_insert_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn canned_rows_round_trip() {
        let store =
            MemoryStore::new().with_rows("SELECT 1", vec![json!({"one": 1}), json!({"one": 2})]);
        let conn = store.connect().await.unwrap();
        let rows = conn.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        let first = conn.query_one("SELECT 1", &[]).await.unwrap();
        assert_eq!(first, Some(json!({"one": 1})));
        assert!(conn.query("SELECT 2", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_query_errors() {
        let store = MemoryStore::new().with_failure("DROP TABLE users");
        let conn = store.connect().await.unwrap();
        let err = conn.query("DROP TABLE users", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Query { .. }));
    }

    #[tokio::test]
    async fn refused_connections_surface_as_connect_errors() {
        let store = MemoryStore::new().with_connect_failure();
        match store.connect().await {
            Ok(_) => panic!("connection should have been refused"),
            Err(err) => assert!(matches!(err, Error::Connect { .. })),
        }
    }
}
