//! Bounded connection pool with FIFO queuing.

use super::backend::{Row, StoreBackend, StoreConnection, UpdateResult};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pool sizing and timing knobs, supplied once at startup.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard ceiling on concurrently established connections. Clamped to at
    /// least 1 at construction.
    pub max_connections: usize,
    /// Floor kept alive by idle reclamation. Purely a reclamation floor,
    /// never a growth target; clamped to `max_connections` at construction.
    pub min_connections: usize,
    /// Connections pre-established by [`ConnectionPool::warm`].
    pub warm_connections: usize,
    /// Idle time after which a connection becomes eligible for reclamation.
    pub idle_timeout: Duration,
    /// How long a queued acquisition waits before failing.
    pub acquire_timeout: Duration,
    /// Cadence of the reclamation pass run by the owning service.
    pub reclaim_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            warm_connections: 5,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
            reclaim_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }
    pub fn with_warm_connections(mut self, warm: usize) -> Self {
        self.warm_connections = warm;
        self
    }
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }
}

/// A borrowed backing-store connection. Callers must hand it back with
/// [`ConnectionPool::release`]; the query helpers on the pool do so
/// automatically.
pub struct PooledConnection {
    id: Uuid,
    store: Arc<dyn StoreConnection>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.store.query(sql, params).await
    }

    pub async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        self.store.query_one(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<UpdateResult> {
        self.store.execute(sql, params).await
    }
}

/// Read-only pool snapshot for capacity planning.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub active_connections: usize,
    pub available_connections: usize,
    pub waiting_requests: usize,
    pub total_connections: u64,
    pub total_requests: u64,
    pub acquire_timeouts: u64,
    pub reclaimed_connections: u64,
    pub average_wait_ms: f64,
}

struct Slot {
    id: Uuid,
    store: Arc<dyn StoreConnection>,
    last_used: Instant,
    busy: bool,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<PooledConnection>,
}

struct PoolState {
    slots: Vec<Slot>,
    pending_connects: usize,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    closed: bool,
    total_created: u64,
    total_requests: u64,
    acquire_timeouts: u64,
    reclaimed: u64,
    average_wait_ms: f64,
}

enum AcquirePlan {
    Ready(PooledConnection),
    Connect,
    Wait(oneshot::Receiver<PooledConnection>, u64),
}

/// Hands out at most `max_connections` concurrently busy connections,
/// growing on demand and queuing excess demand FIFO up to a timeout.
///
/// Queuing is the pool's backpressure mechanism: saturation defers demand
/// rather than rejecting it outright.
pub struct ConnectionPool {
    config: PoolConfig,
    backend: Box<dyn StoreBackend>,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(mut config: PoolConfig, backend: Box<dyn StoreBackend>) -> Self {
        // Normalize rather than reject: the floor is advisory and must never
        // exceed the ceiling, and a ceiling of zero would deadlock everything.
        config.max_connections = config.max_connections.max(1);
        config.min_connections = config.min_connections.min(config.max_connections);
        Self {
            config,
            backend,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                pending_connects: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                closed: false,
                total_created: 0,
                total_requests: 0,
                acquire_timeouts: 0,
                reclaimed: 0,
                average_wait_ms: 0.0,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pre-establish `warm_connections` connections so early traffic does not
    /// pay the establishment cost. Returns how many were created.
    pub async fn warm(&self) -> Result<usize> {
        let target = self.config.warm_connections.min(self.config.max_connections);
        let mut created = 0usize;
        loop {
            {
                let mut st = self.state.lock().unwrap();
                if st.closed {
                    return Err(Error::PoolClosed);
                }
                if st.slots.len() + st.pending_connects >= target {
                    break;
                }
                st.pending_connects += 1;
            }
            let conn = self.establish().await?;
            self.release(&conn);
            created += 1;
        }
        if created > 0 {
            info!(
                created,
                backend = self.backend.name(),
                "warmed connection pool"
            );
        }
        Ok(created)
    }

    /// Borrow a connection. Reuses an idle one, grows the pool when below the
    /// ceiling, or waits in FIFO order otherwise. Fails with
    /// [`Error::AcquireTimeout`] when no release arrives within the acquire
    /// timeout.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let plan = {
            let mut st = self.state.lock().unwrap();
            if st.closed {
                return Err(Error::PoolClosed);
            }
            st.total_requests += 1;
            if let Some(slot) = st.slots.iter_mut().find(|s| !s.busy) {
                slot.busy = true;
                slot.last_used = Instant::now();
                AcquirePlan::Ready(PooledConnection {
                    id: slot.id,
                    store: slot.store.clone(),
                })
            } else if st.slots.len() + st.pending_connects < self.config.max_connections {
                st.pending_connects += 1;
                AcquirePlan::Connect
            } else {
                let (tx, rx) = oneshot::channel();
                let id = st.next_waiter_id;
                st.next_waiter_id += 1;
                st.waiters.push_back(Waiter { id, tx });
                AcquirePlan::Wait(rx, id)
            }
        };

        match plan {
            AcquirePlan::Ready(conn) => {
                self.record_wait(started.elapsed());
                Ok(conn)
            }
            AcquirePlan::Connect => {
                let conn = self.establish().await?;
                self.record_wait(started.elapsed());
                Ok(conn)
            }
            AcquirePlan::Wait(mut rx, waiter_id) => {
                let sleep = tokio::time::sleep(self.config.acquire_timeout);
                tokio::pin!(sleep);
                tokio::select! {
                    granted = &mut rx => match granted {
                        Ok(conn) => {
                            self.record_wait(started.elapsed());
                            Ok(conn)
                        }
                        Err(_) => Err(Error::PoolClosed),
                    },
                    _ = &mut sleep => {
                        let still_queued = {
                            let mut st = self.state.lock().unwrap();
                            let before = st.waiters.len();
                            st.waiters.retain(|w| w.id != waiter_id);
                            let removed = st.waiters.len() < before;
                            if removed {
                                st.acquire_timeouts += 1;
                            }
                            removed
                        };
                        if still_queued {
                            warn!(
                                waited_ms = started.elapsed().as_millis() as u64,
                                "acquisition timed out in the wait queue"
                            );
                            Err(Error::AcquireTimeout { waited: started.elapsed() })
                        } else {
                            // A release granted us the connection as the timer
                            // fired. The grant wins; resolution stays exactly-once.
                            match rx.await {
                                Ok(conn) => {
                                    self.record_wait(started.elapsed());
                                    Ok(conn)
                                }
                                Err(_) => Err(Error::PoolClosed),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Return a borrowed connection. A no-op when the connection is not
    /// currently tracked as busy. If waiters are queued, the oldest one gets
    /// this connection directly, never observing it as idle.
    pub fn release(&self, conn: &PooledConnection) {
        let mut st = self.state.lock().unwrap();
        let Some(idx) = st.slots.iter().position(|s| s.id == conn.id) else {
            return;
        };
        if !st.slots[idx].busy {
            return;
        }
        st.slots[idx].last_used = Instant::now();
        while let Some(waiter) = st.waiters.pop_front() {
            let handle = PooledConnection {
                id: st.slots[idx].id,
                store: st.slots[idx].store.clone(),
            };
            if waiter.tx.send(handle).is_ok() {
                // Handed straight to the oldest waiter; the slot stays busy.
                return;
            }
            // That waiter already timed out or was dropped; try the next.
        }
        st.slots[idx].busy = false;
    }

    /// One reclamation pass: close connections idle past `idle_timeout`,
    /// never dropping the pool below `min_connections`. Busy connections are
    /// never considered. Returns how many were closed.
    pub fn reclaim_idle(&self) -> usize {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return 0;
        }
        let now = Instant::now();
        let mut removed = 0usize;
        let mut i = 0;
        while i < st.slots.len() {
            if st.slots.len() <= self.config.min_connections {
                break;
            }
            let slot = &st.slots[i];
            if !slot.busy && now.duration_since(slot.last_used) > self.config.idle_timeout {
                st.slots.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        if removed > 0 {
            st.reclaimed += removed as u64;
            debug!(
                removed,
                pool_size = st.slots.len(),
                "reclaimed idle connections"
            );
        }
        removed
    }

    /// Acquire, run one read statement, release. Release happens on both the
    /// success and failure paths.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.acquire().await?;
        let result = conn.query(sql, params).await;
        self.release(&conn);
        result
    }

    /// Like [`query`](Self::query) but returns at most one row.
    pub async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let conn = self.acquire().await?;
        let result = conn.query_one(sql, params).await;
        self.release(&conn);
        result
    }

    /// Acquire, run one mutating statement, release.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<UpdateResult> {
        let conn = self.acquire().await?;
        let result = conn.execute(sql, params).await;
        self.release(&conn);
        result
    }

    pub fn stats(&self) -> PoolStats {
        let st = self.state.lock().unwrap();
        let active = st.slots.iter().filter(|s| s.busy).count();
        PoolStats {
            pool_size: st.slots.len(),
            active_connections: active,
            available_connections: st.slots.len() - active,
            waiting_requests: st.waiters.len(),
            total_connections: st.total_created,
            total_requests: st.total_requests,
            acquire_timeouts: st.acquire_timeouts,
            reclaimed_connections: st.reclaimed,
            average_wait_ms: st.average_wait_ms,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Shut the pool down. Queued waiters observe [`Error::PoolClosed`];
    /// connections are dropped.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return;
        }
        st.closed = true;
        st.waiters.clear();
        st.slots.clear();
        info!("connection pool closed");
    }

    /// Establish one connection under a previously reserved creation slot and
    /// return it busy. A failed attempt releases the reservation and is never
    /// counted as a created connection.
    async fn establish(&self) -> Result<PooledConnection> {
        match self.backend.connect().await {
            Ok(store) => {
                let store: Arc<dyn StoreConnection> = Arc::from(store);
                let id = Uuid::new_v4();
                let mut st = self.state.lock().unwrap();
                st.pending_connects -= 1;
                if st.closed {
                    return Err(Error::PoolClosed);
                }
                st.slots.push(Slot {
                    id,
                    store: store.clone(),
                    last_used: Instant::now(),
                    busy: true,
                });
                st.total_created += 1;
                debug!(pool_size = st.slots.len(), "established connection");
                Ok(PooledConnection { id, store })
            }
            Err(e) => {
                let mut st = self.state.lock().unwrap();
                st.pending_connects -= 1;
                warn!(error = %e, "backing store connection failed");
                Err(e)
            }
        }
    }

    fn record_wait(&self, waited: Duration) {
        let mut st = self.state.lock().unwrap();
        let sample = waited.as_secs_f64() * 1000.0;
        st.average_wait_ms = (st.average_wait_ms + sample) / 2.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryStore;

    fn pool(max: usize) -> ConnectionPool {
        ConnectionPool::new(
            PoolConfig::new()
                .with_max_connections(max)
                .with_acquire_timeout(Duration::from_millis(100)),
            Box::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn undersized_configs_are_normalized() {
        // A ceiling below the default floor clamps the floor, not the ceiling.
        let small = pool(1);
        assert_eq!(small.config().max_connections, 1);
        assert_eq!(small.config().min_connections, 1);

        let zero = ConnectionPool::new(
            PoolConfig::new().with_max_connections(0),
            Box::new(MemoryStore::new()),
        );
        assert_eq!(zero.config().max_connections, 1);
        let conn = zero.acquire().await.unwrap();
        zero.release(&conn);
    }

    #[tokio::test]
    async fn released_connections_are_reused() {
        let pool = pool(1);
        let a = pool.acquire().await.unwrap();
        let first_id = a.id();
        pool.release(&a);
        let b = pool.acquire().await.unwrap();
        assert_eq!(b.id(), first_id);
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn connection_handles_debug_format_with_their_id() {
        let pool = pool(1);
        let conn = pool.acquire().await.unwrap();
        let rendered = format!("{conn:?}");
        assert!(rendered.contains("PooledConnection"));
        assert!(rendered.contains(&conn.id().to_string()));
        pool.release(&conn);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = pool(2);
        let a = pool.acquire().await.unwrap();
        pool.release(&a);
        pool.release(&a);
        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.available_connections, 1);
    }

    #[tokio::test]
    async fn establishment_failure_leaves_bookkeeping_clean() {
        let pool = ConnectionPool::new(
            PoolConfig::new().with_max_connections(2),
            Box::new(MemoryStore::new().with_connect_failure()),
        );
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        let stats = pool.stats();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.total_connections, 0);
        // The failed attempt released its creation slot: the next attempt
        // tries to connect again instead of queuing behind a phantom.
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }

    #[tokio::test]
    async fn warm_creates_up_to_target() {
        let pool = ConnectionPool::new(
            PoolConfig::new()
                .with_max_connections(3)
                .with_warm_connections(5),
            Box::new(MemoryStore::new()),
        );
        let created = pool.warm().await.unwrap();
        assert_eq!(created, 3);
        assert_eq!(pool.stats().available_connections, 3);
        // Idempotent once at target.
        assert_eq!(pool.warm().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquisition() {
        let pool = pool(1);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
    }
}
