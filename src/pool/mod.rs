//! Bounded connection pooling.
//!
//! A [`ConnectionPool`] hands out at most a configured number of
//! concurrently busy backing-store connections. Idle connections are reused,
//! the pool grows on demand up to its ceiling, and excess demand waits in a
//! FIFO queue bounded by an acquire timeout. A periodic reclamation pass
//! closes connections idle past their timeout while keeping a floor alive.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ConnectionPool`] | Bounded pool with FIFO wait queue and reclamation |
//! | [`PoolConfig`] | Sizing and timing knobs |
//! | [`PooledConnection`] | Borrowed connection handle |
//! | [`StoreBackend`] / [`StoreConnection`] | Backing-store seam |
//! | [`MemoryStore`] | Programmable in-memory store for tests and demos |
//!
//! ## Example
//!
//! ```rust
//! use resman::pool::{ConnectionPool, MemoryStore, PoolConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> resman::Result<()> {
//! let pool = ConnectionPool::new(
//!     PoolConfig::new().with_max_connections(4),
//!     Box::new(MemoryStore::new()),
//! );
//! let rows = pool.query("SELECT * FROM companies", &[]).await?;
//! assert!(rows.is_empty());
//! # Ok(())
//! # }
//! ```

mod backend;
mod manager;

pub use backend::{MemoryStore, Row, StoreBackend, StoreConnection, UpdateResult};
pub use manager::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
