//! PostgreSQL-backed session storage
//!
//! Implements the `Store` trait over one table with a JSONB `data` column.
//! Writes made with `set` stay inside a per-session transaction until
//! `commit`, so other readers never observe half-written sessions.
//!
//! # Features
//! - Versioned schema migrations, applied on connect
//! - TTL-bounded reads and an externally driven `prune`
//! - Explicit `rollback`, plus reclaiming of transactions left idle past
//!   `transaction_idle_timeout`
//! - Optional Prometheus metrics for commits, rollbacks and latency
//!
//! # Example
//! ```no_run
//! # use sessionkit_postgres::PostgresStore;
//! # use sessionkit_core::{Store, Value};
//! # async fn example() -> sessionkit_core::StoreResult<()> {
//! let store = PostgresStore::new("postgres://localhost/app").await?;
//! let id = "abcdefghijklmnopqrstuvwxyz012345";
//! store.create(id).await?;
//! store.set(id, "visits", Value::from(1)).await?;
//! store.commit(id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
pub mod metrics;
pub mod migrations;
mod postgres_store;

pub use config::PostgresStoreConfig;
pub use metrics::StoreMetrics;
pub use postgres_store::PostgresStore;
