//! Redis-backed session storage for sessionkit
//!
//! Each session is one Redis hash keyed by `prefix + id`. Writes are buffered
//! in-process and only reach Redis on `commit`, as one atomic multi-field
//! write.
//!
//! # Example
//! ```no_run
//! # use sessionkit_redis::{RedisStore, RedisStoreConfig};
//! # use sessionkit_core::{Store, Value};
//! # use std::time::Duration;
//! # async fn example() -> sessionkit_core::StoreResult<()> {
//! let config = RedisStoreConfig::default()
//!     .with_prefix("app:session:")
//!     .with_ttl(Duration::from_secs(3600));
//! let store = RedisStore::with_config("redis://127.0.0.1/", config).await?;
//!
//! let id = "abcdefghijklmnopqrstuvwxyz012345";
//! store.create(id).await?;
//! store.set(id, "n", Value::from(42)).await?;
//! store.commit(id).await?;
//! assert_eq!(store.int(store.get(id, "n").await)?, 42);
//! # Ok(())
//! # }
//! ```

mod config;
mod redis_store;

pub use config::RedisStoreConfig;
pub use redis_store::{RedisStore, SENTINEL_FIELD};
