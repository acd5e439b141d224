//! Store trait for pluggable session backends
//!
//! The `Store` trait abstracts over where session records live. Each backend
//! has its own write visibility model:
//! - `MemoryStore`: writes are visible immediately, `commit` is a no-op
//! - `RedisStore` (sessionkit-redis): writes are buffered in-process until `commit`
//! - `PostgresStore` (sessionkit-postgres): writes run inside a per-session
//!   transaction that `commit` finishes

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::coerce;
use crate::error::ErrorKind;
use crate::value::Value;

/// Errors reported by store implementations.
///
/// The first four variants are the canonical kinds; `Backend` carries any
/// driver-level failure (connectivity, SQL, protocol) as text and is passed
/// through the core untranslated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Invalid session")]
    InvalidSession,

    #[error("Field not found")]
    FieldNotFound,

    #[error("Type assertion failed")]
    AssertType,

    #[error("Nil value")]
    Nil,

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            StoreError::InvalidSession => Some(ErrorKind::InvalidSession),
            StoreError::FieldNotFound => Some(ErrorKind::FieldNotFound),
            StoreError::AssertType => Some(ErrorKind::AssertType),
            StoreError::Nil => Some(ErrorKind::Nil),
            StoreError::Backend(_) => None,
        }
    }

    /// Wire code (1..=4) of a canonical error, `None` for backend errors
    pub fn code(&self) -> Option<u8> {
        self.kind().map(ErrorKind::code)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Session store trait
///
/// Every method that takes an identifier, except `create`, must reject an
/// identifier failing the store's validity predicate with
/// `StoreError::InvalidSession` before any backend round trip.
///
/// Absent keys in `get_multi` are reported as `Value::Nil` entries, never as
/// per-key errors. `get` reports an absent key as `StoreError::FieldNotFound`.
///
/// # Example
/// ```no_run
/// # use sessionkit_core::{MemoryStore, Store, Value};
/// # async fn example() -> sessionkit_core::store::StoreResult<()> {
/// let store = MemoryStore::new();
/// let id = "a".repeat(32);
/// store.create(&id).await?;
/// store.set(&id, "n", Value::from(42)).await?;
/// store.commit(&id).await?;
/// assert_eq!(store.int(store.get(&id, "n").await)?, 42);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Store: Send + Sync {
    /// Materialize a record for `id`. Calling it again for an existing
    /// record must not destroy its fields.
    async fn create(&self, id: &str) -> StoreResult<()>;

    /// Read one field.
    ///
    /// # Errors
    /// - `StoreError::InvalidSession` if the id is malformed or the record is absent
    /// - `StoreError::FieldNotFound` if the key is absent
    async fn get(&self, id: &str, key: &str) -> StoreResult<Value>;

    /// Read several fields; absent keys map to `Value::Nil`.
    async fn get_multi(&self, id: &str, keys: &[&str]) -> StoreResult<HashMap<String, Value>>;

    /// Read every field of the record.
    async fn get_all(&self, id: &str) -> StoreResult<HashMap<String, Value>>;

    /// Write one field. Buffered backends hold it until `commit`.
    async fn set(&self, id: &str, key: &str, value: Value) -> StoreResult<()>;

    /// Write several fields. Buffered backends hold them until `commit`.
    async fn set_multi(&self, id: &str, values: HashMap<String, Value>) -> StoreResult<()>;

    /// Apply every pending write for `id` atomically, or none of them.
    ///
    /// The pending set is released whether or not the commit succeeds.
    async fn commit(&self, id: &str) -> StoreResult<()>;

    /// Drop every pending write for `id` without applying it.
    ///
    /// Backends that hold resources for pending writes release them here, so
    /// a request that abandons its writes must call it. Succeeds when nothing
    /// is pending.
    async fn rollback(&self, id: &str) -> StoreResult<()>;

    /// Remove the given fields.
    async fn delete(&self, id: &str, keys: &[&str]) -> StoreResult<()>;

    /// Remove every field but keep the record valid.
    async fn clear(&self, id: &str) -> StoreResult<()>;

    /// Remove the record entirely. Succeeds if it is already gone.
    async fn destroy(&self, id: &str) -> StoreResult<()>;

    fn int(&self, r: StoreResult<Value>) -> StoreResult<i32> {
        coerce::int(r)
    }

    fn int64(&self, r: StoreResult<Value>) -> StoreResult<i64> {
        coerce::int64(r)
    }

    fn uint64(&self, r: StoreResult<Value>) -> StoreResult<u64> {
        coerce::uint64(r)
    }

    fn float64(&self, r: StoreResult<Value>) -> StoreResult<f64> {
        coerce::float64(r)
    }

    fn string(&self, r: StoreResult<Value>) -> StoreResult<String> {
        coerce::string(r)
    }

    fn bytes(&self, r: StoreResult<Value>) -> StoreResult<Vec<u8>> {
        coerce::bytes(r)
    }

    fn bool(&self, r: StoreResult<Value>) -> StoreResult<bool> {
        coerce::bool(r)
    }
}
