//! PostgresStore - Store trait implementation over a single JSONB column
//!
//! Each session is one row `(id, data jsonb, created_at)`. Rows older than
//! the configured TTL are invisible to every operation and removed by
//! [`PostgresStore::prune`].
//!
//! `set` merges a JSON fragment into `data` inside a transaction that stays
//! open until `commit`. Transactions are tracked per session id, so writes
//! for different sessions never share a transaction scope. While a session
//! has an open transaction its row is locked; `delete`, `clear` and
//! `destroy` roll that transaction back before touching the row.
//!
//! An open transaction holds a pool connection. A request that calls `set`
//! and then gives up must call `rollback`, otherwise the connection stays
//! checked out until the transaction has been idle for
//! `transaction_idle_timeout` and the next store operation reclaims it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::PostgresStoreConfig;
use crate::metrics::StoreMetrics;
use crate::migrations;
use sessionkit_core::{IdCodec, Store, StoreError, StoreResult, Value, coerce};

type Tx = Transaction<'static, Postgres>;
type TxSlot = Arc<Mutex<Option<OpenTx>>>;

/// A write transaction and the time of its last successful write
struct OpenTx {
    tx: Tx,
    touched: Instant,
}

/// PostgreSQL-backed session store with transaction-scoped writes
pub struct PostgresStore {
    pool: PgPool,
    config: PostgresStoreConfig,
    codec: IdCodec,
    /// Open write transactions keyed by session id
    transactions: Mutex<HashMap<String, TxSlot>>,
    metrics: Option<StoreMetrics>,
}

impl PostgresStore {
    /// Connect with the default configuration and apply migrations
    ///
    /// # Errors
    /// - `StoreError::Backend` if connection fails or schema migration fails
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::with_config(database_url, PostgresStoreConfig::default()).await
    }

    /// Connect with a custom configuration and apply migrations
    ///
    /// # Errors
    /// - `StoreError::Backend` if the table name is not a plain identifier,
    ///   or connection or schema migration fails
    ///
    /// # Example
    /// ```no_run
    /// # use sessionkit_postgres::{PostgresStore, PostgresStoreConfig};
    /// # async fn example() -> sessionkit_core::StoreResult<()> {
    /// let config = PostgresStoreConfig::default()
    ///     .with_table("web_sessions")
    ///     .with_max_connections(50);
    /// let store = PostgresStore::with_config("postgres://localhost/app", config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_config(database_url: &str, config: PostgresStoreConfig) -> StoreResult<Self> {
        if !config.table_is_valid() {
            return Err(StoreError::Backend(format!(
                "Invalid table name: {}",
                config.table
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to PostgreSQL: {}", e)))?;

        let store = Self::from_pool(pool, config);
        store.run_migrations().await?;

        Ok(store)
    }

    /// Wrap an existing pool; migrations are not run
    pub fn from_pool(pool: PgPool, config: PostgresStoreConfig) -> Self {
        Self {
            pool,
            codec: IdCodec::new(config.id_length),
            config,
            transactions: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        migrations::run_migrations(&self.pool, &self.config.table).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &PostgresStoreConfig {
        &self.config
    }

    /// Number of sessions with uncommitted writes
    pub async fn open_transactions(&self) -> usize {
        self.transactions.lock().await.len()
    }

    /// Delete rows older than the TTL, returning how many were removed
    pub async fn prune(&self) -> StoreResult<u64> {
        self.rollback_idle().await;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at <= $1",
            self.config.table
        ))
        .bind(self.cutoff())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to prune sessions", e))?;

        debug!(removed = result.rows_affected(), "Pruned expired sessions");
        Ok(result.rows_affected())
    }

    fn check_id(&self, id: &str) -> StoreResult<()> {
        if self.codec.validate(id) {
            Ok(())
        } else {
            Err(StoreError::InvalidSession)
        }
    }

    /// Oldest `created_at` still considered live
    fn cutoff(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn observe(&self, operation: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.observe(operation, started.elapsed().as_secs_f64());
        }
    }

    fn record_rollback(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_rollback(reason);
        }
    }

    async fn load(&self, id: &str) -> StoreResult<HashMap<String, Value>> {
        self.rollback_idle().await;
        let started = Instant::now();
        let row: Option<Json<serde_json::Map<String, serde_json::Value>>> =
            sqlx::query_scalar(&format!(
                "SELECT data FROM {} WHERE id = $1 AND created_at > $2",
                self.config.table
            ))
            .bind(id)
            .bind(self.cutoff())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("Failed to load session", e))?;
        self.observe("load", started);

        let Json(data) = row.ok_or(StoreError::InvalidSession)?;
        Ok(data.into_iter().map(|(k, v)| (k, from_json(v))).collect())
    }

    /// Lock the transaction slot for `id`, registering a fresh one if needed.
    ///
    /// A slot taken by `commit` may already be out of the registry by the
    /// time its lock is granted; an empty slot is only handed out once it is
    /// the registered one.
    async fn checkout(&self, id: &str) -> OwnedMutexGuard<Option<OpenTx>> {
        loop {
            let slot = self
                .transactions
                .lock()
                .await
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone();

            let guard = slot.clone().lock_owned().await;
            if guard.is_some() {
                return guard;
            }

            let mut registry = self.transactions.lock().await;
            let current = registry
                .entry(id.to_string())
                .or_insert_with(|| slot.clone());
            if Arc::ptr_eq(current, &slot) {
                return guard;
            }
        }
    }

    /// Drop the registry entry for `id` if it still points at `slot`.
    ///
    /// Callers hold the slot lock, so a writer queued on the same slot finds
    /// it unregistered and starts over with a fresh one.
    async fn forget(&self, id: &str, slot: &TxSlot) {
        let mut registry = self.transactions.lock().await;
        if registry.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            registry.remove(id);
        }
    }

    /// Roll back any uncommitted writes for `id`, returning whether there were any
    async fn discard(&self, id: &str, reason: &str) -> bool {
        let slot = self.transactions.lock().await.remove(id);
        let Some(slot) = slot else {
            return false;
        };

        let open = slot.lock().await.take();
        let Some(open) = open else {
            return false;
        };
        if let Err(e) = open.tx.rollback().await {
            warn!("Failed to roll back session writes: {}", e);
        }
        self.record_rollback(reason);
        true
    }

    /// Roll back every transaction that has seen no write for longer than
    /// `transaction_idle_timeout`, returning how many were rolled back.
    ///
    /// Runs before each operation that needs a pool connection. Slots that
    /// are locked by a running operation are skipped.
    pub async fn rollback_idle(&self) -> usize {
        let Some(timeout) = self.config.transaction_idle_timeout else {
            return 0;
        };

        let slots: Vec<(String, TxSlot)> = self
            .transactions
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut expired = 0;
        for (id, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if !(*guard).as_ref().is_some_and(|open| open.touched.elapsed() >= timeout) {
                continue;
            }
            let Some(open) = guard.take() else {
                continue;
            };
            self.forget(&id, &slot).await;
            drop(guard);

            warn!(
                idle_ms = open.touched.elapsed().as_millis() as u64,
                "Rolling back idle session transaction"
            );
            if let Err(e) = open.tx.rollback().await {
                warn!("Failed to roll back idle session writes: {}", e);
            }
            self.record_rollback("idle_timeout");
            expired += 1;
        }
        expired
    }

    /// Merge `fragment` into the session row inside its open transaction
    async fn merge(&self, id: &str, fragment: serde_json::Value) -> StoreResult<()> {
        let started = Instant::now();
        let mut guard = self.checkout(id).await;
        let slot = OwnedMutexGuard::mutex(&guard).clone();

        let mut tx = match guard.take() {
            Some(open) => open.tx,
            None => {
                self.rollback_idle().await;
                match self.pool.begin().await {
                    Ok(tx) => tx,
                    Err(e) => {
                        self.forget(id, &slot).await;
                        return Err(backend("Failed to begin transaction", e));
                    }
                }
            }
        };

        let result = sqlx::query(&format!(
            "UPDATE {} SET data = data || $2 WHERE id = $1 AND created_at > $3",
            self.config.table
        ))
        .bind(id)
        .bind(Json(fragment))
        .bind(self.cutoff())
        .execute(&mut *tx)
        .await;

        let outcome = match result {
            Ok(done) if done.rows_affected() > 0 => {
                *guard = Some(OpenTx {
                    tx,
                    touched: Instant::now(),
                });
                self.observe("set", started);
                return Ok(());
            }
            Ok(_) => Err(StoreError::InvalidSession),
            Err(e) => Err(backend("Failed to write session field", e)),
        };

        // the transaction is unusable after a failed statement, and every
        // earlier write in it goes with it
        self.forget(id, &slot).await;
        drop(guard);
        if let Err(e) = tx.rollback().await {
            warn!("Failed to roll back session writes: {}", e);
        }
        self.record_rollback(match outcome {
            Err(StoreError::InvalidSession) => "missing_session",
            _ => "error",
        });
        outcome
    }

    /// Run a statement outside any write transaction, failing when no live row matched
    async fn update_row(&self, sql: &str, id: &str, bind: Option<Vec<String>>) -> StoreResult<()> {
        self.rollback_idle().await;
        let query = sqlx::query(sql).bind(id).bind(self.cutoff());
        let query = match bind {
            Some(keys) => query.bind(keys),
            None => query,
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Failed to update session", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidSession);
        }
        Ok(())
    }
}

fn backend(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{}: {}", context, e))
}

/// JSON form of a value inside the `data` column
fn to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => b.into(),
        Value::Int(n) => n.into(),
        Value::Float(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => s.into(),
        Value::Bytes(b) => STANDARD.encode(b).into(),
        Value::Json(j) => j,
    }
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        other => Value::Json(other),
    }
}

/// Integral JSON number as i64; JSON has no separate integer type
fn integral(value: Value) -> StoreResult<i64> {
    match value {
        Value::Int(n) => Ok(n),
        Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(f as i64)
        }
        _ => Err(StoreError::AssertType),
    }
}

#[async_trait]
impl Store for PostgresStore {
    /// Insert an empty row, or revive an expired one that `prune` has not
    /// removed yet. A live row is left untouched.
    async fn create(&self, id: &str) -> StoreResult<()> {
        self.rollback_idle().await;
        sqlx::query(&format!(
            "INSERT INTO {table} (id) VALUES ($1) \
             ON CONFLICT (id) DO UPDATE SET data = '{{}}'::jsonb, created_at = NOW() \
             WHERE {table}.created_at <= $2",
            table = self.config.table
        ))
        .bind(id)
        .bind(self.cutoff())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("Failed to create session", e))?;

        debug!("Created session row");
        Ok(())
    }

    async fn get(&self, id: &str, key: &str) -> StoreResult<Value> {
        self.check_id(id)?;
        let mut data = self.load(id).await?;
        data.remove(key).ok_or(StoreError::FieldNotFound)
    }

    async fn get_multi(&self, id: &str, keys: &[&str]) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;
        let mut data = self.load(id).await?;
        Ok(keys
            .iter()
            .map(|k| (k.to_string(), data.remove(*k).unwrap_or(Value::Nil)))
            .collect())
    }

    async fn get_all(&self, id: &str) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;
        self.load(id).await
    }

    async fn set(&self, id: &str, key: &str, value: Value) -> StoreResult<()> {
        self.check_id(id)?;
        let mut fragment = serde_json::Map::new();
        fragment.insert(key.to_string(), to_json(value));
        self.merge(id, serde_json::Value::Object(fragment)).await
    }

    async fn set_multi(&self, id: &str, values: HashMap<String, Value>) -> StoreResult<()> {
        self.check_id(id)?;
        let fragment: serde_json::Map<String, serde_json::Value> = values
            .into_iter()
            .map(|(k, v)| (k, to_json(v)))
            .collect();
        self.merge(id, serde_json::Value::Object(fragment)).await
    }

    /// Commit the open write transaction for `id`.
    ///
    /// Fails when `id` has no open transaction, including after a
    /// `delete`, `clear` or `destroy` discarded it.
    async fn commit(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        let started = Instant::now();

        let slot = self.transactions.lock().await.remove(id);
        let open = match slot {
            Some(slot) => slot.lock().await.take(),
            None => None,
        };
        let Some(open) = open else {
            return Err(StoreError::Backend(
                "No open transaction for session".to_string(),
            ));
        };

        let result = open.tx.commit().await;
        if let Some(metrics) = &self.metrics {
            metrics.record_commit(result.is_ok());
        }
        result.map_err(|e| {
            warn!("Session commit failed: {}", e);
            backend("Failed to commit session", e)
        })?;

        self.observe("commit", started);
        debug!("Committed session transaction");
        Ok(())
    }

    /// Roll back the open write transaction for `id`, if any
    async fn rollback(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        if self.discard(id, "rollback").await {
            debug!("Rolled back session transaction");
        }
        Ok(())
    }

    async fn delete(&self, id: &str, keys: &[&str]) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard(id, "discarded").await;

        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        self.update_row(
            &format!(
                "UPDATE {} SET data = data - $3::text[] WHERE id = $1 AND created_at > $2",
                self.config.table
            ),
            id,
            Some(keys),
        )
        .await
    }

    async fn clear(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard(id, "discarded").await;

        self.update_row(
            &format!(
                "UPDATE {} SET data = '{{}}'::jsonb WHERE id = $1 AND created_at > $2",
                self.config.table
            ),
            id,
            None,
        )
        .await
    }

    async fn destroy(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard(id, "discarded").await;
        self.rollback_idle().await;

        sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.config.table))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| backend("Failed to destroy session", e))?;

        debug!("Destroyed session row");
        Ok(())
    }

    fn int(&self, r: StoreResult<Value>) -> StoreResult<i32> {
        i32::try_from(integral(coerce::unwrap_value(r)?)?).map_err(|_| StoreError::AssertType)
    }

    fn int64(&self, r: StoreResult<Value>) -> StoreResult<i64> {
        integral(coerce::unwrap_value(r)?)
    }

    fn uint64(&self, r: StoreResult<Value>) -> StoreResult<u64> {
        match coerce::unwrap_value(r)? {
            Value::Float(f) if f.fract() == 0.0 && f >= 0.0 && f < u64::MAX as f64 => Ok(f as u64),
            other => u64::try_from(integral(other)?).map_err(|_| StoreError::AssertType),
        }
    }

    fn float64(&self, r: StoreResult<Value>) -> StoreResult<f64> {
        match coerce::unwrap_value(r)? {
            Value::Float(f) => Ok(f),
            Value::Int(n) => Ok(n as f64),
            _ => Err(StoreError::AssertType),
        }
    }

    fn bytes(&self, r: StoreResult<Value>) -> StoreResult<Vec<u8>> {
        match coerce::unwrap_value(r)? {
            Value::String(s) => STANDARD.decode(s).map_err(|_| StoreError::AssertType),
            Value::Bytes(b) => Ok(b),
            _ => Err(StoreError::AssertType),
        }
    }
}
