//! RedisStore - Store trait implementation over Redis hashes
//!
//! Reads pipeline an `EXISTS` with the field read so a missing session and a
//! missing field are told apart in one round trip. Writes are staged in an
//! in-process buffer per session id and applied by `commit` through a Lua
//! script that checks the hash still exists, writes every staged field with a
//! single `HSET` and optionally re-arms the TTL.
//!
//! Two concurrent `set` calls for the same id race last-writer-wins on the
//! staged field. Sessions are expected to have one writer per request.
//!
//! A hash field has no null, so `Value::Nil` is rejected on write. The
//! sentinel field is reserved: it reads as absent and cannot be written or
//! deleted.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::config::RedisStoreConfig;
use sessionkit_core::{IdCodec, Store, StoreError, StoreResult, Value, coerce};

/// Field written on `create` so an otherwise empty session still exists.
/// Hidden from every read.
pub const SENTINEL_FIELD: &str = "__created_at";

/// KEYS[1] = hash key, ARGV[1] = ttl ms (0 = leave alone), ARGV[2..] = field/value pairs
const COMMIT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
local ttl = tonumber(ARGV[1])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#;

/// KEYS[1] = hash key, ARGV[1] = sentinel field name
const CLEAR_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
for _, field in ipairs(redis.call('HKEYS', KEYS[1])) do
    if field ~= ARGV[1] then
        redis.call('HDEL', KEYS[1], field)
    end
end
return 1
"#;

/// Redis-backed session store with buffered writes
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    config: RedisStoreConfig,
    codec: IdCodec,
    /// Uncommitted writes, `{id -> {key -> value}}`
    pending: Mutex<HashMap<String, HashMap<String, Value>>>,
    commit_script: Script,
    clear_script: Script,
}

impl RedisStore {
    /// Connect to Redis with the default configuration
    ///
    /// # Errors
    /// - `StoreError::Backend` if the URL is invalid or the connection fails
    pub async fn new(url: &str) -> StoreResult<Self> {
        Self::with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with a custom configuration
    ///
    /// # Errors
    /// - `StoreError::Backend` if the URL is invalid or the connection fails
    pub async fn with_config(url: &str, config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(|e| backend("Invalid Redis URL", e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| backend("Failed to connect to Redis", e))?;

        let store = Self::from_client(client, config);
        store
            .conn
            .set(conn)
            .map_err(|_| StoreError::Backend("Redis connection already initialised".to_string()))?;
        Ok(store)
    }

    /// Build a store that connects on first backend use
    pub fn from_client(client: redis::Client, config: RedisStoreConfig) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
            codec: IdCodec::new(config.id_length),
            config,
            pending: Mutex::new(HashMap::new()),
            commit_script: Script::new(COMMIT_SCRIPT),
            clear_script: Script::new(CLEAR_SCRIPT),
        }
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    /// Number of staged, uncommitted fields for `id`
    pub async fn pending_len(&self, id: &str) -> usize {
        self.pending.lock().await.get(id).map_or(0, HashMap::len)
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        self.conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .cloned()
            .map_err(|e| backend("Failed to connect to Redis", e))
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.config.prefix, id)
    }

    fn check_id(&self, id: &str) -> StoreResult<()> {
        if self.codec.validate(id) {
            Ok(())
        } else {
            Err(StoreError::InvalidSession)
        }
    }

    /// Drop staged writes for `id`, returning how many fields were dropped
    async fn discard_pending(&self, id: &str) -> usize {
        self.pending.lock().await.remove(id).map_or(0, |fields| fields.len())
    }
}

/// Reject writes Redis cannot store faithfully
fn check_write(key: &str, value: &Value) -> StoreResult<()> {
    if key == SENTINEL_FIELD {
        return Err(StoreError::Backend(format!(
            "Reserved session field: {}",
            SENTINEL_FIELD
        )));
    }
    if value.is_nil() {
        return Err(StoreError::AssertType);
    }
    Ok(())
}

fn backend(context: &str, e: redis::RedisError) -> StoreError {
    StoreError::Backend(format!("{}: {}", context, e))
}

/// Wire form of a value inside a Redis hash; `Nil` never gets this far
fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Nil => Vec::new(),
        Value::Bool(true) => b"1".to_vec(),
        Value::Bool(false) => b"0".to_vec(),
        Value::Int(n) => n.to_string().into_bytes(),
        Value::Float(n) => n.to_string().into_bytes(),
        Value::String(s) => s.clone().into_bytes(),
        Value::Bytes(b) => b.clone(),
        Value::Json(j) => j.to_string().into_bytes(),
    }
}

fn text(value: Value) -> StoreResult<String> {
    match value {
        Value::Bytes(b) => String::from_utf8(b).map_err(|_| StoreError::AssertType),
        Value::String(s) => Ok(s),
        _ => Err(StoreError::AssertType),
    }
}

fn parse<T: FromStr>(r: StoreResult<Value>) -> StoreResult<T> {
    text(coerce::unwrap_value(r)?)?
        .parse()
        .map_err(|_| StoreError::AssertType)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn create(&self, id: &str) -> StoreResult<()> {
        let key = self.key(id);
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, SENTINEL_FIELD, chrono::Utc::now().timestamp())
            .ignore();
        if self.config.ttl.is_some() {
            pipe.cmd("PEXPIRE")
                .arg(&key)
                .arg(self.config.ttl_millis())
                .ignore();
        }

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to create session", e))?;

        debug!("Created Redis session hash");
        Ok(())
    }

    async fn get(&self, id: &str, key: &str) -> StoreResult<Value> {
        self.check_id(id)?;
        let hash = self.key(id);
        let mut conn = self.connection().await?;

        let (exists, value): (bool, Option<Vec<u8>>) = redis::pipe()
            .atomic()
            .exists(&hash)
            .hget(&hash, key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to read session field", e))?;

        if !exists {
            return Err(StoreError::InvalidSession);
        }
        value
            .filter(|_| key != SENTINEL_FIELD)
            .map(Value::Bytes)
            .ok_or(StoreError::FieldNotFound)
    }

    async fn get_multi(&self, id: &str, keys: &[&str]) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;
        let hash = self.key(id);
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().exists(&hash);
        // HMGET with no fields is a protocol error
        if !keys.is_empty() {
            pipe.cmd("HMGET").arg(&hash).arg(keys);
        }

        let (exists, values): (bool, Vec<Option<Vec<u8>>>) = if keys.is_empty() {
            let (exists,): (bool,) = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to read session fields", e))?;
            (exists, Vec::new())
        } else {
            pipe.query_async(&mut conn)
                .await
                .map_err(|e| backend("Failed to read session fields", e))?
        };

        if !exists {
            return Err(StoreError::InvalidSession);
        }

        Ok(keys
            .iter()
            .zip(values.into_iter().chain(std::iter::repeat(None)))
            .map(|(k, v)| {
                let value = v
                    .filter(|_| *k != SENTINEL_FIELD)
                    .map(Value::Bytes)
                    .unwrap_or(Value::Nil);
                (k.to_string(), value)
            })
            .collect())
    }

    async fn get_all(&self, id: &str) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;
        let hash = self.key(id);
        let mut conn = self.connection().await?;

        let (exists, mut fields): (bool, HashMap<String, Vec<u8>>) = redis::pipe()
            .atomic()
            .exists(&hash)
            .hgetall(&hash)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to read session", e))?;

        if !exists {
            return Err(StoreError::InvalidSession);
        }

        fields.remove(SENTINEL_FIELD);
        Ok(fields
            .into_iter()
            .map(|(k, v)| (k, Value::Bytes(v)))
            .collect())
    }

    /// Stage a write; Redis is untouched until `commit`
    async fn set(&self, id: &str, key: &str, value: Value) -> StoreResult<()> {
        self.check_id(id)?;
        if let Err(e) = check_write(key, &value) {
            debug!(key = %key, kind = value.type_name(), "Rejected session write");
            return Err(e);
        }

        let mut pending = self.pending.lock().await;
        pending
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn set_multi(&self, id: &str, values: HashMap<String, Value>) -> StoreResult<()> {
        self.check_id(id)?;
        for (key, value) in &values {
            if let Err(e) = check_write(key, value) {
                debug!(key = %key, kind = value.type_name(), "Rejected session write");
                return Err(e);
            }
        }

        let mut pending = self.pending.lock().await;
        pending.entry(id.to_string()).or_default().extend(values);
        Ok(())
    }

    /// Drain the staged writes for `id` and apply them in one atomic script.
    ///
    /// The buffer is emptied before the write, so a failed commit does not
    /// leave stale fields behind for the next one.
    async fn commit(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;

        let staged = self.pending.lock().await.remove(id);
        let Some(fields) = staged.filter(|fields| !fields.is_empty()) else {
            return Ok(());
        };

        let mut conn = self.connection().await?;
        let ttl = if self.config.extend_ttl {
            self.config.ttl_millis()
        } else {
            0
        };

        let mut invocation = self.commit_script.prepare_invoke();
        invocation.key(self.key(id)).arg(ttl);
        for (field, value) in &fields {
            invocation.arg(field).arg(encode(value));
        }

        let applied: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            warn!(fields = fields.len(), "Redis session commit failed: {}", e);
            backend("Failed to commit session", e)
        })?;

        if applied == 0 {
            return Err(StoreError::InvalidSession);
        }

        debug!(fields = fields.len(), "Committed Redis session");
        Ok(())
    }

    async fn rollback(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        let dropped = self.discard_pending(id).await;
        if dropped > 0 {
            debug!(fields = dropped, "Dropped staged Redis session writes");
        }
        Ok(())
    }

    async fn delete(&self, id: &str, keys: &[&str]) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard_pending(id).await;

        let hash = self.key(id);
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().exists(&hash);
        for key in keys.iter().filter(|k| **k != SENTINEL_FIELD) {
            pipe.hdel(&hash, *key).ignore();
        }

        let (exists,): (bool,) = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to delete session fields", e))?;

        if !exists {
            return Err(StoreError::InvalidSession);
        }
        Ok(())
    }

    async fn clear(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard_pending(id).await;

        let mut conn = self.connection().await?;
        let cleared: i64 = self
            .clear_script
            .key(self.key(id))
            .arg(SENTINEL_FIELD)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to clear session", e))?;

        if cleared == 0 {
            return Err(StoreError::InvalidSession);
        }
        Ok(())
    }

    async fn destroy(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;
        self.discard_pending(id).await;

        let mut conn = self.connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(self.key(id))
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to destroy session", e))?;

        debug!("Destroyed Redis session hash");
        Ok(())
    }

    fn int(&self, r: StoreResult<Value>) -> StoreResult<i32> {
        parse(r)
    }

    fn int64(&self, r: StoreResult<Value>) -> StoreResult<i64> {
        parse(r)
    }

    fn uint64(&self, r: StoreResult<Value>) -> StoreResult<u64> {
        parse(r)
    }

    fn float64(&self, r: StoreResult<Value>) -> StoreResult<f64> {
        parse(r)
    }

    fn string(&self, r: StoreResult<Value>) -> StoreResult<String> {
        text(coerce::unwrap_value(r)?)
    }

    fn bytes(&self, r: StoreResult<Value>) -> StoreResult<Vec<u8>> {
        match coerce::unwrap_value(r)? {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            _ => Err(StoreError::AssertType),
        }
    }

    fn bool(&self, r: StoreResult<Value>) -> StoreResult<bool> {
        parse_bool(&text(coerce::unwrap_value(r)?)?).ok_or(StoreError::AssertType)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "abcdefghijklmnopqrstuvwxyz012345";

    /// Store pointed at a port nothing listens on; any backend call fails
    fn offline_store() -> RedisStore {
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        RedisStore::from_client(client, RedisStoreConfig::default())
    }

    #[test]
    fn test_encode_values() {
        assert_eq!(encode(&Value::Int(42)), b"42");
        assert_eq!(encode(&Value::Bool(true)), b"1");
        assert_eq!(encode(&Value::Bool(false)), b"0");
        assert_eq!(encode(&Value::Float(1.5)), b"1.5");
        assert_eq!(encode(&Value::from("abc")), b"abc");
        assert_eq!(encode(&Value::Bytes(vec![0, 255])), vec![0, 255]);
        assert_eq!(encode(&Value::Json(serde_json::json!({"a": 1}))), br#"{"a":1}"#);
    }

    #[test]
    fn test_coercion_parses_wire_strings() {
        let store = offline_store();
        let wire = |s: &str| Ok(Value::Bytes(s.as_bytes().to_vec()));

        assert_eq!(store.int(wire("42")), Ok(42));
        assert_eq!(store.int64(wire("-9000000000")), Ok(-9_000_000_000));
        assert_eq!(store.uint64(wire("7")), Ok(7));
        assert_eq!(store.float64(wire("2.5")), Ok(2.5));
        assert_eq!(store.string(wire("luna")), Ok("luna".to_string()));
        assert_eq!(store.bytes(wire("raw")), Ok(b"raw".to_vec()));
        assert_eq!(store.bool(wire("1")), Ok(true));
        assert_eq!(store.bool(wire("FALSE")), Ok(false));
    }

    #[test]
    fn test_coercion_errors() {
        let store = offline_store();

        assert_eq!(store.int(Ok(Value::Bytes(b"abc".to_vec()))), Err(StoreError::AssertType));
        assert_eq!(store.uint64(Ok(Value::Bytes(b"-1".to_vec()))), Err(StoreError::AssertType));
        assert_eq!(store.bool(Ok(Value::Bytes(b"yes".to_vec()))), Err(StoreError::AssertType));
        assert_eq!(store.string(Ok(Value::Bytes(vec![0xff, 0xfe]))), Err(StoreError::AssertType));
        assert_eq!(store.int(Ok(Value::Nil)), Err(StoreError::Nil));
        assert_eq!(
            store.int(Err(StoreError::FieldNotFound)),
            Err(StoreError::FieldNotFound)
        );
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_without_round_trip() {
        let store = offline_store();
        let bad = "tooshort";

        // a backend call would surface as StoreError::Backend
        assert_eq!(store.get(bad, "n").await, Err(StoreError::InvalidSession));
        assert_eq!(store.get_multi(bad, &["n"]).await, Err(StoreError::InvalidSession));
        assert_eq!(store.get_all(bad).await, Err(StoreError::InvalidSession));
        assert_eq!(
            store.set(bad, "n", Value::from(1)).await,
            Err(StoreError::InvalidSession)
        );
        assert_eq!(
            store.set_multi(bad, HashMap::new()).await,
            Err(StoreError::InvalidSession)
        );
        assert_eq!(store.commit(bad).await, Err(StoreError::InvalidSession));
        assert_eq!(store.rollback(bad).await, Err(StoreError::InvalidSession));
        assert_eq!(store.delete(bad, &["n"]).await, Err(StoreError::InvalidSession));
        assert_eq!(store.clear(bad).await, Err(StoreError::InvalidSession));
        assert_eq!(store.destroy(bad).await, Err(StoreError::InvalidSession));
    }

    #[tokio::test]
    async fn test_set_only_stages_writes() {
        let store = offline_store();

        store.set(ID, "a", Value::from(1)).await.unwrap();
        store
            .set_multi(
                ID,
                HashMap::from([
                    ("a".to_string(), Value::from(2)),
                    ("b".to_string(), Value::from(3)),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(store.pending_len(ID).await, 2);
        assert_eq!(store.pending_len("other").await, 0);
    }

    #[tokio::test]
    async fn test_nil_and_sentinel_writes_rejected() {
        let store = offline_store();

        assert_eq!(
            store.set(ID, "n", Value::Nil).await,
            Err(StoreError::AssertType)
        );
        assert_eq!(
            store
                .set_multi(
                    ID,
                    HashMap::from([
                        ("a".to_string(), Value::from(1)),
                        ("b".to_string(), Value::Nil),
                    ]),
                )
                .await,
            Err(StoreError::AssertType)
        );
        assert!(matches!(
            store.set(ID, SENTINEL_FIELD, Value::from(1)).await,
            Err(StoreError::Backend(ref msg)) if msg.contains(SENTINEL_FIELD)
        ));

        // a rejected batch stages nothing
        assert_eq!(store.pending_len(ID).await, 0);
    }

    #[tokio::test]
    async fn test_rollback_drops_staged_writes() {
        let store = offline_store();

        store.set(ID, "a", Value::from(1)).await.unwrap();
        store.rollback(ID).await.unwrap();
        assert_eq!(store.pending_len(ID).await, 0);

        // nothing staged, and commit has nothing to send
        store.rollback(ID).await.unwrap();
        assert_eq!(store.commit(ID).await, Ok(()));
    }

    #[tokio::test]
    async fn test_commit_with_nothing_staged_is_noop() {
        let store = offline_store();
        assert_eq!(store.commit(ID).await, Ok(()));
    }

    #[test]
    fn test_key_uses_prefix() {
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let store = RedisStore::from_client(client, RedisStoreConfig::new().with_prefix("app:"));
        assert_eq!(store.key(ID), format!("app:{}", ID));
    }
}
