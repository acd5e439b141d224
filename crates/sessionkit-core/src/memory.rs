//! In-memory session store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::id::IdCodec;
use crate::store::{Store, StoreError, StoreResult};
use crate::value::Value;

/// In-process session store
///
/// One `RwLock` guards the whole `{id -> {key -> value}}` map. Writes are
/// applied directly, so `commit` does nothing. Reads hand out clones of the
/// requested values only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, HashMap<String, Value>>>,
    codec: IdCodec,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept identifiers of a non-default length
    pub fn with_id_length(length: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            codec: IdCodec::new(length),
        }
    }

    /// Number of live session records
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn check_id(&self, id: &str) -> StoreResult<()> {
        if self.codec.validate(id) {
            Ok(())
        } else {
            Err(StoreError::InvalidSession)
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, id: &str) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(id.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, id: &str, key: &str) -> StoreResult<Value> {
        self.check_id(id)?;

        let sessions = self.sessions.read().await;
        let record = sessions.get(id).ok_or(StoreError::InvalidSession)?;
        record.get(key).cloned().ok_or(StoreError::FieldNotFound)
    }

    async fn get_multi(&self, id: &str, keys: &[&str]) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;

        let sessions = self.sessions.read().await;
        let record = sessions.get(id).ok_or(StoreError::InvalidSession)?;
        Ok(keys
            .iter()
            .map(|k| (k.to_string(), record.get(*k).cloned().unwrap_or(Value::Nil)))
            .collect())
    }

    async fn get_all(&self, id: &str) -> StoreResult<HashMap<String, Value>> {
        self.check_id(id)?;

        let sessions = self.sessions.read().await;
        sessions.get(id).cloned().ok_or(StoreError::InvalidSession)
    }

    async fn set(&self, id: &str, key: &str, value: Value) -> StoreResult<()> {
        self.check_id(id)?;

        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(id).ok_or(StoreError::InvalidSession)?;
        record.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_multi(&self, id: &str, values: HashMap<String, Value>) -> StoreResult<()> {
        self.check_id(id)?;

        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(id).ok_or(StoreError::InvalidSession)?;
        record.extend(values);
        Ok(())
    }

    async fn commit(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)
    }

    /// Writes are already applied, so there is nothing to drop
    async fn rollback(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)
    }

    async fn delete(&self, id: &str, keys: &[&str]) -> StoreResult<()> {
        self.check_id(id)?;

        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(id).ok_or(StoreError::InvalidSession)?;
        for key in keys {
            record.remove(*key);
        }
        Ok(())
    }

    async fn clear(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;

        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(id).ok_or(StoreError::InvalidSession)?;
        *record = HashMap::new();
        Ok(())
    }

    async fn destroy(&self, id: &str) -> StoreResult<()> {
        self.check_id(id)?;

        self.sessions.write().await.remove(id);
        Ok(())
    }
}
