//! Per-request session handle

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::cookie::{Cookie, CookieOptions};
use crate::manager::SetCookieHook;
use crate::store::Store;
use crate::value::Value;
use crate::{Error, Result};

/// A session bound to one identifier for the lifetime of a request.
///
/// Reads go to the store unless [`Session::load_values`] filled the local
/// cache, in which case `get`, `get_multi` and `get_all` are answered from it
/// until [`Session::reset_values`]. Writes always go to the store and never
/// touch the cache; call `load_values` again to observe them locally.
pub struct Session<W> {
    id: String,
    store: Arc<dyn Store>,
    cookie: CookieOptions,
    set_cookie: SetCookieHook<W>,
    writer: W,
    values: Option<HashMap<String, Value>>,
}

impl<W> Session<W> {
    pub(crate) fn new(
        id: String,
        store: Arc<dyn Store>,
        cookie: CookieOptions,
        set_cookie: SetCookieHook<W>,
        writer: W,
    ) -> Self {
        Self {
            id,
            store,
            cookie,
            set_cookie,
            writer,
            values: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport handle the session writes its cookie through
    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub(crate) fn emit_cookie(&self) -> Result<()> {
        (self.set_cookie)(&Cookie::for_session(&self.cookie, &self.id), &self.writer)
    }

    /// Re-point this session at `id` and write its token to the client
    pub fn write_cookie(&mut self, id: &str) -> Result<()> {
        self.id = id.to_string();
        self.values = None;
        self.emit_cookie()
    }

    /// Write an already-expired token so the client forgets this session.
    ///
    /// The record itself is left in the store.
    pub fn clear_cookie(&self) -> Result<()> {
        (self.set_cookie)(&Cookie::expired(&self.cookie), &self.writer)
    }

    /// Fetch every field once and serve later reads from memory
    pub async fn load_values(&mut self) -> Result<()> {
        let values = self.store.get_all(&self.id).await?;
        self.values = Some(values);
        Ok(())
    }

    pub fn reset_values(&mut self) {
        self.values = None;
    }

    pub fn values_loaded(&self) -> bool {
        self.values.is_some()
    }

    pub async fn get(&self, key: &str) -> Result<Value> {
        if let Some(values) = &self.values {
            return values.get(key).cloned().ok_or(Error::FieldNotFound);
        }
        Ok(self.store.get(&self.id, key).await?)
    }

    /// Absent keys come back as `Value::Nil`
    pub async fn get_multi(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        if let Some(values) = &self.values {
            return Ok(keys
                .iter()
                .map(|k| (k.to_string(), values.get(*k).cloned().unwrap_or(Value::Nil)))
                .collect());
        }
        Ok(self.store.get_multi(&self.id, keys).await?)
    }

    pub async fn get_all(&self) -> Result<HashMap<String, Value>> {
        if let Some(values) = &self.values {
            return Ok(values.clone());
        }
        Ok(self.store.get_all(&self.id).await?)
    }

    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        Ok(self.store.set(&self.id, key, value.into()).await?)
    }

    pub async fn set_multi(&self, values: HashMap<String, Value>) -> Result<()> {
        Ok(self.store.set_multi(&self.id, values).await?)
    }

    pub async fn commit(&self) -> Result<()> {
        Ok(self.store.commit(&self.id).await?)
    }

    /// Drop pending writes; call it when a request ends without `commit`
    pub async fn rollback(&self) -> Result<()> {
        Ok(self.store.rollback(&self.id).await?)
    }

    pub async fn delete(&self, keys: &[&str]) -> Result<()> {
        Ok(self.store.delete(&self.id, keys).await?)
    }

    pub async fn clear(&self) -> Result<()> {
        Ok(self.store.clear(&self.id).await?)
    }

    /// Remove the record from the store and expire the client's token
    pub async fn destroy(&mut self) -> Result<()> {
        self.store.destroy(&self.id).await?;
        self.values = None;
        self.clear_cookie()?;
        debug!("Destroyed session");
        Ok(())
    }

    pub fn int(&self, r: Result<Value>) -> Result<i32> {
        Ok(self.store.int(Ok(r?))?)
    }

    pub fn int64(&self, r: Result<Value>) -> Result<i64> {
        Ok(self.store.int64(Ok(r?))?)
    }

    pub fn uint64(&self, r: Result<Value>) -> Result<u64> {
        Ok(self.store.uint64(Ok(r?))?)
    }

    pub fn float64(&self, r: Result<Value>) -> Result<f64> {
        Ok(self.store.float64(Ok(r?))?)
    }

    pub fn string(&self, r: Result<Value>) -> Result<String> {
        Ok(self.store.string(Ok(r?))?)
    }

    pub fn bytes(&self, r: Result<Value>) -> Result<Vec<u8>> {
        Ok(self.store.bytes(Ok(r?))?)
    }

    pub fn bool(&self, r: Result<Value>) -> Result<bool> {
        Ok(self.store.bool(Ok(r?))?)
    }
}
