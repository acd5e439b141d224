//! Configuration for the Redis session store

use std::time::Duration;

use sessionkit_core::DEFAULT_ID_LENGTH;

/// Configuration for [`RedisStore`](crate::RedisStore)
///
/// # Example
/// ```
/// use sessionkit_redis::RedisStoreConfig;
/// use std::time::Duration;
///
/// let config = RedisStoreConfig::default()
///     .with_prefix("app:")
///     .with_ttl(Duration::from_secs(1800))
///     .with_extend_ttl(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Prepended to the session id to form the hash key
    pub prefix: String,

    /// Expiry armed on `create`; `None` keeps sessions until destroyed
    pub ttl: Option<Duration>,

    /// Re-arm `ttl` on every successful commit
    pub extend_ttl: bool,

    /// Length of valid session identifiers
    pub id_length: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            prefix: "session:".to_string(),
            ttl: None,
            extend_ttl: false,
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

impl RedisStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_extend_ttl(mut self, extend_ttl: bool) -> Self {
        self.extend_ttl = extend_ttl;
        self
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    /// TTL in milliseconds, 0 when unset
    pub(crate) fn ttl_millis(&self) -> i64 {
        self.ttl.map(|ttl| ttl.as_millis() as i64).unwrap_or(0)
    }
}
