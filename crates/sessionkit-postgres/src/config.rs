//! Configuration for the PostgreSQL session store

use std::time::Duration;

use sessionkit_core::DEFAULT_ID_LENGTH;

/// Configuration for [`PostgresStore`](crate::PostgresStore)
///
/// Pool settings are handed to the underlying sqlx pool unchanged.
///
/// # Example
/// ```
/// use sessionkit_postgres::PostgresStoreConfig;
/// use std::time::Duration;
///
/// let config = PostgresStoreConfig::default()
///     .with_table("web_sessions")
///     .with_ttl(Duration::from_secs(3600))
///     .with_max_connections(50);
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    /// Table holding one row per session
    pub table: String,

    /// Rows older than this are invisible to reads and removed by `prune`
    pub ttl: Duration,

    /// Length of valid session identifiers
    pub id_length: usize,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Timeout for acquiring a connection from the pool
    pub acquire_timeout: Duration,

    /// How long a connection can remain idle before being closed
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,

    /// Write transactions with no `set` for this long are rolled back and
    /// their connection returned to the pool; `None` keeps them until
    /// `commit` or `rollback`
    pub transaction_idle_timeout: Option<Duration>,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            table: "sessions".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
            id_length: DEFAULT_ID_LENGTH,
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            transaction_idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl PostgresStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn with_transaction_idle_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_idle_timeout = Some(timeout);
        self
    }

    pub fn without_transaction_idle_timeout(mut self) -> Self {
        self.transaction_idle_timeout = None;
        self
    }

    /// The table name is spliced into SQL, so only plain identifiers are allowed
    pub(crate) fn table_is_valid(&self) -> bool {
        let mut chars = self.table.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PostgresStoreConfig::default();
        assert_eq!(config.table, "sessions");
        assert_eq!(config.ttl, Duration::from_secs(86400));
        assert_eq!(config.id_length, 32);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.transaction_idle_timeout, Some(Duration::from_secs(60)));
        assert!(config.table_is_valid());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PostgresStoreConfig::new()
            .with_table("app_sessions")
            .with_ttl(Duration::from_secs(60))
            .with_max_connections(50);

        assert_eq!(config.table, "app_sessions");
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.max_connections, 50);

        // Other values should remain at defaults
        assert_eq!(config.idle_timeout, Duration::from_secs(600));

        let config = config.without_transaction_idle_timeout();
        assert_eq!(config.transaction_idle_timeout, None);
        let config = config.with_transaction_idle_timeout(Duration::from_secs(5));
        assert_eq!(config.transaction_idle_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(PostgresStoreConfig::new().with_table("_s2").table_is_valid());
        assert!(!PostgresStoreConfig::new().with_table("").table_is_valid());
        assert!(!PostgresStoreConfig::new().with_table("2fast").table_is_valid());
        assert!(
            !PostgresStoreConfig::new()
                .with_table("sessions; DROP TABLE users")
                .table_is_valid()
        );
    }
}
