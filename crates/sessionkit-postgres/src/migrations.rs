//! Versioned schema migrations for the PostgreSQL session store
//!
//! Applied migrations are tracked in `<table>_schema_migrations` so several
//! session tables can share one database. `{table}` in the SQL below is
//! replaced with the configured table name.

use sessionkit_core::{StoreError, StoreResult};
use sqlx::PgPool;
use tracing::{debug, info};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create sessions table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Create sessions expiry index",
        up_sql: r#"
            CREATE INDEX IF NOT EXISTS idx_{table}_created_at
            ON {table}(created_at)
        "#,
    },
];

fn render(sql: &str, table: &str) -> String {
    sql.replace("{table}", table)
}

/// Run all pending migrations against `table`
pub async fn run_migrations(pool: &PgPool, table: &str) -> StoreResult<()> {
    let tracking = format!("{}_schema_migrations", table);

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        tracking
    ))
    .execute(pool)
    .await
    .map_err(|e| StoreError::Backend(format!("Failed to create {}: {}", tracking, e)))?;

    let applied_versions: Vec<i32> =
        sqlx::query_scalar(&format!("SELECT version FROM {}", tracking))
            .fetch_all(pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!("Failed to fetch applied migrations: {}", e))
            })?;

    debug!(
        "Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            continue;
        }

        info!(
            "Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(&render(migration.up_sql, table))
            .execute(pool)
            .await
            .map_err(|e| {
                StoreError::Backend(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(&format!(
            "INSERT INTO {} (version, description) VALUES ($1, $2)
             ON CONFLICT (version) DO NOTHING",
            tracking
        ))
        .bind(migration.version)
        .bind(migration.description)
        .execute(pool)
        .await
        .map_err(|e| {
            StoreError::Backend(format!(
                "Failed to record migration {}: {}",
                migration.version, e
            ))
        })?;
    }

    Ok(())
}

/// Highest migration version recorded for `table`, if any
pub async fn current_version(pool: &PgPool, table: &str) -> StoreResult<Option<i32>> {
    sqlx::query_scalar(&format!(
        "SELECT MAX(version) FROM {}_schema_migrations",
        table
    ))
    .fetch_one(pool)
    .await
    .map_err(|e| StoreError::Backend(format!("Failed to read schema version: {}", e)))
}
