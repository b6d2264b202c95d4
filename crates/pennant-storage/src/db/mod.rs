//! Database connection and pool management.

pub mod postgres;
pub mod sqlite;

use std::time::Duration;

use sqlx::{Pool, Postgres, Sqlite};

use pennant_core::{UserContext, Value};

use crate::error::{StorageError, StorageResult};

/// Embedded schema, applied idempotently at startup and by tests.
pub const SCHEMA: &str = include_str!("../../migrations/20250301_001_initial_schema.sql");

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (postgres:// or sqlite://).
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to keep open.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Idle timeout for connections in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://pennant.db?mode=rwc".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration from a connection URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Creates a new PostgreSQL configuration.
    pub fn postgres(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 20,
            min_connections: 5,
            ..Default::default()
        }
    }

    /// Creates an in-memory SQLite configuration (for testing).
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    /// Checks if this is a PostgreSQL configuration.
    pub fn is_postgres(&self) -> bool {
        self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")
    }

    /// Checks if this is a SQLite configuration.
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite://") || self.url.starts_with("sqlite:")
    }
}

/// A database connection pool that can be either PostgreSQL or SQLite.
#[derive(Debug, Clone)]
pub enum Database {
    Postgres(Pool<Postgres>),
    Sqlite(Pool<Sqlite>),
}

impl Database {
    /// Creates a new database connection from configuration.
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        if config.is_postgres() {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
                .connect(&config.url)
                .await?;
            Ok(Self::Postgres(pool))
        } else if config.is_sqlite() {
            let pool = sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
                .connect(&config.url)
                .await?;
            Ok(Self::Sqlite(pool))
        } else {
            Err(StorageError::Configuration(format!(
                "Unsupported database URL: {}",
                config.url
            )))
        }
    }

    /// Applies the embedded schema.
    pub async fn apply_schema(&self) -> StorageResult<()> {
        match self {
            Self::Postgres(pool) => {
                sqlx::raw_sql(SCHEMA).execute(pool).await?;
            }
            Self::Sqlite(pool) => {
                sqlx::raw_sql(SCHEMA).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Returns the PostgreSQL pool if this is a PostgreSQL database.
    pub fn postgres(&self) -> Option<&Pool<Postgres>> {
        match self {
            Self::Postgres(pool) => Some(pool),
            _ => None,
        }
    }

    /// Returns the SQLite pool if this is a SQLite database.
    pub fn sqlite(&self) -> Option<&Pool<Sqlite>> {
        match self {
            Self::Sqlite(pool) => Some(pool),
            _ => None,
        }
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }

    /// Checks if the database is healthy.
    pub async fn is_healthy(&self) -> bool {
        match self {
            Self::Postgres(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
            Self::Sqlite(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
        }
    }
}

pub(crate) fn parse_uuid(value: &str) -> StorageResult<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| StorageError::Configuration(format!("Invalid UUID in database: {e}")))
}

/// Rewrites the leading character of top-level context keys.
///
/// The document model reserves `$`-prefixed keys, so contexts are stored with
/// `$` rewritten to `%` and read back with the inverse transform. Only the
/// first character of top-level keys participates, which keeps the transform
/// an involution.
pub(crate) fn sanitize_context_keys(context: &UserContext, from: char, to: char) -> UserContext {
    context
        .iter()
        .map(|(key, value): (&String, &Value)| {
            let key = match key.strip_prefix(from) {
                Some(rest) => format!("{to}{rest}"),
                None => key.clone(),
            };
            (key, value.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_url_detection() {
        assert!(DatabaseConfig::postgres("postgres://localhost/pennant").is_postgres());
        assert!(DatabaseConfig::sqlite_memory().is_sqlite());
        assert!(!DatabaseConfig::sqlite_memory().is_postgres());
    }

    #[test]
    fn test_sanitize_escapes_reserved_prefix() {
        let ctx = UserContext::new()
            .set("$internal", 1)
            .set("plain", 2)
            .set("mid$dle", 3);

        let escaped = sanitize_context_keys(&ctx, '$', '%');
        assert!(escaped.has("%internal"));
        assert!(escaped.has("plain"));
        assert!(escaped.has("mid$dle")); // only the first character counts

        let restored = sanitize_context_keys(&escaped, '%', '$');
        assert_eq!(restored, ctx);
    }

    #[test]
    fn test_sanitize_round_trip_is_identity() {
        let ctx = UserContext::new()
            .set("$a", "x")
            .set("c", "z")
            .set("id", "u1");
        let stored = sanitize_context_keys(&ctx, '$', '%');
        let restored = sanitize_context_keys(&stored, '%', '$');
        assert_eq!(restored, ctx);
    }
}
