//! # Pennant Storage
//!
//! Storage abstraction layer for Nubster Pennant.
//!
//! This crate provides the repository traits the evaluation core consumes,
//! plus their implementations.
//!
//! ## Architecture
//!
//! - **Durable store**: the latest evaluation per (user, flag), users and the
//!   read-only flag/segment views, on PostgreSQL or SQLite
//! - **Cache layer**: a Redis write-through decorator over the evaluation
//!   store, keyed by request fingerprint
//!
//! ## Storage Backends
//!
//! - PostgreSQL (production)
//! - SQLite (development, on-prem single node, tests)
//! - Redis (caching layer)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pennant_storage::{Database, DatabaseConfig, PostgresRepositories};
//!
//! let config = DatabaseConfig::postgres("postgres://localhost/pennant");
//! let db = Database::connect(&config).await?;
//! db.apply_schema().await?;
//! let repos = PostgresRepositories::new(db.postgres().unwrap().clone());
//! ```

pub mod cache;
pub mod db;
pub mod error;
pub mod traits;

// Re-exports
pub use db::{Database, DatabaseConfig, SCHEMA};
pub use error::{StorageError, StorageResult};
pub use traits::*;

// PostgreSQL implementations
pub use db::postgres::{
    PostgresEvaluationRepository, PostgresFlagRepository, PostgresRepositories,
    PostgresSegmentRepository, PostgresUserRepository,
};

// SQLite implementations
pub use db::sqlite::{
    SqliteEvaluationRepository, SqliteFlagRepository, SqliteRepositories,
    SqliteSegmentRepository, SqliteUserRepository,
};

// Redis cache
pub use cache::{RedisCacheConfig, RedisEvaluationCache};
