//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entity not found.
    #[error("{entity_type} with {field}={value} not found")]
    NotFound {
        entity_type: &'static str,
        field: &'static str,
        value: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Creates a NotFound error.
    pub fn not_found(
        entity_type: &'static str,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            entity_type,
            field,
            value: value.into(),
        }
    }

    /// Checks if this error is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
