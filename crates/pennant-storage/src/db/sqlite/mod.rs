//! SQLite repository implementations.
//!
//! SQLite is used for:
//! - Local development
//! - On-premise single-node deployments
//! - Testing

mod evaluations;
mod flags;
mod segments;
mod users;

pub use evaluations::SqliteEvaluationRepository;
pub use flags::SqliteFlagRepository;
pub use segments::SqliteSegmentRepository;
pub use users::SqliteUserRepository;

use sqlx::{Pool, Sqlite};

/// SQLite repositories bundle.
#[derive(Debug, Clone)]
pub struct SqliteRepositories {
    pub flags: SqliteFlagRepository,
    pub segments: SqliteSegmentRepository,
    pub evaluations: SqliteEvaluationRepository,
    pub users: SqliteUserRepository,
}

impl SqliteRepositories {
    /// Creates a new set of SQLite repositories.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            flags: SqliteFlagRepository::new(pool.clone()),
            segments: SqliteSegmentRepository::new(pool.clone()),
            evaluations: SqliteEvaluationRepository::new(pool.clone()),
            users: SqliteUserRepository::new(pool),
        }
    }
}
