//! PostgreSQL repository implementations.

mod evaluations;
mod flags;
mod segments;
mod users;

pub use evaluations::PostgresEvaluationRepository;
pub use flags::PostgresFlagRepository;
pub use segments::PostgresSegmentRepository;
pub use users::PostgresUserRepository;

use sqlx::{Pool, Postgres};

/// PostgreSQL repositories bundle.
#[derive(Debug, Clone)]
pub struct PostgresRepositories {
    pub flags: PostgresFlagRepository,
    pub segments: PostgresSegmentRepository,
    pub evaluations: PostgresEvaluationRepository,
    pub users: PostgresUserRepository,
}

impl PostgresRepositories {
    /// Creates a new set of PostgreSQL repositories.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            flags: PostgresFlagRepository::new(pool.clone()),
            segments: PostgresSegmentRepository::new(pool.clone()),
            evaluations: PostgresEvaluationRepository::new(pool.clone()),
            users: PostgresUserRepository::new(pool),
        }
    }
}
