//! SQLite user repository implementation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use pennant_core::{User, UserContext};

use crate::db::sanitize_context_keys;
use crate::error::{StorageError, StorageResult};
use crate::traits::{UserRepository, UserResults};

/// SQLite implementation of the user repository.
#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    pool: Pool<Sqlite>,
}

impl SqliteUserRepository {
    /// Creates a new SQLite user repository.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

impl UserRepository for SqliteUserRepository {
    async fn find_all(
        &self,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> StorageResult<UserResults> {
        let rows = sqlx::query(
            r#"
            SELECT id, context, updated_at
            FROM users
            WHERE (?1 IS NULL OR id = ?1)
            ORDER BY id ASC
            LIMIT COALESCE(?3, -1) OFFSET COALESCE(?2, 0)
            "#,
        )
        .bind(search)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let users = rows.iter().map(row_to_user).collect::<StorageResult<_>>()?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE (?1 IS NULL OR id = ?1)")
                .bind(search)
                .fetch_one(&self.pool)
                .await?;

        Ok(UserResults { users, total })
    }

    async fn replace(&self, user_id: &str, context: &UserContext) -> StorageResult<()> {
        let stored = sanitize_context_keys(context, '$', '%');
        let context_json = serde_json::to_string(&stored)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, context, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET
                context = excluded.context,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(context_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("User", "id", user_id));
        }
        Ok(())
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> StorageResult<User> {
    let id: String = row.try_get("id")?;
    let context_json: String = row.try_get("context")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let stored: UserContext = serde_json::from_str(&context_json)?;
    let context = sanitize_context_keys(&stored, '%', '$');

    Ok(User {
        id,
        context,
        updated_at,
    })
}
