//! PostgreSQL evaluation repository implementation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use pennant_core::{Evaluation, EvaluationId, EvaluationList, FlagId, FlagKey, Value};

use crate::error::{StorageError, StorageResult};
use crate::traits::{EvaluationRepository, EvaluationResults};

use crate::db::parse_uuid;

const COLUMNS: &str = "id, user_id, flag_id, flag_key, flag_version, request_hash, value, error, \
                       updated_at";

const PREFIXED_COLUMNS: &str = "e.id, e.user_id, e.flag_id, e.flag_key, e.flag_version, \
                                e.request_hash, e.value, e.error, e.updated_at";

/// PostgreSQL implementation of the evaluation repository.
///
/// The `evaluations` table carries a unique index over (user_id, flag_id);
/// both replace operations upsert against it. Batch upserts run as
/// individual statements: evaluation records are a cache, not a source of
/// truth, so partial success is acceptable.
#[derive(Debug, Clone)]
pub struct PostgresEvaluationRepository {
    pool: Pool<Postgres>,
}

impl PostgresEvaluationRepository {
    /// Creates a new PostgreSQL evaluation repository.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn upsert(
        &self,
        user_id: &str,
        eval: &Evaluation,
        request_hash: &str,
    ) -> StorageResult<()> {
        let value_json = eval
            .value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO evaluations (id, user_id, flag_id, flag_key, flag_version, request_hash,
                                     value, error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, flag_id) DO UPDATE SET
                flag_key = excluded.flag_key,
                flag_version = excluded.flag_version,
                request_hash = excluded.request_hash,
                value = excluded.value,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(eval.id.0.to_string())
        .bind(user_id)
        .bind(eval.flag_id.0.to_string())
        .bind(eval.flag_key.as_str())
        .bind(eval.flag_version)
        .bind(request_hash)
        .bind(value_json)
        .bind(&eval.error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl EvaluationRepository for PostgresEvaluationRepository {
    async fn find_all_by_user_id(
        &self,
        user_id: &str,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> StorageResult<EvaluationResults> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM evaluations
            WHERE user_id = $1 AND ($2::text IS NULL OR flag_key LIKE '%' || $2 || '%')
            ORDER BY flag_key ASC
            LIMIT $4 OFFSET $3
            "#
        ))
        .bind(user_id)
        .bind(search)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let evaluations = rows
            .iter()
            .map(row_to_evaluation)
            .collect::<StorageResult<_>>()?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM evaluations
            WHERE user_id = $1 AND ($2::text IS NULL OR flag_key LIKE '%' || $2 || '%')
            "#,
        )
        .bind(user_id)
        .bind(search)
        .fetch_one(&self.pool)
        .await?;

        Ok(EvaluationResults { evaluations, total })
    }

    async fn find_by_user_id_and_flag_id(
        &self,
        user_id: &str,
        flag_id: FlagId,
    ) -> StorageResult<Option<Evaluation>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM evaluations WHERE user_id = $1 AND flag_id = $2"
        ))
        .bind(user_id)
        .bind(flag_id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_evaluation).transpose()
    }

    async fn find_by_req_hash_and_flag_key(
        &self,
        req_hash: &str,
        flag_key: &FlagKey,
    ) -> StorageResult<Option<Evaluation>> {
        // Joined against flags so a record computed for an older flag
        // version (or a deleted flag) reads as a miss instead of a stale
        // answer.
        let row = sqlx::query(&format!(
            r#"
            SELECT {PREFIXED_COLUMNS}
            FROM evaluations e
            JOIN flags f ON f.id = e.flag_id
            WHERE e.request_hash = $1 AND e.flag_key = $2 AND e.flag_version = f.version
            "#
        ))
        .bind(req_hash)
        .bind(flag_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_evaluation).transpose()
    }

    async fn find_all_by_req_hash(&self, req_hash: &str) -> StorageResult<Option<EvaluationList>> {
        // A batch is only reusable as a whole: every record must match its
        // flag's current version and the batch must still cover every flag.
        // Anything less is a miss and the pipeline recomputes.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PREFIXED_COLUMNS}, f.version AS current_version
            FROM evaluations e
            LEFT JOIN flags f ON f.id = e.flag_id
            WHERE e.request_hash = $1
            ORDER BY e.flag_key ASC
            "#
        ))
        .bind(req_hash)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let total_flags: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flags")
            .fetch_one(&self.pool)
            .await?;
        if rows.len() as i64 != total_flags {
            return Ok(None);
        }

        let mut evals = EvaluationList::with_capacity(rows.len());
        for row in &rows {
            let current_version: Option<i64> = row.try_get("current_version")?;
            let eval = row_to_evaluation(row)?;
            if current_version != Some(eval.flag_version) {
                return Ok(None);
            }
            evals.push(eval);
        }
        Ok(Some(evals))
    }

    async fn replace_one(&self, user_id: &str, eval: &Evaluation) -> StorageResult<()> {
        self.upsert(user_id, eval, &eval.request_hash).await
    }

    async fn replace_all(
        &self,
        user_id: &str,
        req_hash: &str,
        evals: &EvaluationList,
    ) -> StorageResult<()> {
        for eval in evals {
            self.upsert(user_id, eval, req_hash).await?;
        }
        Ok(())
    }

    async fn delete_all_by_user_id(&self, user_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM evaluations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: EvaluationId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM evaluations WHERE id = $1")
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Evaluation", "id", id.0.to_string()));
        }
        Ok(())
    }
}

fn row_to_evaluation(row: &sqlx::postgres::PgRow) -> StorageResult<Evaluation> {
    let id: String = row.try_get("id")?;
    let flag_id: String = row.try_get("flag_id")?;
    let flag_key: String = row.try_get("flag_key")?;
    let flag_version: i64 = row.try_get("flag_version")?;
    let request_hash: String = row.try_get("request_hash")?;
    let value_json: Option<String> = row.try_get("value")?;
    let error: Option<String> = row.try_get("error")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let value: Option<Value> = value_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(Evaluation {
        id: EvaluationId::from_uuid(parse_uuid(&id)?),
        flag_id: FlagId::from_uuid(parse_uuid(&flag_id)?),
        flag_key: FlagKey(flag_key),
        flag_version,
        value,
        error,
        stack_trace: None,
        request_hash,
        updated_at,
    })
}
