//! PostgreSQL segment repository implementation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use pennant_core::{Segment, SegmentId, SegmentRule};

use crate::error::StorageResult;
use crate::traits::SegmentRepository;

use crate::db::parse_uuid;

/// PostgreSQL implementation of the segment repository.
#[derive(Debug, Clone)]
pub struct PostgresSegmentRepository {
    pool: Pool<Postgres>,
}

impl PostgresSegmentRepository {
    /// Creates a new PostgreSQL segment repository.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl SegmentRepository for PostgresSegmentRepository {
    async fn find_all(
        &self,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> StorageResult<Vec<Segment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, rules, created_at, updated_at
            FROM segments
            ORDER BY name ASC
            LIMIT $2 OFFSET $1
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_segment).collect()
    }
}

fn row_to_segment(row: &sqlx::postgres::PgRow) -> StorageResult<Segment> {
    let id: String = row.try_get("id")?;
    let name: String = row.try_get("name")?;
    let description: Option<String> = row.try_get("description")?;
    let rules_json: String = row.try_get("rules")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let rules: Vec<SegmentRule> = serde_json::from_str(&rules_json)?;

    Ok(Segment {
        id: SegmentId::from_uuid(parse_uuid(&id)?),
        name,
        description,
        rules,
        created_at,
        updated_at,
    })
}
