//! SQLite segment repository implementation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use pennant_core::{Segment, SegmentId, SegmentRule};

use crate::db::parse_uuid;
use crate::error::StorageResult;
use crate::traits::SegmentRepository;

/// SQLite implementation of the segment repository.
#[derive(Debug, Clone)]
pub struct SqliteSegmentRepository {
    pool: Pool<Sqlite>,
}

impl SqliteSegmentRepository {
    /// Creates a new SQLite segment repository.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

impl SegmentRepository for SqliteSegmentRepository {
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
            LIMIT COALESCE(?2, -1) OFFSET COALESCE(?1, 0)
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_segment).collect()
    }
}

fn row_to_segment(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Segment> {
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
