//! SQLite flag repository implementation.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use pennant_core::{Flag, FlagId, FlagKey, FlagRule, Variant, VariantId};

use crate::db::parse_uuid;
use crate::error::{StorageError, StorageResult};
use crate::traits::{FlagRepository, FlagResults};

const COLUMNS: &str = "id, key, name, description, enabled, version, variants, rules, \
                       default_when_on, default_when_off, created_at, updated_at";

/// SQLite implementation of the flag repository.
#[derive(Debug, Clone)]
pub struct SqliteFlagRepository {
    pool: Pool<Sqlite>,
}

impl SqliteFlagRepository {
    /// Creates a new SQLite flag repository.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

impl FlagRepository for SqliteFlagRepository {
    async fn find_by_key(&self, key: &FlagKey) -> StorageResult<Option<Flag>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM flags WHERE key = ?1"))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_flag).transpose()
    }

    async fn find_all(
        &self,
        search: Option<&str>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> StorageResult<FlagResults> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM flags
            WHERE (?1 IS NULL OR key LIKE '%' || ?1 || '%')
            ORDER BY key ASC
            LIMIT COALESCE(?3, -1) OFFSET COALESCE(?2, 0)
            "#
        ))
        .bind(search)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let flags = rows.iter().map(row_to_flag).collect::<StorageResult<_>>()?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM flags WHERE (?1 IS NULL OR key LIKE '%' || ?1 || '%')",
        )
        .bind(search)
        .fetch_one(&self.pool)
        .await?;

        Ok(FlagResults { flags, total })
    }
}

fn row_to_flag(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Flag> {
    let id: String = row.try_get("id")?;
    let key: String = row.try_get("key")?;
    let name: String = row.try_get("name")?;
    let description: Option<String> = row.try_get("description")?;
    let enabled: bool = row.try_get("enabled")?;
    let version: i64 = row.try_get("version")?;
    let variants_json: String = row.try_get("variants")?;
    let rules_json: String = row.try_get("rules")?;
    let default_when_on: Option<String> = row.try_get("default_when_on")?;
    let default_when_off: Option<String> = row.try_get("default_when_off")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let variants: Vec<Variant> = serde_json::from_str(&variants_json)?;
    let rules: Vec<FlagRule> = serde_json::from_str(&rules_json)?;

    let flag_key = FlagKey::try_new(&key).ok_or_else(|| {
        StorageError::Configuration(format!("Invalid flag key in database: {key}"))
    })?;

    Ok(Flag {
        id: FlagId::from_uuid(parse_uuid(&id)?),
        key: flag_key,
        name,
        description,
        enabled,
        version,
        variants,
        rules,
        default_when_on: default_when_on
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(VariantId::from_uuid),
        default_when_off: default_when_off
            .as_deref()
            .map(parse_uuid)
            .transpose()?
            .map(VariantId::from_uuid),
        created_at,
        updated_at,
    })
}
