//! SQLite implementation of the ResourceRepository.
//!
//! The claim path is a single UPDATE over a subquery, so slot selection and
//! locking happen in one atomic statement: concurrent acquirers can never be
//! handed the same slot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Resource, ResourceStatus};
use crate::domain::ports::ResourceRepository;

use super::{parse_datetime, parse_optional_datetime};

#[derive(Clone)]
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: String,
    status: String,
    holder_case_id: Option<String>,
    locked_at: Option<String>,
    first_seen_at: String,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = DomainError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        let status = ResourceStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown resource status: {}", row.status))
        })?;

        Ok(Resource {
            id: row.id,
            status,
            holder_case_id: row.holder_case_id,
            locked_at: parse_optional_datetime(row.locked_at)?,
            first_seen_at: parse_datetime(&row.first_seen_at)?,
        })
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository {
    async fn upsert(&self, id: &str) -> DomainResult<()> {
        // Existing rows keep their lock state untouched.
        sqlx::query(
            "INSERT OR IGNORE INTO resources (id, status, first_seen_at) VALUES (?, 'free', ?)",
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn acquire_any(&self, case_id: &str) -> DomainResult<String> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"UPDATE resources
               SET status = 'locked', holder_case_id = ?, locked_at = ?
               WHERE id = (
                   SELECT id FROM resources WHERE status = 'free' ORDER BY id LIMIT 1
               )
               RETURNING id"#,
        )
        .bind(case_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id,)| id).ok_or(DomainError::ResourceExhausted)
    }

    async fn release_by_holder(&self, case_id: &str) -> DomainResult<()> {
        // Idempotent: releasing with no held slot affects zero rows.
        sqlx::query(
            r#"UPDATE resources
               SET status = 'free', holder_case_id = NULL, locked_at = NULL
               WHERE holder_case_id = ?"#,
        )
        .bind(case_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn force_release(&self, id: &str) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE resources
               SET status = 'free', holder_case_id = NULL, locked_at = NULL
               WHERE id = ?"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ResourceNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Resource>> {
        let row: Option<ResourceRow> = sqlx::query_as("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Resource::try_from).transpose()
    }

    async fn list_all(&self) -> DomainResult<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as("SELECT * FROM resources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Resource::try_from).collect()
    }

    async fn list_locked_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Resource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(
            "SELECT * FROM resources WHERE status = 'locked' AND locked_at < ? ORDER BY id",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Resource::try_from).collect()
    }
}
