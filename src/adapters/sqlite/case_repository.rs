//! SQLite implementation of the CaseRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Case, CasePriority, CaseStatus, ErrorKind, StepOutcome, StepRecord,
};
use crate::domain::ports::CaseRepository;

use super::{parse_datetime, parse_optional_datetime};

#[derive(Clone)]
pub struct SqliteCaseRepository {
    pool: SqlitePool,
}

impl SqliteCaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CaseRow {
    id: String,
    source_path: String,
    status: String,
    priority: String,
    assigned_resource: Option<String>,
    retry_count: i64,
    last_error_kind: Option<String>,
    last_error_message: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<CaseRow> for Case {
    type Error = DomainError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        let status = CaseStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown case status: {}", row.status))
        })?;
        let priority = CasePriority::from_str(&row.priority).ok_or_else(|| {
            DomainError::SerializationError(format!("unknown case priority: {}", row.priority))
        })?;

        Ok(Case {
            id: row.id,
            source_path: row.source_path,
            status,
            priority,
            assigned_resource: row.assigned_resource,
            retry_count: u32::try_from(row.retry_count.max(0)).unwrap_or(0),
            last_error_kind: row.last_error_kind,
            last_error_message: row.last_error_message,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StepRow {
    step: String,
    started_at: String,
    finished_at: Option<String>,
    success: i64,
    exit_code: Option<i64>,
    stdout: String,
    stderr: String,
    error_kind: Option<String>,
}

impl TryFrom<StepRow> for StepRecord {
    type Error = DomainError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        let error_kind = row.error_kind.as_deref().and_then(ErrorKind::from_str);
        Ok(StepRecord {
            step: row.step,
            started_at: parse_datetime(&row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
            outcome: StepOutcome {
                success: row.success != 0,
                stdout: row.stdout,
                stderr: row.stderr,
                exit_code: row.exit_code.and_then(|c| i32::try_from(c).ok()),
                error_kind,
            },
        })
    }
}

/// Statuses eligible for dispatch: New plus every in-pipeline step status.
const DISPATCHABLE_STATUSES: &str =
    "('new', 'preprocessing', 'uploading', 'remote_executing', 'downloading', 'postprocessing')";

#[async_trait]
impl CaseRepository for SqliteCaseRepository {
    async fn insert(&self, case: &Case) -> DomainResult<()> {
        case.validate().map_err(DomainError::ValidationFailed)?;

        let result = sqlx::query(
            r#"INSERT INTO cases (id, source_path, status, priority, assigned_resource,
               retry_count, last_error_kind, last_error_message, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&case.id)
        .bind(&case.source_path)
        .bind(case.status.as_str())
        .bind(case.priority.as_str())
        .bind(&case.assigned_resource)
        .bind(i64::from(case.retry_count))
        .bind(&case.last_error_kind)
        .bind(&case.last_error_message)
        .bind(case.created_at.to_rfc3339())
        .bind(case.updated_at.to_rfc3339())
        .bind(case.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DomainError::DuplicateCase(case.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Case>> {
        let row: Option<CaseRow> = sqlx::query_as("SELECT * FROM cases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Case::try_from).transpose()
    }

    async fn list_by_status(&self, status: CaseStatus) -> DomainResult<Vec<Case>> {
        let rows: Vec<CaseRow> =
            sqlx::query_as("SELECT * FROM cases WHERE status = ? ORDER BY created_at ASC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Case::try_from).collect()
    }

    async fn list_dispatchable(&self) -> DomainResult<Vec<Case>> {
        let query = format!(
            "SELECT * FROM cases WHERE status IN {DISPATCHABLE_STATUSES} ORDER BY created_at ASC"
        );
        let rows: Vec<CaseRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

        rows.into_iter().map(Case::try_from).collect()
    }

    async fn list_all(&self) -> DomainResult<Vec<Case>> {
        let rows: Vec<CaseRow> = sqlx::query_as("SELECT * FROM cases ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Case::try_from).collect()
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: CaseStatus,
        next: CaseStatus,
    ) -> DomainResult<()> {
        let now = Utc::now().to_rfc3339();
        let completed_at = if next.is_terminal() { Some(now.clone()) } else { None };

        // Single-statement CAS: the WHERE clause carries the expected status,
        // so a stale caller affects zero rows instead of clobbering.
        let result = sqlx::query(
            r#"UPDATE cases
               SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at)
               WHERE id = ? AND status = ?"#,
        )
        .bind(next.as_str())
        .bind(&now)
        .bind(completed_at)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            if self.get(id).await?.is_none() {
                return Err(DomainError::CaseNotFound(id.to_string()));
            }
            return Err(DomainError::StatusConflict {
                id: id.to_string(),
                expected: expected.as_str().to_string(),
            });
        }

        Ok(())
    }

    async fn assign_resource(&self, id: &str, resource_id: Option<&str>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE cases SET assigned_resource = ?, updated_at = ? WHERE id = ?")
            .bind(resource_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CaseNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn append_step_record(&self, id: &str, record: &StepRecord) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO case_steps (case_id, step, started_at, finished_at,
               success, exit_code, stdout, stderr, error_kind)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(&record.step)
        .bind(record.started_at.to_rfc3339())
        .bind(record.finished_at.map(|t| t.to_rfc3339()))
        .bind(i64::from(record.outcome.success))
        .bind(record.outcome.exit_code.map(i64::from))
        .bind(&record.outcome.stdout)
        .bind(&record.outcome.stderr)
        .bind(record.outcome.error_kind.map(|k| k.as_str()))
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("UPDATE cases SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CaseNotFound(id.to_string()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn step_history(&self, id: &str) -> DomainResult<Vec<StepRecord>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r#"SELECT step, started_at, finished_at, success, exit_code, stdout, stderr, error_kind
               FROM case_steps WHERE case_id = ? ORDER BY id ASC"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StepRecord::try_from).collect()
    }

    async fn last_started_step(&self, id: &str) -> DomainResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT step FROM case_steps WHERE case_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(step,)| step))
    }

    async fn set_priority(&self, id: &str, priority: CasePriority) -> DomainResult<()> {
        let result = sqlx::query("UPDATE cases SET priority = ?, updated_at = ? WHERE id = ?")
            .bind(priority.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CaseNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn record_error(&self, id: &str, kind: ErrorKind, message: &str) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE cases SET last_error_kind = ?, last_error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CaseNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: &str) -> DomainResult<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"UPDATE cases SET retry_count = retry_count + 1, updated_at = ?
               WHERE id = ? RETURNING retry_count"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((count,)) => Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX)),
            None => Err(DomainError::CaseNotFound(id.to_string())),
        }
    }

    async fn reset_retry(&self, id: &str) -> DomainResult<()> {
        let result = sqlx::query("UPDATE cases SET retry_count = 0, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CaseNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Case>> {
        let query = format!(
            "SELECT * FROM cases WHERE status IN {DISPATCHABLE_STATUSES} AND updated_at < ? \
             ORDER BY created_at ASC"
        );
        let rows: Vec<CaseRow> = sqlx::query_as(&query)
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Case::try_from).collect()
    }
}
