//! Case repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Case, CasePriority, CaseStatus, ErrorKind, StepRecord};

/// Durable, concurrency-safe persistence for case state.
///
/// Every worker holds its own implementation handle; all mutations are atomic
/// at the statement level so concurrent workers can never lose updates.
/// `compare_and_set_status` is the only mutation path for `status`.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// Insert a new case (status must be New). Fails with
    /// [`DomainError::DuplicateCase`](crate::domain::errors::DomainError) if
    /// the id already exists.
    async fn insert(&self, case: &Case) -> DomainResult<()>;

    /// Fetch a case by id.
    async fn get(&self, id: &str) -> DomainResult<Option<Case>>;

    /// Cases in the given status, ordered by creation time ascending.
    async fn list_by_status(&self, status: CaseStatus) -> DomainResult<Vec<Case>>;

    /// All cases eligible for dispatch (New or a step status), ordered by
    /// creation time ascending.
    async fn list_dispatchable(&self) -> DomainResult<Vec<Case>>;

    /// All cases, ordered by creation time ascending.
    async fn list_all(&self) -> DomainResult<Vec<Case>>;

    /// Atomically set `status = next` iff the current status equals
    /// `expected`; returns
    /// [`DomainError::StatusConflict`](crate::domain::errors::DomainError)
    /// when another worker got there first.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: CaseStatus,
        next: CaseStatus,
    ) -> DomainResult<()>;

    /// Record the resource assignment on the case row (None clears it).
    async fn assign_resource(&self, id: &str, resource_id: Option<&str>) -> DomainResult<()>;

    /// Append a step record to the case history and bump `updated_at`.
    async fn append_step_record(&self, id: &str, record: &StepRecord) -> DomainResult<()>;

    /// Full step history, oldest first.
    async fn step_history(&self, id: &str) -> DomainResult<Vec<StepRecord>>;

    /// Name of the most recently started step, if any.
    async fn last_started_step(&self, id: &str) -> DomainResult<Option<String>>;

    /// Update scheduling priority.
    async fn set_priority(&self, id: &str, priority: CasePriority) -> DomainResult<()>;

    /// Record the last categorized error for diagnosis.
    async fn record_error(&self, id: &str, kind: ErrorKind, message: &str) -> DomainResult<()>;

    /// Increment the current step's attempt counter, returning the new value.
    async fn increment_retry(&self, id: &str) -> DomainResult<u32>;

    /// Reset the attempt counter (called when a step succeeds).
    async fn reset_retry(&self, id: &str) -> DomainResult<()>;

    /// Active cases whose `updated_at` is older than `cutoff` (stall
    /// candidates for reconciliation).
    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Case>>;
}
