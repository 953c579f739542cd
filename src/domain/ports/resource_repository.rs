//! Resource repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::Resource;

/// Persistence and atomic locking for accelerator slots.
///
/// `acquire_any` must be a single atomic claim: two concurrent callers can
/// never be handed the same slot.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Register a slot as Free if it is not already known. Existing rows
    /// (including their lock state) are left untouched.
    async fn upsert(&self, id: &str) -> DomainResult<()>;

    /// Atomically claim one Free slot for `case_id` and return its id, or
    /// [`DomainError::ResourceExhausted`](crate::domain::errors::DomainError)
    /// when none is free.
    async fn acquire_any(&self, case_id: &str) -> DomainResult<String>;

    /// Unlock whatever slot `case_id` holds; no-op when it holds none.
    async fn release_by_holder(&self, case_id: &str) -> DomainResult<()>;

    /// Force-unlock a specific slot regardless of holder.
    async fn force_release(&self, id: &str) -> DomainResult<()>;

    /// Fetch one slot by id.
    async fn get(&self, id: &str) -> DomainResult<Option<Resource>>;

    /// All known slots, ordered by id.
    async fn list_all(&self) -> DomainResult<Vec<Resource>>;

    /// Locked slots whose lock is older than `cutoff`.
    async fn list_locked_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Resource>>;
}
