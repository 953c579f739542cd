//! Accelerator resource pool.
//!
//! Wraps the resource repository with discovery reconciliation and zombie
//! lock reclamation. Workflows never touch resource rows directly; every
//! lock mutation funnels through this service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::try_join_all;
use tracing::{info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::Resource;
use crate::domain::ports::{CaseRepository, ResourceRepository};

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// Slot id now locked for the requesting case
    Acquired(String),
    /// Every slot is locked; the case stays pending
    Exhausted,
}

/// Discovers, locks, and reclaims accelerator slots.
pub struct ResourcePool {
    resources: Arc<dyn ResourceRepository>,
    cases: Arc<dyn CaseRepository>,
}

impl ResourcePool {
    pub fn new(resources: Arc<dyn ResourceRepository>, cases: Arc<dyn CaseRepository>) -> Self {
        Self { resources, cases }
    }

    /// Reconcile the persisted slot set against the latest discovery input.
    ///
    /// Newly seen slots are registered Free; existing rows keep their lock
    /// state. Slots that disappeared from discovery are left in place so an
    /// in-flight holder is not yanked out from under a running case.
    pub async fn refresh(&self, discovered: &[String]) -> Result<()> {
        try_join_all(discovered.iter().map(|slot| self.resources.upsert(slot)))
            .await
            .context("Failed to register discovered resources")?;
        Ok(())
    }

    /// Atomically claim one free slot for `case_id`.
    pub async fn acquire_any(&self, case_id: &str) -> Result<AcquireResult> {
        match self.resources.acquire_any(case_id).await {
            Ok(slot) => {
                self.cases
                    .assign_resource(case_id, Some(&slot))
                    .await
                    .with_context(|| format!("Failed to record assignment of {slot}"))?;
                info!(case_id, slot, "Acquired resource");
                Ok(AcquireResult::Acquired(slot))
            }
            Err(DomainError::ResourceExhausted) => Ok(AcquireResult::Exhausted),
            Err(e) => Err(e).context("Resource acquisition failed"),
        }
    }

    /// Release whatever slot `case_id` holds. Idempotent.
    pub async fn release(&self, case_id: &str) -> Result<()> {
        self.resources
            .release_by_holder(case_id)
            .await
            .with_context(|| format!("Failed to release resource held by {case_id}"))?;
        self.cases
            .assign_resource(case_id, None)
            .await
            .with_context(|| format!("Failed to clear assignment for {case_id}"))?;
        Ok(())
    }

    /// Force-release locks older than `stale_after` whose holder case is no
    /// longer active (terminal, stuck, or unknown). Returns the reclaimed
    /// slots.
    pub async fn reclaim_zombies(&self, stale_after: Duration) -> Result<Vec<Resource>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after).context("Invalid stale_after duration")?;

        let stale = self
            .resources
            .list_locked_before(cutoff)
            .await
            .context("Failed to scan for stale locks")?;

        let mut reclaimed = Vec::new();
        for resource in stale {
            let holder_active = match &resource.holder_case_id {
                Some(holder) => self
                    .cases
                    .get(holder)
                    .await
                    .context("Failed to look up lock holder")?
                    .is_some_and(|case| case.status.is_active()),
                None => false,
            };

            if holder_active {
                continue;
            }

            self.resources
                .force_release(&resource.id)
                .await
                .with_context(|| format!("Failed to force-release {}", resource.id))?;
            if let Some(holder) = &resource.holder_case_id {
                self.cases.assign_resource(holder, None).await.ok();
            }

            warn!(
                slot = resource.id,
                holder = resource.holder_case_id.as_deref().unwrap_or("-"),
                "Reclaimed zombie resource lock"
            );
            reclaimed.push(resource);
        }

        Ok(reclaimed)
    }

    /// Number of currently free slots.
    pub async fn free_count(&self) -> Result<usize> {
        let all = self.resources.list_all().await.context("Failed to list resources")?;
        Ok(all.iter().filter(|r| r.is_free()).count())
    }

    /// All known slots.
    pub async fn list(&self) -> Result<Vec<Resource>> {
        self.resources.list_all().await.context("Failed to list resources")
    }
}
