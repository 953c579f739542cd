//! Priority scheduler with aging.
//!
//! Dispatch order is decided by a weighted-aging score: each case starts at
//! its priority's base weight and gains `aging_factor_per_hour` per hour of
//! waiting, so a low-priority case eventually overtakes any fixed-priority
//! stream and cannot starve. Low/Normal cases waiting past the starvation
//! threshold get an additional flat boost.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::models::{Case, CasePriority, SchedulerConfig};
use crate::domain::ports::CaseRepository;

/// Base score weight for a priority level.
fn base_weight(config: &SchedulerConfig, priority: CasePriority) -> f64 {
    let w = &config.weights;
    match priority {
        CasePriority::Low => w.low,
        CasePriority::Normal => w.normal,
        CasePriority::High => w.high,
        CasePriority::Urgent => w.urgent,
        CasePriority::Critical => w.critical,
    }
}

/// Dispatch score for a case at time `now`.
pub fn score_case(config: &SchedulerConfig, case: &Case, now: DateTime<Utc>) -> f64 {
    let wait_hours = case.wait_hours(now);
    let mut score = base_weight(config, case.priority) + config.aging_factor_per_hour * wait_hours;

    if wait_hours > config.starvation_threshold_hours && case.priority <= CasePriority::Normal {
        score += config.starvation_boost;
    }

    score
}

/// Orders pending cases for dispatch.
pub struct PriorityScheduler {
    repo: Arc<dyn CaseRepository>,
    config: SchedulerConfig,
}

impl PriorityScheduler {
    pub fn new(repo: Arc<dyn CaseRepository>, config: SchedulerConfig) -> Self {
        Self { repo, config }
    }

    /// Dispatch score for a case at time `now`.
    pub fn score(&self, case: &Case, now: DateTime<Utc>) -> f64 {
        score_case(&self.config, case, now)
    }

    /// Up to `limit` dispatchable cases, highest score first, ties broken by
    /// earliest creation time.
    pub async fn next_batch(&self, limit: usize) -> Result<Vec<Case>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = self
            .repo
            .list_dispatchable()
            .await
            .context("Failed to list dispatchable cases")?;

        let now = Utc::now();
        candidates.sort_by(|a, b| {
            self.score(b, now)
                .partial_cmp(&self.score(a, now))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        candidates.truncate(limit);

        if !candidates.is_empty() {
            let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
            info!(count = candidates.len(), cases = ?ids, "Scheduled next batch");
        } else {
            debug!("No dispatchable cases");
        }

        Ok(candidates)
    }
}
