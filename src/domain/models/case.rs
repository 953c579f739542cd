//! Case domain model.
//!
//! A case is one unit of simulation work progressing through the fixed
//! local -> remote -> local pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::StepOutcome;

/// Status of a case in the processing pipeline.
///
/// The non-terminal step statuses double as the workflow resume point: a case
/// restarted after a crash re-enters the step named by its persisted status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Case is registered but not yet dispatched
    New,
    /// Local preprocessing (input interpreter) in progress
    Preprocessing,
    /// Bulk upload to the remote host in progress
    Uploading,
    /// Remote simulation launched; waiting on the completion marker
    RemoteExecuting,
    /// Bulk download of result files in progress
    Downloading,
    /// Local postprocessing (result converter) in progress
    Postprocessing,
    /// Pipeline finished successfully
    Completed,
    /// Pipeline failed permanently
    Failed,
    /// Progress timed out; awaiting reconciliation requeue
    Stuck,
}

impl Default for CaseStatus {
    fn default() -> Self {
        Self::New
    }
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Preprocessing => "preprocessing",
            Self::Uploading => "uploading",
            Self::RemoteExecuting => "remote_executing",
            Self::Downloading => "downloading",
            Self::Postprocessing => "postprocessing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stuck => "stuck",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(Self::New),
            "preprocessing" => Some(Self::Preprocessing),
            "uploading" => Some(Self::Uploading),
            "remote_executing" => Some(Self::RemoteExecuting),
            "downloading" => Some(Self::Downloading),
            "postprocessing" => Some(Self::Postprocessing),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "stuck" => Some(Self::Stuck),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if this is an active state: non-terminal and not stuck.
    ///
    /// Resources may only stay locked while their holder is active.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Stuck)
    }

    /// Check if a case in this state may be handed to the scheduler.
    pub fn is_dispatchable(&self) -> bool {
        self.is_active()
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<CaseStatus> {
        match self {
            Self::New => vec![Self::Preprocessing, Self::Failed, Self::Stuck],
            Self::Preprocessing => vec![Self::Uploading, Self::Failed, Self::Stuck],
            Self::Uploading => vec![Self::RemoteExecuting, Self::Failed, Self::Stuck],
            Self::RemoteExecuting => vec![Self::Downloading, Self::Failed, Self::Stuck],
            Self::Downloading => vec![Self::Postprocessing, Self::Failed, Self::Stuck],
            Self::Postprocessing => vec![Self::Completed, Self::Failed, Self::Stuck],
            Self::Completed | Self::Failed => vec![],
            // Reconciliation requeues a stuck case into the step it left off at
            Self::Stuck => vec![
                Self::New,
                Self::Preprocessing,
                Self::Uploading,
                Self::RemoteExecuting,
                Self::Downloading,
                Self::Postprocessing,
            ],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self == &next || self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority level for cases (higher = scheduled sooner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
    Critical = 5,
}

impl Default for CasePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl CasePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for CasePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempted pipeline step, as recorded in the case's step history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Pipeline step name (e.g. "upload")
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: StepOutcome,
}

impl StepRecord {
    pub fn new(step: impl Into<String>, started_at: DateTime<Utc>, outcome: StepOutcome) -> Self {
        Self {
            step: step.into(),
            started_at,
            finished_at: Some(Utc::now()),
            outcome,
        }
    }
}

/// A unit of work progressing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Unique, immutable identifier supplied by the intake collaborator
    pub id: String,
    /// Local directory holding the case input files
    pub source_path: String,
    /// Current pipeline status
    pub status: CaseStatus,
    /// Scheduling priority
    pub priority: CasePriority,
    /// Accelerator slot currently assigned, if any
    pub assigned_resource: Option<String>,
    /// Attempts made for the current step
    pub retry_count: u32,
    /// Last categorized error kind, retained for diagnosis
    pub last_error_kind: Option<String>,
    /// Last error message, retained for diagnosis
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Case {
    /// Create a new case in status New.
    pub fn new(id: impl Into<String>, source_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_path: source_path.into(),
            status: CaseStatus::New,
            priority: CasePriority::default(),
            assigned_resource: None,
            retry_count: 0,
            last_error_kind: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: CasePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Check if the case is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Hours this case has been waiting since registration.
    pub fn wait_hours(&self, now: DateTime<Utc>) -> f64 {
        let waited = now - self.created_at;
        waited.num_milliseconds() as f64 / 3_600_000.0
    }

    /// Validate the case record.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Case id cannot be empty".to_string());
        }
        if self.source_path.trim().is_empty() {
            return Err("Case source path cannot be empty".to_string());
        }
        Ok(())
    }
}
