//! Accelerator resource model.
//!
//! A resource is one exclusively-lockable accelerator slot on the remote
//! host. Lock fields change only through the resource pool's atomic
//! acquire/release/reclaim operations, never directly from a workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lock state of an accelerator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Free,
    Locked,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Locked => "locked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" | "available" => Some(Self::Free),
            "locked" | "assigned" => Some(Self::Locked),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An exclusively-lockable accelerator slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Slot identifier (e.g. "gpu0")
    pub id: String,
    pub status: ResourceStatus,
    /// Case currently holding the lock; valid only while Locked
    pub holder_case_id: Option<String>,
    /// When the current lock was taken
    pub locked_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
}

impl Resource {
    pub fn free(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ResourceStatus::Free,
            holder_case_id: None,
            locked_at: None,
            first_seen_at: Utc::now(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == ResourceStatus::Free
    }

    /// How long the current lock has been held.
    pub fn lock_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.locked_at.map(|at| now - at)
    }
}
