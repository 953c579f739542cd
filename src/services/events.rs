//! Status event stream.
//!
//! Workers and the orchestrator publish `(case_id, status, message, timestamp)`
//! tuples onto a broadcast channel; the display collaborator subscribes on the
//! other end. Lagging subscribers drop old events rather than blocking
//! publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::models::CaseStatus;

/// One status update for a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub case_id: String,
    pub status: CaseStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(case_id: impl Into<String>, status: CaseStatus, message: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast fan-out for status events.
#[derive(Clone)]
pub struct StatusEventBus {
    sender: broadcast::Sender<StatusEvent>,
}

impl StatusEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Fine to call with no subscribers.
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn emit_status(
        &self,
        case_id: impl Into<String>,
        status: CaseStatus,
        message: impl Into<String>,
    ) {
        self.emit(StatusEvent::new(case_id, status, message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
