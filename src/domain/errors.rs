//! Domain errors for the caseflow system.

use thiserror::Error;

/// Domain-level errors that can occur in the caseflow system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Case not found: {0}")]
    CaseNotFound(String),

    #[error("Case already exists: {0}")]
    DuplicateCase(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("No free resource available")]
    ResourceExhausted,

    #[error("Status conflict on case {id}: expected {expected}, store disagreed")]
    StatusConflict { id: String, expected: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DomainError::DuplicateCase(db.message().to_string())
            }
            _ => DomainError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
