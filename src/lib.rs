//! Caseflow - Case Pipeline Orchestrator
//!
//! Caseflow drives independent simulation cases through a fixed pipeline that
//! alternates local conversion steps with a remote GPU simulation, locking
//! accelerator slots exclusively and persisting every transition so a crashed
//! run resumes where it stopped.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, ports, and errors
//! - **Adapters** (`adapters`): SQLite implementations of the repository ports
//! - **Service Layer** (`services`): Scheduling, resource locking, step execution
//! - **Application Layer** (`application`): Workflow state machine and orchestrator
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{CaseDetected, CaseWorkflow, Orchestrator, PipelineStep, WorkflowResult};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Case, CasePriority, CaseStatus, Config, ErrorKind, Resource, ResourceStatus, StepOutcome,
    StepRecord,
};
pub use domain::ports::{CaseRepository, CommandRunner, ResourceRepository, SystemCommandRunner};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AcquireResult, LocalExecutor, PriorityScheduler, RemoteExecutor, ResourcePool, StatusEvent,
    StatusEventBus, StepRetryPolicy,
};
