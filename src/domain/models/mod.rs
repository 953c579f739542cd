//! Domain models.

pub mod case;
pub mod config;
pub mod outcome;
pub mod resource;

pub use case::{Case, CasePriority, CaseStatus, StepRecord};
pub use config::{
    Config, DatabaseConfig, LoggingConfig, PriorityWeights, ReconcileConfig, RemoteConfig,
    ResourcesConfig, RetryConfig, SchedulerConfig, ToolConfig, ToolsConfig,
};
pub use outcome::{ErrorKind, FailureDisposition, StepOutcome};
pub use resource::{Resource, ResourceStatus};
