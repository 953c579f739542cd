//! Application layer: workflow driver and orchestrator loop.

pub mod orchestrator;
pub mod workflow;

pub use orchestrator::{CaseDetected, Orchestrator, OrchestratorState, OrchestratorStats};
pub use workflow::{CaseWorkflow, PipelineStep, WorkflowResult};
