//! Per-case workflow state machine.
//!
//! The pipeline is a fixed, code-defined step graph; each step's in-progress
//! status doubles as the resume point, so a restarted worker re-enters the
//! step its case was persisted in. Step handlers are idempotent under
//! re-entry: re-running a conversion overwrites its outputs, re-uploading
//! overwrites remote copies, and re-polling an already-satisfied marker
//! succeeds immediately.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::models::{
    Case, CaseStatus, Config, ErrorKind, FailureDisposition, StepOutcome, StepRecord, ToolConfig,
};
use crate::domain::ports::CaseRepository;
use crate::services::{
    LocalExecutor, RemoteExecutor, ResourcePool, StatusEventBus, StepRetryPolicy,
};

/// Remote filenames used to make the simulation step resumable.
const DONE_MARKER: &str = "done.marker";
const LAUNCH_MARKER: &str = "launched.marker";

/// The fixed pipeline step graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Preprocess,
    Upload,
    RemoteExecute,
    Download,
    Postprocess,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 5] = [
        Self::Preprocess,
        Self::Upload,
        Self::RemoteExecute,
        Self::Download,
        Self::Postprocess,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Upload => "upload",
            Self::RemoteExecute => "remote_execute",
            Self::Download => "download",
            Self::Postprocess => "postprocess",
        }
    }

    /// Status a case carries while this step runs.
    pub fn status(&self) -> CaseStatus {
        match self {
            Self::Preprocess => CaseStatus::Preprocessing,
            Self::Upload => CaseStatus::Uploading,
            Self::RemoteExecute => CaseStatus::RemoteExecuting,
            Self::Download => CaseStatus::Downloading,
            Self::Postprocess => CaseStatus::Postprocessing,
        }
    }

    /// Next step, or None after the final one.
    pub fn next(&self) -> Option<PipelineStep> {
        match self {
            Self::Preprocess => Some(Self::Upload),
            Self::Upload => Some(Self::RemoteExecute),
            Self::RemoteExecute => Some(Self::Download),
            Self::Download => Some(Self::Postprocess),
            Self::Postprocess => None,
        }
    }

    /// Step to (re-)enter for a case persisted in `status`.
    pub fn from_status(status: CaseStatus) -> Option<PipelineStep> {
        match status {
            CaseStatus::New | CaseStatus::Preprocessing => Some(Self::Preprocess),
            CaseStatus::Uploading => Some(Self::Upload),
            CaseStatus::RemoteExecuting => Some(Self::RemoteExecute),
            CaseStatus::Downloading => Some(Self::Download),
            CaseStatus::Postprocessing => Some(Self::Postprocess),
            CaseStatus::Completed | CaseStatus::Failed | CaseStatus::Stuck => None,
        }
    }

    pub fn from_name(name: &str) -> Option<PipelineStep> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

/// Terminal result of driving one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowResult {
    Completed,
    Failed,
    /// Progress timed out; the case awaits reconciliation
    Stuck,
}

/// Drives a single case through the pipeline to a terminal result.
pub struct CaseWorkflow {
    case_id: String,
    repo: Arc<dyn CaseRepository>,
    pool: Arc<ResourcePool>,
    local: LocalExecutor,
    remote: RemoteExecutor,
    retry: StepRetryPolicy,
    events: StatusEventBus,
    config: Config,
}

impl CaseWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        case_id: impl Into<String>,
        repo: Arc<dyn CaseRepository>,
        pool: Arc<ResourcePool>,
        local: LocalExecutor,
        remote: RemoteExecutor,
        retry: StepRetryPolicy,
        events: StatusEventBus,
        config: Config,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            repo,
            pool,
            local,
            remote,
            retry,
            events,
            config,
        }
    }

    /// Remote work directory for this case.
    fn remote_dir(&self) -> String {
        format!("{}/{}", self.config.remote.base_dir, self.case_id)
    }

    /// Run the case from its persisted status to a terminal result.
    pub async fn run(&self) -> Result<WorkflowResult> {
        let case = self
            .repo
            .get(&self.case_id)
            .await
            .context("Failed to load case")?
            .with_context(|| format!("Case {} not found", self.case_id))?;

        let Some(first_step) = PipelineStep::from_status(case.status) else {
            // Terminal or stuck cases have nothing to drive.
            return Ok(match case.status {
                CaseStatus::Completed => WorkflowResult::Completed,
                CaseStatus::Stuck => WorkflowResult::Stuck,
                _ => WorkflowResult::Failed,
            });
        };

        info!(
            case_id = self.case_id,
            status = %case.status,
            step = first_step.name(),
            "Starting workflow"
        );

        let mut current_status = case.status;
        let mut step = first_step;

        loop {
            // Claim the step. The CAS keyed on the previous status is what
            // keeps two workers off the same case: the loser sees a conflict
            // and backs out.
            if current_status != step.status() {
                self.repo
                    .compare_and_set_status(&self.case_id, current_status, step.status())
                    .await
                    .context("Lost the case to a concurrent worker")?;
                current_status = step.status();
            }
            self.events.emit_status(
                self.case_id.as_str(),
                current_status,
                format!("{} started", step.name()),
            );

            match self.run_step_with_retry(step, &case).await? {
                StepResult::Advanced => match step.next() {
                    Some(next) => {
                        self.repo
                            .compare_and_set_status(&self.case_id, current_status, next.status())
                            .await
                            .context("Lost the case to a concurrent worker")?;
                        current_status = next.status();
                        step = next;
                    }
                    None => {
                        self.repo
                            .compare_and_set_status(
                                &self.case_id,
                                current_status,
                                CaseStatus::Completed,
                            )
                            .await
                            .context("Failed to complete case")?;
                        self.pool.release(&self.case_id).await?;
                        self.events.emit_status(
                            self.case_id.as_str(),
                            CaseStatus::Completed,
                            "pipeline completed",
                        );
                        info!(case_id = self.case_id, "Case completed");
                        return Ok(WorkflowResult::Completed);
                    }
                },
                StepResult::Failed(kind, message) => {
                    self.repo
                        .compare_and_set_status(&self.case_id, current_status, CaseStatus::Failed)
                        .await
                        .context("Failed to mark case failed")?;
                    self.pool.release(&self.case_id).await?;
                    self.events.emit_status(
                        self.case_id.as_str(),
                        CaseStatus::Failed,
                        format!("{} failed: {kind}: {message}", step.name()),
                    );
                    warn!(case_id = self.case_id, step = step.name(), %kind, "Case failed");
                    return Ok(WorkflowResult::Failed);
                }
                StepResult::Stuck(message) => {
                    self.repo
                        .compare_and_set_status(&self.case_id, current_status, CaseStatus::Stuck)
                        .await
                        .context("Failed to mark case stuck")?;
                    // The resource stays held: the remote job may still be
                    // running. Zombie reclamation frees the slot later.
                    self.events.emit_status(
                        self.case_id.as_str(),
                        CaseStatus::Stuck,
                        format!("{} stalled: {message}", step.name()),
                    );
                    warn!(case_id = self.case_id, step = step.name(), "Case marked stuck");
                    return Ok(WorkflowResult::Stuck);
                }
            }
        }
    }

    /// Execute one step, retrying transient failures within the budget.
    async fn run_step_with_retry(&self, step: PipelineStep, case: &Case) -> Result<StepResult> {
        let mut schedule = self.retry.schedule();

        loop {
            let started_at = Utc::now();
            let outcome = self.execute_step(step, case).await;
            let record = StepRecord {
                step: step.name().to_string(),
                started_at,
                finished_at: Some(Utc::now()),
                outcome: outcome.clone(),
            };
            self.repo
                .append_step_record(&self.case_id, &record)
                .await
                .context("Failed to record step outcome")?;

            if outcome.success {
                self.repo.reset_retry(&self.case_id).await?;
                return Ok(StepResult::Advanced);
            }

            let kind = outcome.error_kind.unwrap_or(ErrorKind::TransientIo);
            let message = outcome.summary();
            self.repo
                .record_error(&self.case_id, kind, &message)
                .await
                .context("Failed to record step error")?;

            match kind.disposition() {
                FailureDisposition::FailPermanently => {
                    return Ok(StepResult::Failed(kind, message));
                }
                FailureDisposition::MarkStuck => {
                    return Ok(StepResult::Stuck(message));
                }
                FailureDisposition::RetryWithinBudget | FailureDisposition::LeavePending => {
                    let attempts = self.repo.increment_retry(&self.case_id).await?;
                    if !self.retry.should_retry(attempts) {
                        warn!(
                            case_id = self.case_id,
                            step = step.name(),
                            attempts,
                            "Retry budget exhausted"
                        );
                        return Ok(StepResult::Failed(kind, message));
                    }
                    let delay = self.retry.next_delay(&mut schedule);
                    info!(
                        case_id = self.case_id,
                        step = step.name(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying step after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Execute one step attempt. All failure paths come back as classified
    /// outcomes, never as `Err`.
    async fn execute_step(&self, step: PipelineStep, case: &Case) -> StepOutcome {
        match step {
            PipelineStep::Preprocess => self.run_tool(&self.config.tools.preprocessor, case).await,
            PipelineStep::Upload => self.upload(case).await,
            PipelineStep::RemoteExecute => self.remote_execute().await,
            PipelineStep::Download => self.download(case).await,
            PipelineStep::Postprocess => self.run_tool(&self.config.tools.converter, case).await,
        }
    }

    async fn run_tool(&self, tool: &ToolConfig, case: &Case) -> StepOutcome {
        let args: Vec<String> = tool
            .args
            .iter()
            .map(|a| a.replace("{case_dir}", &case.source_path))
            .collect();
        self.local
            .run(&tool.command, &args, Some(Path::new(&case.source_path)))
            .await
    }

    async fn upload(&self, case: &Case) -> StepOutcome {
        let files = match collect_case_files(Path::new(&case.source_path)) {
            Ok(files) if !files.is_empty() => files,
            Ok(_) => {
                return StepOutcome::failure(
                    ErrorKind::ExternalTool,
                    format!("no files to upload in {}", case.source_path),
                )
            }
            Err(e) => {
                return StepOutcome::failure(
                    ErrorKind::TransientIo,
                    format!("cannot read case dir {}: {e}", case.source_path),
                )
            }
        };

        let session = match self.remote.connect().await {
            Ok(session) => session,
            Err(e) => return e.into_outcome(),
        };

        let remote_dir = self.remote_dir();
        let prepared = session.prepare_dir(&remote_dir).await;
        if !prepared.success {
            return prepared;
        }
        session.upload(&files, &remote_dir).await
    }

    async fn remote_execute(&self) -> StepOutcome {
        let session = match self.remote.connect().await {
            Ok(session) => session,
            Err(e) => return e.into_outcome(),
        };

        let remote_dir = self.remote_dir();
        let done = format!("{remote_dir}/{DONE_MARKER}");
        let launched = format!("{remote_dir}/{LAUNCH_MARKER}");

        // A finished job from a previous run satisfies the step outright.
        if session.marker_exists(&done).await.success {
            return StepOutcome::success("completion marker already present", "");
        }

        // A previous run may have launched the job and then died; in that
        // case only the wait is resumed, the job is not launched twice.
        if !session.marker_exists(&launched).await.success {
            let launch = session
                .launch_background(
                    &remote_dir,
                    &format!(
                        "touch {} && {}",
                        LAUNCH_MARKER, self.config.tools.simulation_command
                    ),
                    &done,
                )
                .await;
            if !launch.success {
                return launch;
            }
        }

        session
            .poll_until_marker(
                &done,
                Duration::from_secs(self.config.remote.poll_interval_seconds),
                Duration::from_secs(self.config.remote.poll_timeout_seconds),
            )
            .await
    }

    async fn download(&self, case: &Case) -> StepOutcome {
        let session = match self.remote.connect().await {
            Ok(session) => session,
            Err(e) => return e.into_outcome(),
        };

        let remote_dir = self.remote_dir();
        let remote_files: Vec<String> = self
            .config
            .tools
            .result_patterns
            .iter()
            .map(|pattern| format!("{remote_dir}/{pattern}"))
            .collect();

        session
            .download(&remote_files, Path::new(&case.source_path))
            .await
    }
}

enum StepResult {
    Advanced,
    Failed(ErrorKind, String),
    Stuck(String),
}

/// Regular files in the case directory, sorted for deterministic transfer
/// order.
fn collect_case_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}
