//! Orchestrator: the top-level control loop.
//!
//! Each cycle reconciles stale state (stuck cases, zombie locks), pulls the
//! next scheduled batch, acquires accelerator slots, and runs case workflows
//! inside a semaphore-bounded worker pool. Workers own their case end-to-end
//! and their own store handle; the orchestrator only learns about them again
//! through completion events or, after a crash, persisted staleness.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::sqlite::SqliteCaseRepository;
use crate::application::workflow::{CaseWorkflow, PipelineStep, WorkflowResult};
use crate::domain::errors::DomainError;
use crate::domain::models::{Case, CasePriority, CaseStatus, Config};
use crate::domain::ports::{CaseRepository, CommandRunner};
use crate::services::{
    AcquireResult, LocalExecutor, PriorityScheduler, RemoteExecutor, ResourcePool, StatusEventBus,
    StepRetryPolicy,
};

/// New-case event from the detection collaborator.
#[derive(Debug, Clone)]
pub struct CaseDetected {
    pub case_id: String,
    pub source_path: String,
    pub priority: Option<CasePriority>,
}

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Running,
    Stopping,
}

/// Counters exposed for status display.
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    pub state: OrchestratorState,
    pub max_workers: usize,
    pub active_workers: usize,
    pub cases_completed: u64,
    pub cases_failed: u64,
    pub cases_stuck: u64,
}

/// Worker completion event.
#[derive(Debug)]
enum WorkerEvent {
    Finished {
        case_id: String,
        result: WorkflowResult,
    },
    Crashed {
        case_id: String,
        error: String,
    },
}

pub struct Orchestrator {
    config: Config,
    db: SqlitePool,
    repo: Arc<dyn CaseRepository>,
    resource_pool: Arc<ResourcePool>,
    scheduler: PriorityScheduler,
    events: StatusEventBus,
    runner: Arc<dyn CommandRunner>,

    state: Arc<RwLock<OrchestratorState>>,
    worker_semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashSet<String>>>,

    cases_completed: Arc<RwLock<u64>>,
    cases_failed: Arc<RwLock<u64>>,
    cases_stuck: Arc<RwLock<u64>>,

    worker_tx: mpsc::Sender<WorkerEvent>,
    worker_rx: Arc<RwLock<Option<mpsc::Receiver<WorkerEvent>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        db: SqlitePool,
        repo: Arc<dyn CaseRepository>,
        resource_pool: Arc<ResourcePool>,
        events: StatusEventBus,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let scheduler = PriorityScheduler::new(Arc::clone(&repo), config.scheduler.clone());
        let (worker_tx, worker_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            worker_semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            db,
            repo,
            resource_pool,
            scheduler,
            events,
            runner,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            active: Arc::new(RwLock::new(HashSet::new())),
            cases_completed: Arc::new(RwLock::new(0)),
            cases_failed: Arc::new(RwLock::new(0)),
            cases_stuck: Arc::new(RwLock::new(0)),
            worker_tx,
            worker_rx: Arc::new(RwLock::new(Some(worker_rx))),
            shutdown_tx,
        }
    }

    /// Handle for requesting a graceful shutdown from another task.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn get_stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            state: *self.state.read().await,
            max_workers: self.config.max_workers,
            active_workers: self.active.read().await.len(),
            cases_completed: *self.cases_completed.read().await,
            cases_failed: *self.cases_failed.read().await,
            cases_stuck: *self.cases_stuck.read().await,
        }
    }

    /// Main loop: ticks, worker events, intake events, shutdown.
    pub async fn run(&self, mut intake_rx: mpsc::Receiver<CaseDetected>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                return Ok(());
            }
            *state = OrchestratorState::Running;
        }

        info!(
            max_workers = self.config.max_workers,
            scan_interval = self.config.scan_interval_seconds,
            "Orchestrator started"
        );

        let mut worker_rx = self
            .worker_rx
            .write()
            .await
            .take()
            .context("Orchestrator already ran")?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = interval(Duration::from_secs(self.config.scan_interval_seconds.max(1)));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = ?e, "Orchestrator cycle failed");
                    }
                }

                Some(event) = worker_rx.recv() => {
                    self.handle_worker_event(event).await;
                }

                Some(detected) = intake_rx.recv() => {
                    self.register_case(detected).await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Orchestrator received shutdown signal");
                    break;
                }
            }
        }

        *self.state.write().await = OrchestratorState::Stopping;
        self.drain_workers(Duration::from_secs(30)).await;
        *self.state.write().await = OrchestratorState::Stopped;
        info!("Orchestrator stopped");
        Ok(())
    }

    /// One full cycle: refresh resources, reconcile, dispatch.
    pub async fn run_cycle(&self) -> Result<()> {
        self.resource_pool
            .refresh(&self.config.resources.slots)
            .await?;
        self.reconcile().await?;
        self.dispatch().await?;
        Ok(())
    }

    /// Register a detected case as New. Duplicates are logged and ignored.
    pub async fn register_case(&self, detected: CaseDetected) {
        let mut case = Case::new(detected.case_id.clone(), detected.source_path.clone());
        if let Some(priority) = detected.priority {
            case = case.with_priority(priority);
        }

        match self.repo.insert(&case).await {
            Ok(()) => {
                info!(case_id = detected.case_id, "Registered new case");
                self.events
                    .emit_status(detected.case_id.as_str(), CaseStatus::New, "case registered");
            }
            Err(DomainError::DuplicateCase(_)) => {
                debug!(case_id = detected.case_id, "Case already known; ignoring");
            }
            Err(e) => {
                error!(case_id = detected.case_id, error = %e, "Failed to register case");
            }
        }
    }

    /// Reconciliation pass: stall detection, stuck requeue, zombie reclaim.
    async fn reconcile(&self) -> Result<()> {
        let stuck_after = Duration::from_secs(self.config.reconcile.stuck_case_timeout_seconds);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stuck_after).context("Invalid stuck timeout")?;

        // Mark stalled actives as stuck. Live workers are exempt: their cases
        // progress through step records, and killing them from here would
        // race their own CAS updates.
        let stalled = self.repo.list_stalled(cutoff).await?;
        for case in stalled {
            if self.active.read().await.contains(&case.id) {
                continue;
            }
            match self
                .repo
                .compare_and_set_status(&case.id, case.status, CaseStatus::Stuck)
                .await
            {
                Ok(()) => {
                    warn!(case_id = case.id, was = %case.status, "Marked stalled case stuck");
                    self.repo
                        .record_error(
                            &case.id,
                            crate::domain::models::ErrorKind::Timeout,
                            &format!(
                                "no progress within {}s while {}",
                                self.config.reconcile.stuck_case_timeout_seconds, case.status
                            ),
                        )
                        .await
                        .ok();
                    self.events
                        .emit_status(case.id.as_str(), CaseStatus::Stuck, "stalled; marked stuck");
                }
                Err(DomainError::StatusConflict { .. }) => {
                    // The case moved on between the scan and the CAS.
                }
                Err(e) => return Err(e).context("Failed to mark case stuck"),
            }
        }

        // Requeue stuck cases at their last started step.
        let stuck_cases = self.repo.list_by_status(CaseStatus::Stuck).await?;
        for case in stuck_cases {
            let resume_status = match self.repo.last_started_step(&case.id).await? {
                Some(name) => PipelineStep::from_name(&name)
                    .map_or(CaseStatus::New, |step| step.status()),
                None => CaseStatus::New,
            };
            match self
                .repo
                .compare_and_set_status(&case.id, CaseStatus::Stuck, resume_status)
                .await
            {
                Ok(()) => {
                    info!(case_id = case.id, resume = %resume_status, "Requeued stuck case");
                    self.events
                        .emit_status(case.id.as_str(), resume_status, "requeued after stall");
                }
                Err(DomainError::StatusConflict { .. }) => {}
                Err(e) => return Err(e).context("Failed to requeue stuck case"),
            }
        }

        // Free orphaned locks.
        let zombie_after = Duration::from_secs(self.config.reconcile.zombie_lock_timeout_seconds);
        let reclaimed = self.resource_pool.reclaim_zombies(zombie_after).await?;
        for resource in reclaimed {
            if let Some(holder) = resource.holder_case_id {
                if let Ok(Some(case)) = self.repo.get(&holder).await {
                    self.events.emit_status(
                        holder,
                        case.status,
                        format!("resource {} reclaimed", resource.id),
                    );
                }
            }
        }

        Ok(())
    }

    /// Dispatch pass: schedule into free worker slots, acquire resources,
    /// spawn workers.
    async fn dispatch(&self) -> Result<()> {
        let free_slots = self.worker_semaphore.available_permits();
        if free_slots == 0 {
            return Ok(());
        }

        let batch = self.scheduler.next_batch(free_slots).await?;
        for case in batch {
            if self.active.read().await.contains(&case.id) {
                continue;
            }

            // A requeued case may still hold the slot its remote job runs
            // on; only acquire for cases with no assignment.
            if case.assigned_resource.is_none() {
                match self.resource_pool.acquire_any(&case.id).await? {
                    AcquireResult::Acquired(_) => {}
                    AcquireResult::Exhausted => {
                        debug!(case_id = case.id, "No free resource; case stays pending");
                        continue;
                    }
                }
            }

            self.spawn_worker(case).await?;
        }

        Ok(())
    }

    async fn spawn_worker(&self, case: Case) -> Result<()> {
        let permit = Arc::clone(&self.worker_semaphore)
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let worker_id = Uuid::new_v4();
        self.active.write().await.insert(case.id.clone());
        info!(case_id = case.id, %worker_id, "Spawning case worker");

        // Each worker gets its own repository handle over the pool.
        let worker_repo: Arc<dyn CaseRepository> =
            Arc::new(SqliteCaseRepository::new(self.db.clone()));
        let workflow = CaseWorkflow::new(
            case.id.clone(),
            worker_repo,
            Arc::clone(&self.resource_pool),
            LocalExecutor::new(Arc::clone(&self.runner)),
            RemoteExecutor::new(self.config.remote.clone(), Arc::clone(&self.runner)),
            StepRetryPolicy::new(&self.config.retry),
            self.events.clone(),
            self.config.clone(),
        );

        let worker_tx = self.worker_tx.clone();
        let case_id = case.id;
        tokio::spawn(async move {
            let event = match workflow.run().await {
                Ok(result) => WorkerEvent::Finished { case_id, result },
                Err(e) => WorkerEvent::Crashed {
                    case_id,
                    error: format!("{e:#}"),
                },
            };
            debug!(%worker_id, "Worker task finished");
            // Receiver may be gone during shutdown.
            let _ = worker_tx.send(event).await;
            drop(permit);
        });

        Ok(())
    }

    async fn handle_worker_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Finished { case_id, result } => {
                self.active.write().await.remove(&case_id);
                match result {
                    WorkflowResult::Completed => *self.cases_completed.write().await += 1,
                    WorkflowResult::Failed => *self.cases_failed.write().await += 1,
                    WorkflowResult::Stuck => *self.cases_stuck.write().await += 1,
                }
                debug!(case_id, ?result, "Worker finished");
            }
            WorkerEvent::Crashed { case_id, error } => {
                self.active.write().await.remove(&case_id);
                // The case keeps whatever status it had; staleness-driven
                // reconciliation picks it up next.
                warn!(case_id, error, "Worker aborted; case left for reconciliation");
            }
        }
    }

    /// Wait for in-flight workers, bounded by `timeout`.
    async fn drain_workers(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.active.read().await.len();
            if active == 0 {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = active, "Shutdown timeout; workers still running");
                return;
            }
            debug!(active, "Waiting for workers to finish");
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Drain any pending worker completion events without blocking.
    ///
    /// Used by callers that drive `run_cycle` directly instead of `run`.
    pub async fn collect_worker_events(&self) {
        loop {
            let event = {
                let mut guard = self.worker_rx.write().await;
                match guard.as_mut().map(mpsc::Receiver::try_recv) {
                    Some(Ok(event)) => event,
                    _ => return,
                }
            };
            self.handle_worker_event(event).await;
        }
    }
}
