//! Orchestrator end-to-end scenarios: bounded concurrency over limited
//! slots, stall reconciliation, stuck-case requeue, and zombie reclamation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use caseflow::adapters::sqlite::{SqliteCaseRepository, SqliteResourceRepository};
use caseflow::application::{CaseDetected, Orchestrator};
use caseflow::domain::models::{
    Case, CasePriority, CaseStatus, Config, ErrorKind, ResourceStatus, StepOutcome, StepRecord,
};
use caseflow::domain::ports::{CaseRepository, CommandRunner, ResourceRepository};
use caseflow::services::{ResourcePool, StatusEventBus};
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use common::{make_case_dir, setup_test_db, SimulatedRunner};

struct Fixture {
    dir: TempDir,
    db: SqlitePool,
    repo: Arc<SqliteCaseRepository>,
    orchestrator: Orchestrator,
    runner: Arc<SimulatedRunner>,
    events: StatusEventBus,
}

fn test_config(max_workers: usize, slots: &[&str]) -> Config {
    let mut config = Config::default();
    config.max_workers = max_workers;
    config.scan_interval_seconds = 1;
    config.retry.budget_per_step = 2;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.remote.poll_interval_seconds = 0;
    config.remote.poll_timeout_seconds = 0;
    config.reconcile.stuck_case_timeout_seconds = 3600;
    config.reconcile.zombie_lock_timeout_seconds = 3600;
    config.resources.slots = slots.iter().map(ToString::to_string).collect();
    config
}

async fn fixture(config: Config) -> Fixture {
    let (dir, db) = setup_test_db().await;
    let repo = Arc::new(SqliteCaseRepository::new(db.clone()));
    let resources = Arc::new(SqliteResourceRepository::new(db.clone()));
    let pool = Arc::new(ResourcePool::new(
        resources,
        Arc::clone(&repo) as Arc<dyn CaseRepository>,
    ));
    let runner = SimulatedRunner::new();
    let events = StatusEventBus::default();

    let orchestrator = Orchestrator::new(
        config,
        db.clone(),
        Arc::clone(&repo) as Arc<dyn CaseRepository>,
        pool,
        events.clone(),
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
    );

    Fixture {
        dir,
        db,
        repo,
        orchestrator,
        runner,
        events,
    }
}

impl Fixture {
    async fn register(&self, id: &str, priority: CasePriority) {
        let case_dir = make_case_dir(self.dir.path(), id);
        self.orchestrator
            .register_case(CaseDetected {
                case_id: id.to_string(),
                source_path: case_dir.display().to_string(),
                priority: Some(priority),
            })
            .await;
    }

    /// Drive cycles until every case is terminal or the deadline passes.
    async fn drive_to_completion(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.orchestrator.run_cycle().await.expect("cycle failed");
            self.orchestrator.collect_worker_events().await;

            let cases = self.repo.list_all().await.unwrap();
            if !cases.is_empty() && cases.iter().all(Case::is_terminal) {
                // Give the last workers time to report, then drain their
                // completion events so stats settle.
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.orchestrator.collect_worker_events().await;
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cases did not reach a terminal status in time: {:?}",
                cases
                    .iter()
                    .map(|c| (c.id.clone(), c.status))
                    .collect::<Vec<_>>()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test]
async fn test_five_cases_two_slots_all_reach_terminal() {
    let fx = fixture(test_config(2, &["gpu0", "gpu1"])).await;
    let mut event_rx = fx.events.subscribe();

    for i in 0..5 {
        fx.register(&format!("case-{i}"), CasePriority::Normal).await;
    }

    fx.drive_to_completion(Duration::from_secs(30)).await;

    let cases = fx.repo.list_all().await.unwrap();
    assert_eq!(cases.len(), 5);
    assert!(cases.iter().all(|c| c.status == CaseStatus::Completed));

    // Both slots end up free, and no slot was ever double-granted: each
    // acquisition is visible as a distinct (case, slot) assignment event.
    let resources = SqliteResourceRepository::new(fx.db.clone());
    let all = resources.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.status == ResourceStatus::Free));

    let stats = fx.orchestrator.get_stats().await;
    assert_eq!(stats.cases_completed, 5);
    assert_eq!(stats.cases_failed, 0);
    assert_eq!(stats.active_workers, 0);

    // The display collaborator saw ordered status events for each case.
    let mut seen_completed = 0;
    while let Ok(event) = event_rx.try_recv() {
        if event.status == CaseStatus::Completed {
            seen_completed += 1;
        }
    }
    assert_eq!(seen_completed, 5);
}

#[tokio::test]
async fn test_worker_pool_bounded_by_max_workers() {
    // One worker slot, plenty of resources: cases must be processed at most
    // one at a time, but all of them eventually.
    let fx = fixture(test_config(1, &["gpu0", "gpu1", "gpu2"])).await;

    for i in 0..3 {
        fx.register(&format!("case-{i}"), CasePriority::Normal).await;
    }

    fx.drive_to_completion(Duration::from_secs(30)).await;

    let stats = fx.orchestrator.get_stats().await;
    assert_eq!(stats.cases_completed, 3);
    assert_eq!(stats.max_workers, 1);
}

#[tokio::test]
async fn test_resource_exhaustion_leaves_cases_pending() {
    // Two cases, one slot, one worker: the second case stays New (pending)
    // while the first holds the slot, then proceeds after release.
    let fx = fixture(test_config(2, &["gpu0"])).await;

    fx.register("case-0", CasePriority::Normal).await;
    fx.register("case-1", CasePriority::Normal).await;

    fx.drive_to_completion(Duration::from_secs(30)).await;

    let cases = fx.repo.list_all().await.unwrap();
    assert!(cases.iter().all(|c| c.status == CaseStatus::Completed));
}

#[tokio::test]
async fn test_duplicate_detection_events_are_ignored() {
    let fx = fixture(test_config(1, &["gpu0"])).await;

    fx.register("case-0", CasePriority::Normal).await;
    fx.register("case-0", CasePriority::Normal).await;

    let cases = fx.repo.list_all().await.unwrap();
    assert_eq!(cases.len(), 1);
}

#[tokio::test]
async fn test_stalled_case_is_marked_stuck_and_requeued_at_last_step() {
    let mut config = test_config(1, &["gpu0"]);
    // Stall threshold of one hour; the case below stalled three hours ago.
    config.reconcile.stuck_case_timeout_seconds = 3600;
    let fx = fixture(config).await;

    // A case that a crashed worker left mid-simulation, holding the slot,
    // with its remote job already finished by now.
    let case_dir = make_case_dir(fx.dir.path(), "case-stalled");
    let mut case = Case::new("case-stalled", case_dir.display().to_string());
    case.status = CaseStatus::RemoteExecuting;
    case.updated_at = Utc::now() - chrono::Duration::hours(3);
    fx.repo.insert(&case).await.unwrap();
    fx.repo
        .append_step_record(
            "case-stalled",
            &StepRecord::new(
                "remote_execute",
                Utc::now() - chrono::Duration::hours(3),
                StepOutcome::failure(ErrorKind::Timeout, "marker absent"),
            ),
        )
        .await
        .unwrap();
    // append_step_record bumps updated_at; age it again.
    let old = (Utc::now() - chrono::Duration::hours(3)).to_rfc3339();
    sqlx::query("UPDATE cases SET updated_at = ? WHERE id = 'case-stalled'")
        .bind(&old)
        .execute(&fx.db)
        .await
        .unwrap();

    // Pretend the remote job finished while nobody was looking.
    fx.runner
        .run("ssh", &["nohup prior-launch".to_string()], None)
        .await
        .unwrap();

    fx.drive_to_completion(Duration::from_secs(30)).await;

    let case = fx.repo.get("case-stalled").await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Completed);

    // The requeued case resumed at remote_execute: it never re-ran the
    // earlier local or upload steps.
    assert_eq!(fx.runner.call_count_for("case-interpreter"), 0);
    let history = fx.repo.step_history("case-stalled").await.unwrap();
    let steps: Vec<&str> = history.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(
        steps,
        vec!["remote_execute", "remote_execute", "download", "postprocess"]
    );
}

#[tokio::test]
async fn test_requeued_stuck_case_is_not_dispatched_without_resume_point() {
    // A stuck case with no step history resumes from the beginning.
    let fx = fixture(test_config(1, &["gpu0"])).await;

    let case_dir = make_case_dir(fx.dir.path(), "case-stuck");
    let mut case = Case::new("case-stuck", case_dir.display().to_string());
    case.status = CaseStatus::Stuck;
    fx.repo.insert(&case).await.unwrap();

    fx.drive_to_completion(Duration::from_secs(30)).await;

    let case = fx.repo.get("case-stuck").await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Completed);
    // Resumed from New, so the whole pipeline ran.
    assert!(fx.runner.call_count_for("case-interpreter") >= 1);
}

#[tokio::test]
async fn test_zombie_lock_released_by_reconciliation() {
    let fx = fixture(test_config(1, &["gpu0", "gpu1"])).await;

    // A failed case whose worker died before releasing its slot.
    let resources = SqliteResourceRepository::new(fx.db.clone());
    let case_dir = make_case_dir(fx.dir.path(), "case-dead");
    let mut dead = Case::new("case-dead", case_dir.display().to_string());
    dead.status = CaseStatus::Failed;
    fx.repo.insert(&dead).await.unwrap();

    resources.upsert("gpu0").await.unwrap();
    resources.acquire_any("case-dead").await.unwrap();
    let old = (Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
    sqlx::query("UPDATE resources SET locked_at = ? WHERE holder_case_id = 'case-dead'")
        .bind(&old)
        .execute(&fx.db)
        .await
        .unwrap();

    fx.orchestrator.run_cycle().await.unwrap();

    let all = resources.list_all().await.unwrap();
    assert!(
        all.iter().all(|r| r.status == ResourceStatus::Free),
        "zombie lock must be reclaimed"
    );
}
