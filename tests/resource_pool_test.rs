//! Integration tests for the resource pool: discovery, atomic locking,
//! release idempotency, and zombie reclamation.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use caseflow::adapters::sqlite::{SqliteCaseRepository, SqliteResourceRepository};
use caseflow::domain::models::{Case, CaseStatus, ResourceStatus};
use caseflow::domain::ports::CaseRepository;
use caseflow::services::{AcquireResult, ResourcePool};
use chrono::Utc;
use sqlx::SqlitePool;

use common::setup_test_db;

fn make_pool(db: &SqlitePool) -> (ResourcePool, Arc<SqliteCaseRepository>) {
    let cases = Arc::new(SqliteCaseRepository::new(db.clone()));
    let resources = Arc::new(SqliteResourceRepository::new(db.clone()));
    (
        ResourcePool::new(resources, Arc::clone(&cases) as Arc<dyn CaseRepository>),
        cases,
    )
}

async fn add_case(repo: &SqliteCaseRepository, id: &str, status: CaseStatus) {
    let mut case = Case::new(id, format!("/data/{id}"));
    case.status = status;
    repo.insert(&case).await.unwrap();
}

#[tokio::test]
async fn test_refresh_registers_new_slots_and_preserves_locks() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string(), "gpu1".to_string()])
        .await
        .unwrap();
    assert_eq!(pool.free_count().await.unwrap(), 2);

    add_case(&cases, "case-1", CaseStatus::New).await;
    let result = pool.acquire_any("case-1").await.unwrap();
    assert!(matches!(result, AcquireResult::Acquired(_)));

    // Re-discovery must not unlock anything.
    pool.refresh(&["gpu0".to_string(), "gpu1".to_string(), "gpu2".to_string()])
        .await
        .unwrap();
    assert_eq!(pool.free_count().await.unwrap(), 2);
    let all = pool.list().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(
        all.iter().filter(|r| r.status == ResourceStatus::Locked).count(),
        1
    );
}

#[tokio::test]
async fn test_acquire_records_assignment_on_case() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string()]).await.unwrap();
    add_case(&cases, "case-1", CaseStatus::New).await;

    let AcquireResult::Acquired(slot) = pool.acquire_any("case-1").await.unwrap() else {
        panic!("expected acquisition");
    };
    assert_eq!(slot, "gpu0");

    let case = cases.get("case-1").await.unwrap().unwrap();
    assert_eq!(case.assigned_resource.as_deref(), Some("gpu0"));
}

#[tokio::test]
async fn test_exhausted_when_all_locked() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string()]).await.unwrap();
    add_case(&cases, "case-1", CaseStatus::New).await;
    add_case(&cases, "case-2", CaseStatus::New).await;

    assert!(matches!(
        pool.acquire_any("case-1").await.unwrap(),
        AcquireResult::Acquired(_)
    ));
    assert_eq!(
        pool.acquire_any("case-2").await.unwrap(),
        AcquireResult::Exhausted
    );
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string()]).await.unwrap();
    add_case(&cases, "case-1", CaseStatus::New).await;

    pool.acquire_any("case-1").await.unwrap();
    pool.release("case-1").await.unwrap();
    // Releasing again must be a harmless no-op.
    pool.release("case-1").await.unwrap();

    assert_eq!(pool.free_count().await.unwrap(), 1);
    let case = cases.get("case-1").await.unwrap().unwrap();
    assert!(case.assigned_resource.is_none());
}

#[tokio::test]
async fn test_two_concurrent_acquirers_one_slot() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string()]).await.unwrap();
    add_case(&cases, "case-1", CaseStatus::New).await;
    add_case(&cases, "case-2", CaseStatus::New).await;

    let pool = Arc::new(pool);
    let a = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire_any("case-1").await.unwrap() })
    };
    let b = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.acquire_any("case-2").await.unwrap() })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let acquired = results
        .iter()
        .filter(|r| matches!(r, AcquireResult::Acquired(_)))
        .count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, AcquireResult::Exhausted))
        .count();

    assert_eq!(acquired, 1, "exactly one acquirer wins the single slot");
    assert_eq!(exhausted, 1, "the loser sees resource exhaustion");
}

#[tokio::test]
async fn test_concurrent_acquirers_never_share_a_slot() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    let slots: Vec<String> = (0..3).map(|i| format!("gpu{i}")).collect();
    pool.refresh(&slots).await.unwrap();
    for i in 0..10 {
        add_case(&cases, &format!("case-{i}"), CaseStatus::New).await;
    }

    let pool = Arc::new(pool);
    let mut handles = Vec::new();
    for i in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            pool.acquire_any(&format!("case-{i}")).await.unwrap()
        }));
    }

    let mut granted = Vec::new();
    for handle in handles {
        if let AcquireResult::Acquired(slot) = handle.await.unwrap() {
            granted.push(slot);
        }
    }

    assert_eq!(granted.len(), 3, "at most one holder per slot");
    let distinct: HashSet<_> = granted.iter().collect();
    assert_eq!(distinct.len(), granted.len(), "no slot granted twice");
}

#[tokio::test]
async fn test_zombie_reclamation_frees_orphaned_locks() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string(), "gpu1".to_string()])
        .await
        .unwrap();
    add_case(&cases, "dead-case", CaseStatus::New).await;
    add_case(&cases, "live-case", CaseStatus::New).await;

    pool.acquire_any("dead-case").await.unwrap();
    pool.acquire_any("live-case").await.unwrap();

    // dead-case crashed after failing; live-case is still working.
    cases
        .compare_and_set_status("dead-case", CaseStatus::New, CaseStatus::Failed)
        .await
        .unwrap();
    cases
        .compare_and_set_status("live-case", CaseStatus::New, CaseStatus::Preprocessing)
        .await
        .unwrap();

    // Age both locks past the zombie threshold.
    let old = (Utc::now() - chrono::Duration::hours(5)).to_rfc3339();
    sqlx::query("UPDATE resources SET locked_at = ?")
        .bind(&old)
        .execute(&db)
        .await
        .unwrap();

    let reclaimed = pool.reclaim_zombies(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].holder_case_id.as_deref(), Some("dead-case"));

    // The active holder keeps its lock.
    let resources = pool.list().await.unwrap();
    let locked: Vec<_> = resources
        .iter()
        .filter(|r| r.status == ResourceStatus::Locked)
        .collect();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].holder_case_id.as_deref(), Some("live-case"));
}

#[tokio::test]
async fn test_recent_locks_are_not_reclaimed() {
    let (_dir, db) = setup_test_db().await;
    let (pool, cases) = make_pool(&db);

    pool.refresh(&["gpu0".to_string()]).await.unwrap();
    add_case(&cases, "case-1", CaseStatus::New).await;
    pool.acquire_any("case-1").await.unwrap();
    cases
        .compare_and_set_status("case-1", CaseStatus::New, CaseStatus::Failed)
        .await
        .unwrap();

    // Lock is orphaned but still fresh.
    let reclaimed = pool.reclaim_zombies(Duration::from_secs(3600)).await.unwrap();
    assert!(reclaimed.is_empty());
}
