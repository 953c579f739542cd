//! Implementation of the `caseflow run` command.
//!
//! Wires the repositories, resource pool, and orchestrator together and runs
//! the main loop until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::adapters::sqlite::{
    initialize_database, SqliteCaseRepository, SqliteResourceRepository,
};
use crate::application::{CaseDetected, Orchestrator};
use crate::domain::ports::{CaseRepository, CommandRunner, ResourceRepository, SystemCommandRunner};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging;
use crate::services::{ResourcePool, StatusEventBus};

pub async fn execute(_json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.logging);

    let database_url = format!("sqlite://{}", config.database.path);
    let db = initialize_database(&database_url)
        .await
        .context("Failed to open database")?;

    let case_repo: Arc<dyn CaseRepository> = Arc::new(SqliteCaseRepository::new(db.clone()));
    let resource_repo: Arc<dyn ResourceRepository> =
        Arc::new(SqliteResourceRepository::new(db.clone()));
    let resource_pool = Arc::new(ResourcePool::new(resource_repo, Arc::clone(&case_repo)));
    let events = StatusEventBus::default();
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);

    // Forward status events to the log stream for the display collaborator.
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            info!(
                case_id = event.case_id,
                status = %event.status,
                timestamp = %event.timestamp.to_rfc3339(),
                "{}",
                event.message
            );
        }
    });

    let orchestrator = Orchestrator::new(
        config,
        db,
        case_repo,
        resource_pool,
        events,
        runner,
    );

    // Intake stays open for the lifetime of the loop; detection collaborators
    // (or future watchers) push CaseDetected events through this channel.
    let (_intake_tx, intake_rx) = mpsc::channel::<CaseDetected>(64);

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; shutting down");
            let _ = shutdown.send(());
        }
    });

    orchestrator.run(intake_rx).await
}
