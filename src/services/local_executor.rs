//! Local step executor.
//!
//! Runs one external conversion tool to completion and folds every failure
//! path into a classified [`StepOutcome`]. Callers never see an `Err`.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::models::{ErrorKind, StepOutcome};
use crate::domain::ports::CommandRunner;

pub struct LocalExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl LocalExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Execute `command args` in `working_dir`, capturing both streams.
    ///
    /// Non-zero exit maps to an [`ErrorKind::ExternalTool`] outcome with the
    /// captured stderr; a failure to spawn is classified from the io error
    /// (missing binary is permanent, anything else transient).
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> StepOutcome {
        debug!(command, ?args, "Running local tool");

        let output = match self.runner.run(command, args, working_dir).await {
            Ok(output) => output,
            Err(e) => {
                let kind = classify_spawn_error(&e);
                warn!(command, error = %e, "Failed to spawn local tool");
                return StepOutcome::failure(kind, format!("failed to spawn {command}: {e}"));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code();

        if output.status.success() {
            StepOutcome::success(stdout, stderr)
        } else {
            warn!(command, exit_code = ?code, "Local tool exited non-zero");
            let mut outcome = StepOutcome::failure(ErrorKind::ExternalTool, stderr);
            outcome.stdout = stdout;
            if let Some(code) = code {
                outcome = outcome.with_exit_code(code);
            }
            outcome
        }
    }
}

/// A missing executable will not appear on retry; everything else might.
fn classify_spawn_error(e: &std::io::Error) -> ErrorKind {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            ErrorKind::ExternalTool
        }
        _ => ErrorKind::TransientIo,
    }
}
