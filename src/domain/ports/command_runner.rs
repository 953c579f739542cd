//! Process-spawn seam used by the step executors.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;

/// Runs an external program to completion, capturing both output streams.
///
/// The production implementation wraps `tokio::process::Command`; tests
/// substitute scripted fakes so workflows can be exercised without real
/// conversion tools or an ssh target.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> std::io::Result<Output>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> std::io::Result<Output> {
        let mut command = tokio::process::Command::new(program);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        command.kill_on_drop(false);
        command.output().await
    }
}
