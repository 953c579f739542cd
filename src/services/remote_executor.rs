//! Remote step executor.
//!
//! Drives the remote side of the pipeline over ssh/scp subprocesses: session
//! verification, bulk transfer, detached job launch, and completion-marker
//! polling. No interactive job-status protocol is used; a finished remote job
//! announces itself by touching a sentinel marker file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::domain::models::{ErrorKind, RemoteConfig, StepOutcome};
use crate::domain::ports::CommandRunner;

/// Connection-phase failures. Both are permanent for the case.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Remote authentication failed: {0}")]
    Auth(String),
    #[error("Remote host unreachable: {0}")]
    Connect(String),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::RemoteAuth,
            Self::Connect(_) => ErrorKind::RemoteConnect,
        }
    }

    pub fn into_outcome(self) -> StepOutcome {
        let kind = self.kind();
        StepOutcome::failure(kind, self.to_string())
    }
}

/// Builds ssh/scp invocations from the remote host configuration.
pub struct RemoteExecutor {
    config: RemoteConfig,
    runner: Arc<dyn CommandRunner>,
}

impl RemoteExecutor {
    pub fn new(config: RemoteConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Verify reachability and key-based authentication with a no-op remote
    /// command, returning a session for subsequent operations.
    pub async fn connect(&self) -> Result<RemoteSession, ConnectError> {
        let session = RemoteSession {
            config: self.config.clone(),
            runner: Arc::clone(&self.runner),
        };

        let outcome = session.ssh("true").await;
        if outcome.success {
            debug!(host = self.config.host, "Remote session established");
            return Ok(session);
        }

        let stderr = outcome.stderr.to_lowercase();
        if stderr.contains("permission denied") || stderr.contains("publickey") {
            Err(ConnectError::Auth(first_line(&outcome.stderr)))
        } else {
            Err(ConnectError::Connect(first_line(&outcome.stderr)))
        }
    }
}

/// An authenticated remote session.
///
/// Sessions are cheap handles over the configured transport; they hold no OS
/// connection state, so re-creating one after a crash is always safe.
pub struct RemoteSession {
    config: RemoteConfig,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RemoteSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(self.destination());
        args
    }

    fn scp_base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-B".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-P".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args
    }

    /// Run one remote command over ssh, folding every failure into the
    /// outcome.
    async fn ssh(&self, remote_command: &str) -> StepOutcome {
        let mut args = self.ssh_args();
        args.push(remote_command.to_string());

        match self.runner.run("ssh", &args, None).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    StepOutcome::success(stdout, stderr)
                } else {
                    let mut outcome = StepOutcome::failure(ErrorKind::TransientIo, stderr);
                    outcome.stdout = stdout;
                    if let Some(code) = output.status.code() {
                        outcome = outcome.with_exit_code(code);
                    }
                    outcome
                }
            }
            Err(e) => StepOutcome::failure(ErrorKind::RemoteConnect, format!("ssh spawn failed: {e}")),
        }
    }

    /// Create the remote work directory.
    pub async fn prepare_dir(&self, remote_dir: &str) -> StepOutcome {
        let outcome = self.ssh(&format!("mkdir -p {}", shell_quote(remote_dir))).await;
        if outcome.success {
            outcome
        } else {
            StepOutcome::failure(ErrorKind::Transfer, outcome.stderr)
        }
    }

    /// Bulk-upload local files into `remote_dir`.
    ///
    /// Any scp failure (partial or total) is a Transfer outcome; a partial
    /// upload is never reported as success.
    pub async fn upload(&self, files: &[PathBuf], remote_dir: &str) -> StepOutcome {
        if files.is_empty() {
            return StepOutcome::failure(ErrorKind::Transfer, "no files to upload");
        }

        let mut args = self.scp_base_args();
        for file in files {
            args.push(file.display().to_string());
        }
        args.push(format!("{}:{}", self.destination(), remote_dir));

        info!(count = files.len(), remote_dir, "Uploading case files");
        self.transfer(args).await
    }

    /// Bulk-download remote files into `local_dir`.
    pub async fn download(&self, remote_files: &[String], local_dir: &Path) -> StepOutcome {
        if remote_files.is_empty() {
            return StepOutcome::failure(ErrorKind::Transfer, "no files to download");
        }

        let mut args = self.scp_base_args();
        for file in remote_files {
            args.push(format!("{}:{}", self.destination(), file));
        }
        args.push(local_dir.display().to_string());

        info!(count = remote_files.len(), "Downloading result files");
        self.transfer(args).await
    }

    async fn transfer(&self, args: Vec<String>) -> StepOutcome {
        match self.runner.run("scp", &args, None).await {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.status.success() {
                    StepOutcome::success(String::from_utf8_lossy(&output.stdout), stderr)
                } else {
                    warn!(exit_code = ?output.status.code(), "Transfer failed");
                    let mut outcome = StepOutcome::failure(ErrorKind::Transfer, stderr);
                    if let Some(code) = output.status.code() {
                        outcome = outcome.with_exit_code(code);
                    }
                    outcome
                }
            }
            Err(e) => StepOutcome::failure(ErrorKind::Transfer, format!("scp spawn failed: {e}")),
        }
    }

    /// Launch a detached remote job in `work_dir` that touches `marker_path`
    /// on successful completion. Returns as soon as the job is handed off.
    pub async fn launch_background(
        &self,
        work_dir: &str,
        command: &str,
        marker_path: &str,
    ) -> StepOutcome {
        let script = format!(
            "cd {} && {} && touch {}",
            shell_quote(work_dir),
            command,
            shell_quote(marker_path)
        );
        let remote = format!("nohup sh -c {} >/dev/null 2>&1 & echo launched", shell_quote(&script));

        info!(work_dir, "Launching remote simulation");
        self.ssh(&remote).await
    }

    /// Check whether the completion marker exists right now.
    pub async fn marker_exists(&self, marker_path: &str) -> StepOutcome {
        self.ssh(&format!("test -e {}", shell_quote(marker_path))).await
    }

    /// Block the calling worker polling for the marker at `interval` until it
    /// appears or `timeout` elapses.
    ///
    /// A marker satisfied before the first poll (a finished job from a
    /// previous run) succeeds immediately, which is what makes step re-entry
    /// idempotent. On timeout the remote job is left running; reconciliation
    /// picks the case up later.
    pub async fn poll_until_marker(
        &self,
        marker_path: &str,
        interval: Duration,
        timeout: Duration,
    ) -> StepOutcome {
        let deadline = Instant::now() + timeout;
        let mut checks: u32 = 0;

        loop {
            checks += 1;
            let probe = self.marker_exists(marker_path).await;
            if probe.success {
                info!(marker_path, checks, "Completion marker found");
                return StepOutcome::success(format!("marker present after {checks} checks"), "");
            }
            // Exit 1 just means "not yet"; other failures are transient noise
            // worth logging but not worth aborting the wait for.
            if probe.exit_code != Some(1) {
                debug!(marker_path, stderr = %probe.stderr, "Marker probe failed; continuing");
            }

            if Instant::now() + interval > deadline {
                warn!(marker_path, checks, "Marker polling timed out");
                return StepOutcome::failure(
                    ErrorKind::Timeout,
                    format!("marker {marker_path} absent after {checks} checks"),
                );
            }
            sleep(interval).await;
        }
    }
}

/// Single-quote `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("connection failed").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};
    use std::sync::Mutex;

    /// Scripted runner: pops canned outputs and records invocations.
    struct ScriptedRunner {
        outputs: Mutex<Vec<Output>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<Output>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn output(code: i32, stdout: &str, stderr: &str) -> Output {
            Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _working_dir: Option<&Path>,
        ) -> std::io::Result<Output> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            let mut outputs = self.outputs.lock().unwrap();
            if outputs.is_empty() {
                Ok(Self::output(0, "", ""))
            } else {
                Ok(outputs.remove(0))
            }
        }
    }

    fn executor(runner: Arc<ScriptedRunner>) -> RemoteExecutor {
        RemoteExecutor::new(RemoteConfig::default(), runner)
    }

    #[tokio::test]
    async fn test_connect_success() {
        let runner = ScriptedRunner::new(vec![ScriptedRunner::output(0, "", "")]);
        assert!(executor(Arc::clone(&runner)).connect().await.is_ok());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "ssh");
        assert!(calls[0].1.contains(&"BatchMode=yes".to_string()));
    }

    #[tokio::test]
    async fn test_connect_auth_failure() {
        let runner = ScriptedRunner::new(vec![ScriptedRunner::output(
            255,
            "",
            "user@host: Permission denied (publickey).",
        )]);
        let err = executor(runner).connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteAuth);
    }

    #[tokio::test]
    async fn test_connect_network_failure() {
        let runner = ScriptedRunner::new(vec![ScriptedRunner::output(
            255,
            "",
            "ssh: connect to host cluster port 22: Connection refused",
        )]);
        let err = executor(runner).connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteConnect);
    }

    #[tokio::test]
    async fn test_upload_failure_is_transfer_error() {
        let runner = ScriptedRunner::new(vec![
            ScriptedRunner::output(0, "", ""), // connect probe
            ScriptedRunner::output(1, "", "scp: dest: No space left on device"),
        ]);
        let session = executor(Arc::clone(&runner)).connect().await.unwrap();

        let outcome = session
            .upload(&[PathBuf::from("/tmp/a.csv")], "/scratch/case/run")
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Transfer));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[1].0, "scp");
    }

    #[tokio::test]
    async fn test_poll_finds_preexisting_marker_immediately() {
        let runner = ScriptedRunner::new(vec![
            ScriptedRunner::output(0, "", ""), // connect probe
            ScriptedRunner::output(0, "", ""), // marker already there
        ]);
        let session = executor(runner).connect().await.unwrap();

        let outcome = session
            .poll_until_marker(
                "/scratch/case/done.marker",
                Duration::from_millis(10),
                Duration::from_secs(1),
            )
            .await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_poll_times_out_with_timeout_kind() {
        // Marker never appears; every probe exits 1.
        let probes = std::iter::repeat_with(|| ScriptedRunner::output(1, "", ""))
            .take(64)
            .collect::<Vec<_>>();
        let mut outputs = vec![ScriptedRunner::output(0, "", "")];
        outputs.extend(probes);
        let runner = ScriptedRunner::new(outputs);
        let session = executor(runner).connect().await.unwrap();

        let outcome = session
            .poll_until_marker(
                "/scratch/case/done.marker",
                Duration::from_millis(5),
                Duration::from_millis(30),
            )
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_launch_background_wraps_marker_touch() {
        let runner = ScriptedRunner::new(vec![
            ScriptedRunner::output(0, "", ""),
            ScriptedRunner::output(0, "launched", ""),
        ]);
        let session = executor(Arc::clone(&runner)).connect().await.unwrap();

        let outcome = session
            .launch_background("/scratch/case/run", "simulate run.in", "/scratch/case/run/done")
            .await;
        assert!(outcome.success);

        let calls = runner.calls.lock().unwrap();
        let remote_cmd = calls[1].1.last().unwrap();
        assert!(remote_cmd.contains("nohup"));
        assert!(remote_cmd.contains("touch"));
        assert!(remote_cmd.contains("simulate run.in"));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("abc"), "'abc'");
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }
}
