//! Common test utilities for integration tests.
//!
//! Provides shared fixtures and helpers used across multiple integration test
//! files: tempfile-backed databases (WAL mode, real concurrency) and scripted
//! command runners for exercising workflows without external tools or an ssh
//! target.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caseflow::adapters::sqlite::{all_embedded_migrations, create_pool, Migrator};
use caseflow::domain::ports::CommandRunner;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a migrated database in a temporary directory.
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn setup_test_db() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("test.db");
    let url = format!("sqlite://{}", db_path.display());

    let pool = create_pool(&url, None).await.expect("Failed to create pool");
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .expect("Failed to run migrations");

    (dir, pool)
}

/// Create a case directory with a couple of input files.
#[allow(dead_code)]
pub fn make_case_dir(root: &Path, case_id: &str) -> PathBuf {
    let dir = root.join(case_id);
    std::fs::create_dir_all(&dir).expect("Failed to create case dir");
    std::fs::write(dir.join("plan.csv"), "beam,1\n").expect("Failed to write input");
    std::fs::write(dir.join("run.in"), "config\n").expect("Failed to write input");
    dir
}

/// One scripted response for the fake runner.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct FakeOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[allow(dead_code)]
impl FakeOutput {
    pub fn ok() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[allow(dead_code)]
fn to_output(fake: &FakeOutput) -> std::process::Output {
    use std::os::unix::process::ExitStatusExt;
    std::process::Output {
        status: std::process::ExitStatus::from_raw(fake.exit_code << 8),
        stdout: fake.stdout.clone().into_bytes(),
        stderr: fake.stderr.clone().into_bytes(),
    }
}

/// Command runner that simulates the external world for workflow tests.
///
/// Local tools and transfers succeed or fail per the scripted knobs; the
/// remote side keeps just enough state (launched flag) to emulate the
/// marker protocol.
#[allow(dead_code)]
pub struct SimulatedRunner {
    /// Recorded invocations: (program, joined args)
    pub calls: Mutex<Vec<(String, String)>>,
    /// Remote job launched (guard marker present)
    launched: AtomicBool,
    /// Whether a launched job produces its completion marker
    pub job_completes: AtomicBool,
    /// Scripted response for the named local tool, if any
    pub tool_response: Mutex<Option<(String, FakeOutput)>>,
    /// Scripted response for every ssh invocation, if set (overrides marker
    /// emulation; used for auth/connect failures)
    pub ssh_response: Mutex<Option<FakeOutput>>,
    /// Scripted response for every scp invocation, if set
    pub scp_response: Mutex<Option<FakeOutput>>,
}

#[allow(dead_code)]
impl SimulatedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            launched: AtomicBool::new(false),
            job_completes: AtomicBool::new(true),
            tool_response: Mutex::new(None),
            ssh_response: Mutex::new(None),
            scp_response: Mutex::new(None),
        })
    }

    /// Script a response for a local tool by command name.
    pub fn script_tool(&self, command: &str, response: FakeOutput) {
        *self.tool_response.lock().unwrap() = Some((command.to_string(), response));
    }

    pub fn script_ssh(&self, response: FakeOutput) {
        *self.ssh_response.lock().unwrap() = Some(response);
    }

    pub fn script_scp(&self, response: FakeOutput) {
        *self.scp_response.lock().unwrap() = Some(response);
    }

    pub fn call_count_for(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program)
            .count()
    }

    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, args)| args.contains(needle))
            .count()
    }

    fn handle_ssh(&self, joined: &str) -> FakeOutput {
        if let Some(scripted) = self.ssh_response.lock().unwrap().clone() {
            return scripted;
        }

        if joined.contains("test -e") {
            let launched = self.launched.load(Ordering::SeqCst);
            let done = launched && self.job_completes.load(Ordering::SeqCst);
            if joined.contains("done.marker") {
                return if done {
                    FakeOutput::ok()
                } else {
                    FakeOutput::fail(1, "")
                };
            }
            if joined.contains("launched.marker") {
                return if launched {
                    FakeOutput::ok()
                } else {
                    FakeOutput::fail(1, "")
                };
            }
        }

        if joined.contains("nohup") {
            self.launched.store(true, Ordering::SeqCst);
            return FakeOutput::ok();
        }

        // mkdir -p, true, etc.
        FakeOutput::ok()
    }
}

#[async_trait]
impl CommandRunner for SimulatedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _working_dir: Option<&Path>,
    ) -> std::io::Result<std::process::Output> {
        let joined = args.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), joined.clone()));

        let fake = match program {
            "ssh" => self.handle_ssh(&joined),
            "scp" => self
                .scp_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(FakeOutput::ok),
            _ => {
                let scripted = self.tool_response.lock().unwrap().clone();
                match scripted {
                    Some((command, response)) if command == program => response,
                    _ => FakeOutput {
                        exit_code: 0,
                        stdout: "ok".to_string(),
                        stderr: String::new(),
                    },
                }
            }
        };

        Ok(to_output(&fake))
    }
}
