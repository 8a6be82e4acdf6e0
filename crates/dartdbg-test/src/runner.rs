//! Driving `dart test --reporter json`.
//!
//! The runner's stdout is read line by line and fed to a shared
//! [`TestSessionCoordinator`]; its stderr goes to ours.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::coordinator::{RunId, RunSummary, TestSessionCoordinator};
use crate::error::TestError;

/// A `dart test` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub dart: PathBuf,
    pub cwd: PathBuf,
    /// Passed before the suite paths, e.g. `--concurrency=1`.
    pub extra_args: Vec<String>,
    pub paths: Vec<String>,
}

impl TestCommand {
    pub fn new(dart: impl Into<PathBuf>, cwd: &Path, paths: Vec<String>) -> Self {
        Self {
            dart: dart.into(),
            cwd: cwd.to_path_buf(),
            extra_args: Vec::new(),
            paths,
        }
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["test".to_string(), "--reporter".into(), "json".into()];
        args.extend(self.extra_args.iter().cloned());
        args.extend(self.paths.iter().cloned());
        args
    }

    /// Paths that name a single suite file, claimed up front by the run.
    pub fn suite_paths(&self) -> Vec<String> {
        self.paths
            .iter()
            .filter(|p| p.ends_with(".dart"))
            .cloned()
            .collect()
    }
}

/// A running `dart test`. Dropping it kills the process.
pub struct TestProcess {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl TestProcess {
    /// Take the reporter stream. Available once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn kill(&mut self) -> Result<(), TestError> {
        Ok(self.child.kill().await?)
    }

    /// Wait for exit. `None` when killed by a signal.
    pub async fn wait(mut self) -> Result<Option<i32>, TestError> {
        Ok(self.child.wait().await?.code())
    }
}

pub fn spawn(command: &TestCommand) -> Result<TestProcess, TestError> {
    let args = command.args();
    info!("running {} {}", command.dart.display(), args.join(" "));
    let mut child = Command::new(&command.dart)
        .args(&args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TestError::SpawnFailed(format!("{}: {e}", command.dart.display())))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TestError::SpawnFailed("could not capture stdout".into()))?;
    Ok(TestProcess {
        child,
        stdout: Some(stdout),
    })
}

/// Feed reporter output into `coordinator` until it ends, then finish the
/// run. Malformed lines are logged and skipped.
pub async fn drive<R>(
    coordinator: &Mutex<TestSessionCoordinator>,
    run: RunId,
    output: R,
) -> Result<RunSummary, TestError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    while let Some(line) = lines.next_line().await? {
        match coordinator.lock().await.handle_line(run, &line) {
            Ok(()) => {}
            Err(TestError::Malformed(e)) => warn!("{run}: skipping reporter line: {e}"),
            Err(e) => return Err(e),
        }
    }
    coordinator.lock().await.finish_run(run)
}

/// Spawn `command`, report it into `coordinator`, and wait for it.
/// Returns the run's counts and the process exit code.
pub async fn run_tests(
    coordinator: &Mutex<TestSessionCoordinator>,
    command: &TestCommand,
) -> Result<(RunSummary, Option<i32>), TestError> {
    let run = coordinator.lock().await.begin_run(&command.suite_paths());
    let mut process = match spawn(command) {
        Ok(process) => process,
        Err(e) => {
            coordinator.lock().await.finish_run(run)?;
            return Err(e);
        }
    };
    let stdout = process
        .take_stdout()
        .ok_or_else(|| TestError::SpawnFailed("could not capture stdout".into()))?;
    let summary = drive(coordinator, run, stdout).await?;
    let code = process.wait().await?;
    info!("{run} exited with {code:?}");
    Ok((summary, code))
}
