//! Spawning the debuggee and finding its VM service.
//!
//! The child's stdout and stderr are forwarded line by line as
//! [`ProcessEvent`]s. The VM service URI is taken from the banner the VM
//! prints on startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DapError;
use crate::protocol::LaunchRequestArguments;

/// How long to wait for the output readers after the child exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub dart: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub tool_args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub no_debug: bool,
    pub stop_on_entry: bool,
}

impl LaunchPlan {
    /// Validate `launch` arguments. A missing or nonexistent program is a
    /// configuration error, raised before anything is spawned.
    pub fn from_args(
        args: &LaunchRequestArguments,
        dart: PathBuf,
        default_cwd: &Path,
    ) -> Result<Self, DapError> {
        let cwd = args
            .cwd
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_cwd.to_path_buf());
        let program = args
            .program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| DapError::Configuration("launch requires a \"program\"".into()))?;
        let program = {
            let path = PathBuf::from(program);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        };
        if !program.is_file() {
            return Err(DapError::Configuration(format!(
                "program does not exist: {}",
                program.display()
            )));
        }
        Ok(Self {
            dart,
            program,
            args: args.args.clone().unwrap_or_default(),
            tool_args: args.tool_args.clone().unwrap_or_default(),
            cwd,
            env: args.env.clone().unwrap_or_default(),
            no_debug: args.no_debug.unwrap_or(false),
            stop_on_entry: args.stop_on_entry.unwrap_or(false),
        })
    }

    /// Arguments passed to `dart`.
    pub fn command_args(&self) -> Vec<String> {
        let mut out = self.tool_args.clone();
        if !self.no_debug {
            out.push("--enable-vm-service=0".into());
            out.push("--pause-isolates-on-start".into());
        }
        out.push(self.program.to_string_lossy().into_owned());
        out.extend(self.args.iter().cloned());
        out
    }
}

/// The VM service URI announced in a line of debuggee output.
pub fn vm_service_banner(line: &str) -> Option<String> {
    static BANNER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = BANNER
        .get_or_init(|| {
            Regex::new(r"(?:The Dart VM service is listening on|Observatory listening on)\s+(\S+)")
                .ok()
        })
        .as_ref()?;
    re.captures(line).map(|c| c[1].to_string())
}

/// Output and lifecycle of a spawned debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// The VM service banner was seen on stdout.
    VmService(String),
    /// The process ended; `None` when killed by a signal.
    Exited(Option<i32>),
}

/// A running debuggee.
pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

fn forward_lines<R>(
    stream: R,
    tx: mpsc::UnboundedSender<ProcessEvent>,
    is_stdout: bool,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut banner_seen = false;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_stdout && !banner_seen {
                        if let Some(uri) = vm_service_banner(&line) {
                            banner_seen = true;
                            let _ = tx.send(ProcessEvent::VmService(uri));
                        }
                    }
                    let text = format!("{line}\n");
                    let event = if is_stdout {
                        ProcessEvent::Stdout(text)
                    } else {
                        ProcessEvent::Stderr(text)
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("debuggee output closed: {e}");
                    break;
                }
            }
        }
    })
}

/// Spawn the debuggee. Cancelling `kill` terminates it; the last event on
/// the channel is always [`ProcessEvent::Exited`].
pub fn spawn(plan: &LaunchPlan, kill: CancellationToken) -> Result<LaunchedProcess, DapError> {
    let args = plan.command_args();
    tracing::info!("launching {} {}", plan.dart.display(), args.join(" "));
    let mut child = Command::new(&plan.dart)
        .args(&args)
        .current_dir(&plan.cwd)
        .envs(&plan.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            DapError::Configuration(format!("failed to start {}: {e}", plan.dart.display()))
        })?;

    let (tx, events) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, tx.clone(), true));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, tx.clone(), false));
    }
    let pid = child.id();

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!("failed to kill debuggee: {e}");
                }
                child.wait().await
            }
        };
        for reader in readers {
            if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::debug!("debuggee output still open after exit");
            }
        }
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!("waiting for debuggee failed: {e}");
                None
            }
        };
        tracing::info!("debuggee exited with {code:?}");
        let _ = tx.send(ProcessEvent::Exited(code));
    });

    Ok(LaunchedProcess { pid, events })
}
