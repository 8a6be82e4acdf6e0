use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dartdbg_config::{load_config, Config};
use dartdbg_core::Disposables;
use dartdbg_core::logging::{
    fallback_log_file_path, filter_directive, open_log_file, DEFAULT_MAX_LOG_FILES,
    DEFAULT_MAX_LOG_SIZE, LOG_FILE_NAME,
};
use dartdbg_dap::{serve, AdapterSettings, WebSocketConnector};
use dartdbg_platform::{find_dart_sdk, DefaultPaths, PlatformPaths};
use dartdbg_test::render::{render_summary, render_tree};
use dartdbg_test::runner::{run_tests, TestCommand};
use dartdbg_test::TestSessionCoordinator;

const USAGE: &str = "\
usage: dartdbg [dap]              serve the Debug Adapter Protocol on stdin/stdout
       dartdbg test [PATH...]     run `dart test` and print the result tree
       dartdbg --version";

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    Dap,
    Test(Vec<String>),
    Version,
    Help,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    match args.first().map(String::as_str) {
        None | Some("dap") => Ok(Invocation::Dap),
        Some("test") => Ok(Invocation::Test(args[1..].to_vec())),
        Some("--version" | "-V") => Ok(Invocation::Version),
        Some("--help" | "-h") => Ok(Invocation::Help),
        Some(other) => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

fn load_settings(cwd: &Path) -> (Config, Option<DefaultPaths>) {
    let paths = DefaultPaths::new().ok();
    let config = match &paths {
        Some(paths) => load_config(&paths.config_dir(), Some(cwd)).unwrap_or_else(|e| {
            eprintln!("dartdbg: config load failed, using defaults: {e}");
            Config::default()
        }),
        None => Config::default(),
    };
    (config, paths)
}

/// Send tracing output to a rotated log file. Stdout carries DAP traffic,
/// so logging is skipped entirely when no file can be opened.
fn init_logging(config: &Config, paths: Option<&DefaultPaths>) {
    let path = config
        .log
        .file
        .clone()
        .or_else(|| paths.map(|p| p.log_dir().join(LOG_FILE_NAME)))
        .unwrap_or_else(fallback_log_file_path);
    let file = open_log_file(&path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).or_else(|_| {
        open_log_file(
            &fallback_log_file_path(),
            DEFAULT_MAX_LOG_SIZE,
            DEFAULT_MAX_LOG_FILES,
        )
    });
    let Ok(file) = file else { return };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.log.level.as_str())));
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(file))
        .with_env_filter(filter)
        .with_ansi(false)
        .init();
}

async fn run_dap(config: &Config, cwd: PathBuf) -> Result<i32> {
    let settings = AdapterSettings::from_config(config, cwd);
    info!("serving DAP on stdio");
    serve(
        tokio::io::stdin(),
        tokio::io::stdout(),
        settings,
        Arc::new(WebSocketConnector),
    )
    .await
    .context("debug adapter failed")?;
    Ok(0)
}

async fn run_test_command(config: &Config, cwd: &Path, paths: Vec<String>) -> Result<i32> {
    let sdk = find_dart_sdk(config.sdk.dart_sdk_path.as_deref())
        .context("could not locate the Dart SDK")?;
    let command = TestCommand::new(sdk.dart_executable(), cwd, paths)
        .with_extra_args(config.test.extra_args.clone());

    let coordinator = Mutex::new(TestSessionCoordinator::new());
    let mut subscriptions = Disposables::new();
    {
        let coordinator = coordinator.lock().await;
        subscriptions.push(coordinator.on_tests_started(|_| eprintln!("running tests...")));
        subscriptions.push(
            coordinator.on_first_failure(|signal| eprintln!("first failure: {}", signal.name)),
        );
    }

    let (summary, code) = run_tests(&coordinator, &command)
        .await
        .context("test run failed")?;
    subscriptions.dispose_all();
    let coordinator = coordinator.lock().await;
    print!("{}", render_tree(coordinator.tree()));
    println!("{}", render_summary(&summary));
    Ok(match code {
        Some(0) if summary.is_success() => 0,
        Some(0) => 1,
        Some(code) => code,
        None => 1,
    })
}

fn run() -> Result<i32> {
    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = parse_args(&args)?;
    match invocation {
        Invocation::Version => {
            println!("dartdbg {}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }
        Invocation::Help => {
            println!("{USAGE}");
            return Ok(0);
        }
        Invocation::Dap | Invocation::Test(_) => {}
    }

    let cwd = env::current_dir().context("failed to read the working directory")?;
    let (config, paths) = load_settings(&cwd);
    init_logging(&config, paths.as_ref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async {
        match invocation {
            Invocation::Test(paths) => run_test_command(&config, &cwd, paths).await,
            _ => run_dap(&config, cwd.clone()).await,
        }
    })
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("dartdbg: {e:#}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_serves_dap() {
        assert_eq!(parse_args(&[]).unwrap(), Invocation::Dap);
        assert_eq!(parse_args(&args(&["dap"])).unwrap(), Invocation::Dap);
    }

    #[test]
    fn test_command_keeps_paths() {
        assert_eq!(
            parse_args(&args(&["test", "test/a_test.dart", "test/unit"])).unwrap(),
            Invocation::Test(args(&["test/a_test.dart", "test/unit"]))
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = parse_args(&args(&["frobnicate"])).unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }
}
