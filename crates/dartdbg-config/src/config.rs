use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Debugger behaviour. Launch/attach arguments may override any of these
/// for a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Step into and stop in `dart:` libraries.
    #[serde(default)]
    pub debug_sdk_libraries: bool,
    /// Step into and stop in packages resolved from the pub cache.
    #[serde(default)]
    pub debug_external_libraries: bool,
    /// Show getter values when expanding objects.
    #[serde(default = "default_true")]
    pub evaluate_getters_in_debug_views: bool,
    /// Call `toString()` on plain instances for their display value.
    #[serde(default)]
    pub evaluate_to_string_in_debug_views: bool,
    /// Strings longer than this are truncated (display only).
    #[serde(default = "default_max_string_display_length")]
    pub max_string_display_length: usize,
    /// Forward `dart:developer` `log()` records to the debug console.
    #[serde(default = "default_true")]
    pub show_log_output: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_string_display_length() -> usize {
    100
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            debug_sdk_libraries: false,
            debug_external_libraries: false,
            evaluate_getters_in_debug_views: true,
            evaluate_to_string_in_debug_views: false,
            max_string_display_length: default_max_string_display_length(),
            show_log_output: true,
        }
    }
}

/// Where to find the Dart toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Explicit SDK root; otherwise discovered from the environment.
    pub dart_sdk_path: Option<PathBuf>,
    /// Explicit pub cache; otherwise `$PUB_CACHE` or `~/.pub-cache`.
    pub pub_cache: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Log file path; defaults to `<log_dir>/dartdbg.log`.
    pub file: Option<PathBuf>,
}

/// Test runner settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Extra arguments passed to `dart test` before the suite paths.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub sdk: SdkConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub test: TestConfig,
}
