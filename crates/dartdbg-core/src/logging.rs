//! Logging helpers.
//!
//! Stdout belongs to the DAP wire protocol, so every log line goes to a
//! rotated file. The `tracing-subscriber` setup itself lives in the binary
//! (`src/main.rs`); this module only prepares the file and the filter.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Maximum size of a single log file before rotation (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to retain.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// Crates whose targets receive the configured level. Everything else
/// (tokio, dependencies) stays at `warn`.
const WORKSPACE_TARGETS: &[&str] = &[
    "dartdbg",
    "dartdbg_core",
    "dartdbg_config",
    "dartdbg_platform",
    "dartdbg_vm",
    "dartdbg_dap",
    "dartdbg_test",
];

/// Name of the log file inside the log directory.
pub const LOG_FILE_NAME: &str = "dartdbg.log";

/// Fallback log location when no home directory is available.
pub fn fallback_log_file_path() -> PathBuf {
    std::env::temp_dir().join("dartdbg").join(LOG_FILE_NAME)
}

/// Build an `EnvFilter`-compatible directive string for `level`.
///
/// Unknown level names fall back to `info`.
pub fn filter_directive(level: &str) -> String {
    let level = normalize_level(level);
    let mut directive = String::from("warn");
    for target in WORKSPACE_TARGETS {
        directive.push(',');
        directive.push_str(target);
        directive.push('=');
        directive.push_str(level);
    }
    directive
}

/// Map a level name (case-insensitive) onto one `tracing` understands.
pub fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Create parent directories, rotate if oversized, then open `path` for
/// appending.
pub fn open_log_file(path: &Path, max_size: u64, max_files: u32) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    rotate(path, max_size, max_files)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Shift `name.log` → `name.log.1` → … once `path` reaches `max_size` bytes;
/// the file beyond `max_files` is dropped.
pub fn rotate(path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if len < max_size || max_files == 0 {
        return Ok(());
    }

    let _ = fs::remove_file(numbered(path, max_files));
    for index in (1..max_files).rev() {
        let from = numbered(path, index);
        if from.exists() {
            fs::rename(&from, numbered(path, index + 1))?;
        }
    }
    fs::rename(path, numbered(path, 1))
}

fn numbered(path: &Path, index: u32) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{index}"));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_workspace_crates() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("warn,"));
        assert!(directive.contains("dartdbg_dap=debug"));
        assert!(directive.contains("dartdbg_vm=debug"));
        assert!(!directive.contains("tokio"));
    }

    #[test]
    fn unknown_level_becomes_info() {
        assert_eq!(normalize_level("verbose"), "info");
        assert_eq!(normalize_level(""), "info");
        assert_eq!(normalize_level("WARNING"), "warn");
        assert_eq!(normalize_level("Trace"), "trace");
    }

    #[test]
    fn numbered_appends_index() {
        let base = Path::new("/tmp/x/dartdbg.log");
        assert_eq!(numbered(base, 2), PathBuf::from("/tmp/x/dartdbg.log.2"));
    }

    #[test]
    fn open_creates_missing_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("a").join("b").join(LOG_FILE_NAME);
        open_log_file(&log, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn rotate_leaves_small_files_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(&log, "tiny").unwrap();
        rotate(&log, 1024, 3).unwrap();
        assert!(log.exists());
        assert!(!dir.path().join("dartdbg.log.1").exists());
    }

    #[test]
    fn rotate_cascades_and_drops_oldest() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join(LOG_FILE_NAME);
        fs::write(dir.path().join("dartdbg.log.1"), "one").unwrap();
        fs::write(dir.path().join("dartdbg.log.2"), "two").unwrap();
        fs::write(&log, "x".repeat(64)).unwrap();

        rotate(&log, 16, 2).unwrap();

        assert!(!log.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("dartdbg.log.1")).unwrap(),
            "x".repeat(64)
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("dartdbg.log.2")).unwrap(),
            "one"
        );
        assert!(!dir.path().join("dartdbg.log.3").exists());
    }

    #[test]
    fn rotate_missing_file_is_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        rotate(&dir.path().join("nope.log"), 1, 1).unwrap();
    }
}
