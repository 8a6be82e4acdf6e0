use std::path::PathBuf;

use crate::error::PlatformError;

/// Where dartdbg keeps its own files.
pub trait PlatformPaths: Send + Sync {
    /// Directory of the global `config.toml`.
    fn config_dir(&self) -> PathBuf;
    /// Directory of `dartdbg.log` and its rotated copies.
    fn log_dir(&self) -> PathBuf;
}

/// Per-user directories from the platform conventions: `$XDG_CONFIG_HOME`
/// and `$XDG_STATE_HOME` on Linux, `~/Library/Application Support` on macOS,
/// `%APPDATA%` / `%LOCALAPPDATA%` on Windows.
#[derive(Debug, Clone)]
pub struct DefaultPaths {
    config: PathBuf,
    logs: PathBuf,
}

impl DefaultPaths {
    /// # Errors
    ///
    /// `PlatformError::Path` when the platform reports no config directory.
    pub fn new() -> Result<Self, PlatformError> {
        let config = dirs::config_dir()
            .ok_or_else(|| PlatformError::Path("no per-user config directory".into()))?
            .join("dartdbg");
        let logs = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .map(|dir| dir.join("dartdbg").join("logs"))
            .unwrap_or_else(|| config.join("logs"));
        Ok(Self { config, logs })
    }

    /// Explicit directories, for tests and portable installs.
    pub fn at(config: impl Into<PathBuf>, logs: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            logs: logs.into(),
        }
    }
}

impl PlatformPaths for DefaultPaths {
    fn config_dir(&self) -> PathBuf {
        self.config.clone()
    }

    fn log_dir(&self) -> PathBuf {
        self.logs.clone()
    }
}
