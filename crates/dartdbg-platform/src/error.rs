use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving platform paths.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("path error: {0}")]
    Path(String),

    #[error("Dart SDK not found (searched: {searched})")]
    SdkNotFound { searched: String },

    #[error("not a Dart SDK: {0}")]
    InvalidSdk(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
