//! Test runner error types.

use thiserror::Error;

/// Errors from parsing reporter output or driving `dart test`.
#[derive(Debug, Error)]
pub enum TestError {
    /// A reporter line that looked like JSON but did not decode.
    #[error("malformed reporter event: {0}")]
    Malformed(String),

    /// `dart test` could not be started.
    #[error("failed to start test runner: {0}")]
    SpawnFailed(String),

    /// The run id is not (or no longer) active.
    #[error("unknown test run {0}")]
    UnknownRun(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TestError {
    fn from(err: serde_json::Error) -> Self {
        TestError::Malformed(err.to_string())
    }
}
