//! Debug bridge error types.

use dartdbg_vm::VmError;
use thiserror::Error;

/// Errors raised while serving DAP requests.
#[derive(Debug, Error)]
pub enum DapError {
    /// A malformed or unexpected VM service response. Fatal to the
    /// in-flight request only.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A user expression failed to compile or threw.
    #[error("{0}")]
    Evaluation(String),

    /// The VM service channel closed underneath the session.
    #[error("connection to the VM service was lost")]
    ConnectionLost,

    /// A `variablesReference` or frame id used after the pause it
    /// belonged to ended.
    #[error("stale reference {0}: the isolate has resumed since it was issued")]
    StaleReference(i64),

    /// Launch/attach arguments that cannot be acted on.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A request that needs `initialize` first.
    #[error("session not initialized")]
    NotInitialized,

    /// The session has already ended.
    #[error("session already terminated")]
    Terminated,

    /// The request is not valid in the current state.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("VM service error: {0}")]
    Vm(VmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// DAP framing failure on the editor side.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<VmError> for DapError {
    fn from(err: VmError) -> Self {
        if err.is_connection_lost() {
            DapError::ConnectionLost
        } else {
            DapError::Vm(err)
        }
    }
}

impl DapError {
    pub fn rejected(message: impl Into<String>) -> Self {
        DapError::Rejected {
            message: message.into(),
        }
    }

    /// True when the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DapError::ConnectionLost | DapError::Terminated)
    }
}
