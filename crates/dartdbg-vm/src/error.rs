//! VM service error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors from talking to the VM service.
#[derive(Debug, Error)]
pub enum VmError {
    /// The VM answered with a JSON-RPC error envelope.
    #[error("VM service error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
    },

    /// The connection closed before a response arrived.
    #[error("VM service connection closed")]
    ConnectionClosed,

    /// A response did not have the expected shape.
    #[error("unexpected VM service response: {0}")]
    Protocol(String),

    #[error("invalid VM service URI: {0}")]
    InvalidUri(String),

    /// The WebSocket upgrade or a frame failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON-RPC error code the VM uses for "expression compilation error".
pub const EXPRESSION_COMPILATION_ERROR: i64 = 113;

/// JSON-RPC error code for "isolate must be paused".
pub const ISOLATE_MUST_BE_PAUSED: i64 = 106;

/// JSON-RPC error code for "feature is disabled".
pub const FEATURE_DISABLED: i64 = 100;

impl VmError {
    /// True for the errors that mean the connection itself is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            VmError::ConnectionClosed
                | VmError::Io(_)
                | VmError::WebSocket(
                    tungstenite::Error::ConnectionClosed
                        | tungstenite::Error::AlreadyClosed
                        | tungstenite::Error::Io(_)
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_display() {
        let err = VmError::Rpc {
            code: EXPRESSION_COMPILATION_ERROR,
            message: "Expression compilation error".into(),
        };
        assert_eq!(
            err.to_string(),
            "VM service error 113: Expression compilation error"
        );
    }

    #[test]
    fn connection_loss_classification() {
        assert!(VmError::ConnectionClosed.is_connection_lost());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(VmError::from(io).is_connection_lost());
        assert!(!VmError::Protocol("x".into()).is_connection_lost());
        assert!(VmError::from(tungstenite::Error::ConnectionClosed).is_connection_lost());
        assert!(!VmError::InvalidUri("x".into()).is_connection_lost());
    }

    #[test]
    fn serde_error_converts() {
        let err: VmError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("serialization error"));
    }
}
