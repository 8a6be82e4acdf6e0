//! JSON-RPC 2.0 message encoding for the VM service.
//!
//! Each WebSocket text frame carries exactly one JSON-RPC message, so
//! there is no length framing here.

use serde_json::Value;

use crate::error::VmError;

/// An incoming JSON-RPC message from the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// A response to one of our requests.
    Response {
        /// The request id, normalised to a string.
        id: String,
        result: Option<Value>,
        error: Option<RpcError>,
    },
    /// A notification (`streamNotify`, service extension calls).
    Notification { method: String, params: Value },
}

/// The error member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// `data.details` when the VM supplies it (compilation errors do).
    pub details: Option<String>,
}

impl RpcError {
    /// Message plus details, the way a user should see it.
    pub fn full_message(&self) -> String {
        match &self.details {
            Some(details) if !details.is_empty() => format!("{}: {}", self.message, details),
            _ => self.message.clone(),
        }
    }
}

impl From<RpcError> for VmError {
    fn from(err: RpcError) -> Self {
        VmError::Rpc {
            code: err.code,
            message: err.full_message(),
        }
    }
}

/// Serialize a request. Ids are sent as strings, which every VM version
/// echoes back unchanged.
pub fn serialize_request(id: &str, method: &str, params: &Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Parse one incoming message.
pub fn parse_message(text: &str) -> Result<RpcMessage, VmError> {
    let value: Value = serde_json::from_str(text)?;

    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        return Ok(RpcMessage::Notification {
            method: method.to_string(),
            params,
        });
    }

    let id = match value.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(VmError::Protocol(
                "message has neither method nor id".into(),
            ))
        }
    };
    let error = value.get("error").map(|e| RpcError {
        code: e.get("code").and_then(Value::as_i64).unwrap_or(0),
        message: e
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
        details: e
            .pointer("/data/details")
            .and_then(Value::as_str)
            .map(str::to_string),
    });
    Ok(RpcMessage::Response {
        id,
        result: value.get("result").cloned(),
        error,
    })
}
