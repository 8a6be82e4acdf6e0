//! Pending-request bookkeeping.
//!
//! Each outgoing request registers a oneshot sender under its id; the
//! reader task resolves it when the matching response arrives.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::transport::RpcError;

/// What a waiting caller receives.
pub type RpcOutcome = Result<Value, RpcError>;

/// Tracks requests awaiting a response.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: HashMap<String, oneshot::Sender<RpcOutcome>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its response will arrive on.
    pub fn register(&mut self, id: String) -> oneshot::Receiver<RpcOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Deliver a response. Unknown ids are logged and dropped.
    pub fn resolve(&mut self, id: &str, result: Option<Value>, error: Option<RpcError>) {
        let Some(sender) = self.pending.remove(id) else {
            tracing::warn!("response for unknown VM request id {id}");
            return;
        };
        let outcome = match error {
            Some(err) => Err(err),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        // The caller may have given up on the request; that is fine.
        let _ = sender.send(outcome);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending sender so waiting callers observe a closed
    /// connection.
    pub fn fail_all(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!("failing {} pending VM requests", self.pending.len());
        }
        self.pending.clear();
    }
}
