//! An in-memory [`VmService`] for tests.
//!
//! Handlers are registered per method; every call is recorded so tests can
//! assert on what the bridge asked the VM to do. A method can be held behind
//! a [`Gate`] to script calls that are still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::VmError;
use crate::service::VmService;

type Handler = Box<dyn Fn(&Value) -> Result<Value, VmError> + Send + Sync>;

/// Holds calls back until opened. Once open it stays open.
#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
    notify: Notify,
}

impl Gate {
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let notified = self.notify.notified();
            if self.open.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// A scripted VM service.
#[derive(Default)]
pub struct MockVmService {
    handlers: Mutex<HashMap<String, Handler>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    calls: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

impl MockVmService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` with `handler`, replacing any previous handler.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.to_string(), Box::new(handler));
    }

    /// Answer `method` with a fixed value.
    pub fn respond(&self, method: &str, value: Value) {
        self.on(method, move |_| Ok(value.clone()));
    }

    /// Hold every call to `method` until the returned gate opens. Calls are
    /// recorded before they wait.
    pub fn hold(&self, method: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(method.to_string(), gate.clone());
        gate
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Params of every call to `method`.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VmService for MockVmService {
    async fn call(&self, method: &str, params: Value) -> Result<Value, VmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((method.to_string(), params.clone()));
        let gate = self
            .gates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(method)
            .cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.is_closed() {
            return Err(VmError::ConnectionClosed);
        }
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        match handlers.get(method) {
            Some(handler) => handler(&params),
            None => Err(VmError::Rpc {
                code: -32601,
                message: format!("Method not found: {method}"),
            }),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{StepOption, VmApi};
    use serde_json::json;

    #[tokio::test]
    async fn records_calls_and_answers() {
        let mock = Arc::new(MockVmService::new());
        mock.respond("resume", json!({"type": "Success"}));
        let api = VmApi::new(mock.clone());

        api.resume("isolates/1", Some(StepOption::Over)).await.unwrap();
        let calls = mock.calls_to("resume");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["step"], "Over");
    }

    #[tokio::test]
    async fn held_calls_wait_for_the_gate() {
        let mock = Arc::new(MockVmService::new());
        mock.respond("getVM", json!({"type": "VM"}));
        let gate = mock.hold("getVM");

        let pending = tokio::spawn({
            let mock = mock.clone();
            async move { mock.call("getVM", json!({})).await }
        });
        while mock.calls_to("getVM").is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        gate.open();
        assert_eq!(pending.await.unwrap().unwrap()["type"], "VM");
        // An open gate lets later calls straight through.
        mock.call("getVM", json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_is_an_rpc_error() {
        let mock = MockVmService::new();
        let err = mock.call("getVM", json!({})).await.unwrap_err();
        assert!(matches!(err, VmError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn stream_listen_tolerates_already_subscribed() {
        let mock = Arc::new(MockVmService::new());
        mock.on("streamListen", |_| {
            Err(VmError::Rpc {
                code: 103,
                message: "Stream already subscribed".into(),
            })
        });
        let api = VmApi::new(mock);
        api.stream_listen("Debug").await.unwrap();
    }

    #[tokio::test]
    async fn unresolved_package_uris_come_back_as_none() {
        let mock = Arc::new(MockVmService::new());
        mock.respond(
            "lookupResolvedPackageUris",
            json!({"type": "UriList", "uris": ["file:///p/lib/a.dart", null]}),
        );
        let api = VmApi::new(mock);
        let uris = api
            .lookup_resolved_package_uris(
                "isolates/1",
                &["package:p/a.dart".to_string(), "package:gone/b.dart".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(uris, vec![Some("file:///p/lib/a.dart".to_string()), None]);
    }

    #[tokio::test]
    async fn typed_stack_decodes() {
        let mock = Arc::new(MockVmService::new());
        mock.respond(
            "getStack",
            json!({"type": "Stack", "frames": [
                {"index": 0, "kind": "Regular", "function": {"id": "f", "name": "main"}}
            ], "truncated": true}),
        );
        let api = VmApi::new(mock.clone());
        let stack = api.get_stack("isolates/1", Some(5)).await.unwrap();
        assert_eq!(stack.frames.len(), 1);
        assert!(stack.truncated);
        assert_eq!(mock.calls_to("getStack")[0]["limit"], 5);
    }
}
