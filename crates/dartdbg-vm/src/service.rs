//! The VM service seam and its typed wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::VmError;
use crate::types::{
    Breakpoint, Class, EvalResult, Instance, Isolate, Script, Stack, VmInfo,
};

/// Anything that can answer VM service RPCs.
///
/// The real implementation is [`crate::VmServiceClient`]; tests use
/// `mock::MockVmService`.
#[async_trait]
pub trait VmService: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value, VmError>;

    /// Hang up. Calls made afterwards fail with a closed connection.
    fn close(&self) {}
}

/// `step` argument of `resume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOption {
    Into,
    Over,
    OverAsyncSuspension,
    Out,
}

impl StepOption {
    pub fn as_str(self) -> &'static str {
        match self {
            StepOption::Into => "Into",
            StepOption::Over => "Over",
            StepOption::OverAsyncSuspension => "OverAsyncSuspension",
            StepOption::Out => "Out",
        }
    }
}

/// `exceptionPauseMode` of `setIsolatePauseMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionPauseMode {
    #[default]
    None,
    Unhandled,
    All,
}

impl ExceptionPauseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionPauseMode::None => "None",
            ExceptionPauseMode::Unhandled => "Unhandled",
            ExceptionPauseMode::All => "All",
        }
    }
}

/// Typed calls over a shared [`VmService`].
#[derive(Clone)]
pub struct VmApi {
    service: Arc<dyn VmService>,
}

impl std::fmt::Debug for VmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmApi").finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, VmError> {
    Ok(serde_json::from_value(value)?)
}

impl VmApi {
    pub fn new(service: Arc<dyn VmService>) -> Self {
        Self { service }
    }

    pub fn close(&self) {
        self.service.close();
    }

    /// Untyped escape hatch.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, VmError> {
        self.service.call(method, params).await
    }

    pub async fn get_vm(&self) -> Result<VmInfo, VmError> {
        decode(self.call("getVM", json!({})).await?)
    }

    pub async fn get_isolate(&self, isolate_id: &str) -> Result<Isolate, VmError> {
        decode(self.call("getIsolate", json!({ "isolateId": isolate_id })).await?)
    }

    /// `getStack`, optionally limited to the top `limit` frames.
    pub async fn get_stack(&self, isolate_id: &str, limit: Option<usize>) -> Result<Stack, VmError> {
        let mut params = json!({ "isolateId": isolate_id });
        if let Some(limit) = limit {
            params["limit"] = json!(limit);
        }
        decode(self.call("getStack", params).await?)
    }

    /// `getObject` returning the raw JSON.
    pub async fn get_object(
        &self,
        isolate_id: &str,
        object_id: &str,
        offset: Option<i64>,
        count: Option<i64>,
    ) -> Result<Value, VmError> {
        let mut params = json!({ "isolateId": isolate_id, "objectId": object_id });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        if let Some(count) = count {
            params["count"] = json!(count);
        }
        self.call("getObject", params).await
    }

    pub async fn get_instance(
        &self,
        isolate_id: &str,
        object_id: &str,
        offset: Option<i64>,
        count: Option<i64>,
    ) -> Result<Instance, VmError> {
        let value = self.get_object(isolate_id, object_id, offset, count).await?;
        if value.get("type").and_then(Value::as_str) == Some("Sentinel") {
            return Err(VmError::Protocol(format!("object {object_id} was collected")));
        }
        decode(value)
    }

    pub async fn get_class(&self, isolate_id: &str, class_id: &str) -> Result<Class, VmError> {
        decode(self.get_object(isolate_id, class_id, None, None).await?)
    }

    pub async fn get_script(&self, isolate_id: &str, script_id: &str) -> Result<Script, VmError> {
        decode(self.get_object(isolate_id, script_id, None, None).await?)
    }

    /// `evaluate` against a library, class or instance. Breakpoints are
    /// disabled so that conditions and previews cannot re-enter a pause.
    pub async fn evaluate(
        &self,
        isolate_id: &str,
        target_id: &str,
        expression: &str,
    ) -> Result<EvalResult, VmError> {
        let value = self
            .call(
                "evaluate",
                json!({
                    "isolateId": isolate_id,
                    "targetId": target_id,
                    "expression": expression,
                    "disableBreakpoints": true,
                }),
            )
            .await?;
        EvalResult::from_value(value)
    }

    pub async fn evaluate_in_frame(
        &self,
        isolate_id: &str,
        frame_index: usize,
        expression: &str,
    ) -> Result<EvalResult, VmError> {
        let value = self
            .call(
                "evaluateInFrame",
                json!({
                    "isolateId": isolate_id,
                    "frameIndex": frame_index,
                    "expression": expression,
                    "disableBreakpoints": true,
                }),
            )
            .await?;
        EvalResult::from_value(value)
    }

    /// `invoke` a zero-argument method such as a getter's backing
    /// function or `toString`.
    pub async fn invoke(
        &self,
        isolate_id: &str,
        target_id: &str,
        selector: &str,
    ) -> Result<EvalResult, VmError> {
        let value = self
            .call(
                "invoke",
                json!({
                    "isolateId": isolate_id,
                    "targetId": target_id,
                    "selector": selector,
                    "argumentIds": [],
                    "disableBreakpoints": true,
                }),
            )
            .await?;
        EvalResult::from_value(value)
    }

    pub async fn add_breakpoint_with_script_uri(
        &self,
        isolate_id: &str,
        script_uri: &str,
        line: i64,
        column: Option<i64>,
    ) -> Result<Breakpoint, VmError> {
        let mut params = json!({
            "isolateId": isolate_id,
            "scriptUri": script_uri,
            "line": line,
        });
        if let Some(column) = column {
            params["column"] = json!(column);
        }
        decode(self.call("addBreakpointWithScriptUri", params).await?)
    }

    pub async fn remove_breakpoint(&self, isolate_id: &str, breakpoint_id: &str) -> Result<(), VmError> {
        self.call(
            "removeBreakpoint",
            json!({ "isolateId": isolate_id, "breakpointId": breakpoint_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn resume(&self, isolate_id: &str, step: Option<StepOption>) -> Result<(), VmError> {
        let mut params = json!({ "isolateId": isolate_id });
        if let Some(step) = step {
            params["step"] = json!(step.as_str());
        }
        self.call("resume", params).await?;
        Ok(())
    }

    pub async fn pause(&self, isolate_id: &str) -> Result<(), VmError> {
        self.call("pause", json!({ "isolateId": isolate_id })).await?;
        Ok(())
    }

    pub async fn set_isolate_pause_mode(
        &self,
        isolate_id: &str,
        mode: ExceptionPauseMode,
    ) -> Result<(), VmError> {
        self.call(
            "setIsolatePauseMode",
            json!({ "isolateId": isolate_id, "exceptionPauseMode": mode.as_str() }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_library_debuggable(
        &self,
        isolate_id: &str,
        library_id: &str,
        debuggable: bool,
    ) -> Result<(), VmError> {
        self.call(
            "setLibraryDebuggable",
            json!({
                "isolateId": isolate_id,
                "libraryId": library_id,
                "isDebuggable": debuggable,
            }),
        )
        .await?;
        Ok(())
    }

    /// Map `package:` URIs to the file URIs the VM resolved them to.
    /// Unresolvable entries come back as `None`.
    pub async fn lookup_resolved_package_uris(
        &self,
        isolate_id: &str,
        uris: &[String],
    ) -> Result<Vec<Option<String>>, VmError> {
        let value = self
            .call(
                "lookupResolvedPackageUris",
                json!({ "isolateId": isolate_id, "uris": uris }),
            )
            .await?;
        let list = value
            .get("uris")
            .and_then(Value::as_array)
            .ok_or_else(|| VmError::Protocol("lookupResolvedPackageUris without uris".into()))?;
        Ok(list
            .iter()
            .map(|u| u.as_str().map(str::to_string))
            .collect())
    }

    /// Subscribe to a stream. Already-subscribed streams are not an error.
    pub async fn stream_listen(&self, stream_id: &str) -> Result<(), VmError> {
        match self.call("streamListen", json!({ "streamId": stream_id })).await {
            Ok(_) => Ok(()),
            // 103: stream already subscribed.
            Err(VmError::Rpc { code: 103, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn kill(&self, isolate_id: &str) -> Result<(), VmError> {
        self.call("kill", json!({ "isolateId": isolate_id })).await?;
        Ok(())
    }
}
