//! DAP protocol message types, adapter side.
//!
//! Requests are deserialized from the editor; responses and events are
//! serialized back. Field names follow the DAP JSON schema via serde
//! `camelCase` renaming.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Base protocol messages
// ---------------------------------------------------------------------------

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number.
    pub seq: i64,
    /// Always "request".
    #[serde(rename = "type")]
    pub message_type: String,
    /// The command to execute.
    pub command: String,
    /// Command arguments (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number.
    pub seq: i64,
    /// Always "response".
    #[serde(rename = "type")]
    pub message_type: String,
    /// Sequence number of the corresponding request.
    pub request_seq: i64,
    /// Whether the request was successful.
    pub success: bool,
    /// The command this response is for.
    pub command: String,
    /// Error message if `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response body (command-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// A successful response to `request`. `seq` is filled in on send.
    pub fn success(request: &Request, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            message_type: "response".into(),
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    /// A failed response carrying `message` for the user.
    pub fn error(request: &Request, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            seq: 0,
            message_type: "response".into(),
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            body: Some(serde_json::json!({
                "error": { "id": 1, "format": message, "showUser": false }
            })),
            message: Some(message),
        }
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number.
    pub seq: i64,
    /// Always "event".
    #[serde(rename = "type")]
    pub message_type: String,
    /// The event type.
    pub event: String,
    /// Event body (event-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Event {
    pub fn new(event: &str, body: Option<Value>) -> Self {
        Self {
            seq: 0,
            message_type: "event".into(),
            event: event.to_string(),
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Session setup
// ---------------------------------------------------------------------------

/// Arguments for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArguments {
    #[serde(default, rename = "clientID")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default, rename = "adapterID")]
    pub adapter_id: Option<String>,
    /// Whether lines are 1-based. Defaults to true.
    #[serde(default)]
    pub lines_start_at1: Option<bool>,
    /// Whether columns are 1-based. Defaults to true.
    #[serde(default)]
    pub columns_start_at1: Option<bool>,
    #[serde(default)]
    pub supports_variable_type: Option<bool>,
    #[serde(default)]
    pub supports_variable_paging: Option<bool>,
}

/// One entry in `exceptionBreakpointFilters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionBreakpointsFilter {
    pub filter: String,
    pub label: String,
    #[serde(default)]
    pub default: bool,
}

/// Capabilities the adapter advertises in the `initialize` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supports_configuration_done_request: bool,
    pub supports_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_evaluate_for_hovers: bool,
    pub supports_delayed_stack_trace_loading: bool,
    pub supports_terminate_request: bool,
    pub supports_loaded_sources_request: bool,
    pub supports_clipboard_context: bool,
    pub exception_breakpoint_filters: Vec<ExceptionBreakpointsFilter>,
}

/// Debug options shared by `launch`, `attach` and `updateDebugOptions`.
/// Unset fields fall back to the configuration file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugOptionArguments {
    #[serde(default)]
    pub debug_sdk_libraries: Option<bool>,
    #[serde(default)]
    pub debug_external_libraries: Option<bool>,
    #[serde(default)]
    pub evaluate_getters_in_debug_views: Option<bool>,
    #[serde(default)]
    pub evaluate_to_string_in_debug_views: Option<bool>,
}

/// Arguments for the `launch` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequestArguments {
    /// Run without attaching the debugger.
    #[serde(default)]
    pub no_debug: Option<bool>,
    /// The Dart script to run.
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Arguments passed to the `dart` executable before the program.
    #[serde(default)]
    pub tool_args: Option<Vec<String>>,
    /// Working directory for the debuggee.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// Stop at the first line of `main`.
    #[serde(default)]
    pub stop_on_entry: Option<bool>,
    /// Override the Dart SDK used for the launch.
    #[serde(default)]
    pub dart_sdk_path: Option<String>,
    #[serde(flatten)]
    pub options: DebugOptionArguments,
}

/// Arguments for the `attach` request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachRequestArguments {
    /// VM service URI of the running process (http or ws form).
    #[serde(default)]
    pub vm_service_uri: Option<String>,
    /// Project root used to classify package sources.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(flatten)]
    pub options: DebugOptionArguments,
}

// ---------------------------------------------------------------------------
// Breakpoints
// ---------------------------------------------------------------------------

/// Arguments for the `setBreakpoints` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    /// The source to set breakpoints for.
    pub source: Source,
    /// Breakpoints to set (replaces all previous ones).
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
}

/// A source breakpoint as the editor sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// The source line of the breakpoint.
    pub line: i64,
    #[serde(default)]
    pub column: Option<i64>,
    /// Condition expression; the breakpoint stops only when it is `true`.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_condition: Option<String>,
    /// Logpoint template with `{expr}` / `${expr}` interpolations.
    #[serde(default)]
    pub log_message: Option<String>,
}

/// A breakpoint as reported back to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the VM resolved the breakpoint to a location.
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Response body for `setBreakpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

/// Arguments for `setExceptionBreakpoints`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SetExceptionBreakpointsArguments {
    #[serde(default)]
    pub filters: Vec<String>,
}

// ---------------------------------------------------------------------------
// Flow control
// ---------------------------------------------------------------------------

/// Arguments carrying only a thread id: `continue`, `next`, `stepIn`,
/// `stepOut`, `pause`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i64,
}

/// Response body for `continue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseBody {
    pub all_threads_continued: bool,
}

/// Arguments for `disconnect`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(default)]
    pub restart: Option<bool>,
    #[serde(default)]
    pub terminate_debuggee: Option<bool>,
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// A thread; one per isolate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// Response body for `threads`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

/// Arguments for `stackTrace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    /// Index of the first frame to return; defaults to 0.
    #[serde(default)]
    pub start_frame: Option<i64>,
    /// Maximum frames to return; 0 or absent means all.
    #[serde(default)]
    pub levels: Option<i64>,
}

/// A stack frame in the call stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub line: i64,
    pub column: i64,
    /// `normal`, `label` or `subtle`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
}

/// Response body for `stackTrace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    pub total_frames: i64,
}

/// A source location.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File system path, when the source exists on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Handle for content fetched through the `source` request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
    /// `deemphasize` for SDK and package frames the user is not debugging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
    /// Why the source is deemphasized, e.g. "from the Dart SDK".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Arguments for `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    #[serde(default)]
    pub source: Option<Source>,
    pub source_reference: i64,
}

/// Response body for `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponseBody {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Arguments for `scopes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

/// A scope (container for variables).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// "Locals" or "Exception".
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_hint: Option<String>,
}

/// Response body for `scopes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

/// Arguments for `variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
    /// First child to return (paged lists).
    #[serde(default)]
    pub start: Option<i64>,
    /// Number of children; absent means all.
    #[serde(default)]
    pub count: Option<i64>,
}

/// A variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<String>,
    /// Expression that reproduces this value when evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
    /// Non-zero when the variable has children.
    pub variables_reference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<i64>,
}

/// Response body for `variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    pub variables: Vec<Variable>,
}

// ---------------------------------------------------------------------------
// Evaluate
// ---------------------------------------------------------------------------

/// Where an `evaluate` request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluateContext {
    /// Debug console; errors are shown verbatim.
    Repl,
    /// Watch panel; errors collapse to "not available".
    #[default]
    Watch,
    Hover,
    Clipboard,
    #[serde(other)]
    Other,
}

impl EvaluateContext {
    /// Whether a failed evaluation should show the full error.
    pub fn shows_full_errors(self) -> bool {
        matches!(self, EvaluateContext::Repl | EvaluateContext::Clipboard)
    }
}

/// Arguments for the `evaluate` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    /// Stack frame in whose context to evaluate; absent means the root
    /// library of the first isolate.
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub context: Option<EvaluateContext>,
}

/// Response body for `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    pub variables_reference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_variables: Option<i64>,
}

// ---------------------------------------------------------------------------
// Event bodies
// ---------------------------------------------------------------------------

/// Reason why the debuggee stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Step,
    Breakpoint,
    Exception,
    Pause,
    Entry,
}

/// Body of the `stopped` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub thread_id: i64,
    pub all_threads_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// DAP ids of the breakpoints that caused the stop.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hit_breakpoint_ids: Vec<i64>,
}

/// Output categories used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

/// Body of the `output` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    pub category: OutputCategory,
    pub output: String,
    /// Set when the output is an inspectable object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_reference: Option<i64>,
}

/// Body of the `thread` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    /// `started` or `exited`.
    pub reason: String,
    pub thread_id: i64,
}

/// Body of the `continued` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuedEventBody {
    pub thread_id: i64,
    pub all_threads_continued: bool,
}

/// Body of the `breakpoint` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointEventBody {
    /// `changed`, `new` or `removed`.
    pub reason: String,
    pub breakpoint: Breakpoint,
}

/// Body of the `exited` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_arguments() {
        let req: Request =
            serde_json::from_value(json!({"seq": 4, "type": "request", "command": "threads"}))
                .unwrap();
        assert_eq!(req.command, "threads");
        assert!(req.arguments.is_none());
    }

    #[test]
    fn error_response_carries_message_twice() {
        let req = Request {
            seq: 9,
            message_type: "request".into(),
            command: "evaluate".into(),
            arguments: None,
        };
        let resp = Response::error(&req, "not available");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["request_seq"], 9);
        assert_eq!(value["message"], "not available");
        assert_eq!(value["body"]["error"]["format"], "not available");
    }

    #[test]
    fn launch_arguments_flatten_debug_options() {
        let args: LaunchRequestArguments = serde_json::from_value(json!({
            "program": "bin/main.dart",
            "toolArgs": ["--enable-asserts"],
            "stopOnEntry": true,
            "debugSdkLibraries": true,
            "env": {"FOO": "1"}
        }))
        .unwrap();
        assert_eq!(args.program.as_deref(), Some("bin/main.dart"));
        assert_eq!(args.tool_args.unwrap(), vec!["--enable-asserts"]);
        assert_eq!(args.options.debug_sdk_libraries, Some(true));
        assert_eq!(args.options.debug_external_libraries, None);
        assert_eq!(args.env.unwrap()["FOO"], "1");
    }

    #[test]
    fn source_skips_empty_fields() {
        let source = Source {
            name: Some("list.dart".into()),
            source_reference: Some(3),
            presentation_hint: Some("deemphasize".into()),
            origin: Some("from the Dart SDK".into()),
            ..Default::default()
        };
        let value = serde_json::to_value(&source).unwrap();
        assert!(value.get("path").is_none());
        assert_eq!(value["sourceReference"], 3);
        assert_eq!(value["presentationHint"], "deemphasize");
    }

    #[test]
    fn evaluate_context_parsing() {
        let args: EvaluateArguments =
            serde_json::from_value(json!({"expression": "x", "context": "repl"})).unwrap();
        assert_eq!(args.context, Some(EvaluateContext::Repl));
        assert!(EvaluateContext::Repl.shows_full_errors());
        assert!(!EvaluateContext::Watch.shows_full_errors());

        let args: EvaluateArguments =
            serde_json::from_value(json!({"expression": "x", "context": "variables"})).unwrap();
        assert_eq!(args.context, Some(EvaluateContext::Other));
    }

    #[test]
    fn stopped_event_serializes_reason() {
        let body = StoppedEventBody {
            reason: StopReason::Breakpoint,
            description: None,
            thread_id: 1,
            all_threads_stopped: false,
            text: None,
            hit_breakpoint_ids: vec![2],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["reason"], "breakpoint");
        assert_eq!(value["threadId"], 1);
        assert_eq!(value["hitBreakpointIds"], json!([2]));
    }

    #[test]
    fn variable_type_field_name() {
        let var = Variable {
            name: "count".into(),
            value: "42".into(),
            variable_type: Some("int".into()),
            evaluate_name: Some("count".into()),
            variables_reference: 0,
            indexed_variables: None,
        };
        let value = serde_json::to_value(&var).unwrap();
        assert_eq!(value["type"], "int");
        assert_eq!(value["evaluateName"], "count");
        assert!(value.get("indexedVariables").is_none());
    }
}
