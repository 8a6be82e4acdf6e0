//! Drives a full `DebugAdapter` against a scripted VM service.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dartdbg_dap::protocol::Request;
use dartdbg_dap::{AdapterSettings, DapError, DebugAdapter, VmConnection, VmConnector};
use dartdbg_vm::mock::MockVmService;
use dartdbg_vm::StreamEvent;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const ISOLATE: &str = "isolates/1";
const MAIN: &str = "/app/bin/main.dart";
const MAIN_URI: &str = "file:///app/bin/main.dart";

struct MockConnector {
    service: Arc<MockVmService>,
    events: Mutex<Option<mpsc::UnboundedReceiver<StreamEvent>>>,
    uris: Mutex<Vec<String>>,
}

#[async_trait]
impl VmConnector for MockConnector {
    async fn connect(&self, uri: &str) -> Result<VmConnection, DapError> {
        self.uris.lock().unwrap().push(uri.to_string());
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or(DapError::ConnectionLost)?;
        Ok(VmConnection {
            service: self.service.clone(),
            events,
        })
    }
}

fn isolate_ref() -> Value {
    json!({"type": "@Isolate", "id": ISOLATE, "name": "main", "number": "1"})
}

fn user_frame(index: i64, line: i64) -> Value {
    json!({
        "type": "Frame",
        "index": index,
        "kind": "Regular",
        "function": {
            "type": "@Function", "id": "functions/compute", "name": "compute",
            "owner": {"type": "@Class", "id": "classes/calc", "name": "Calc"}
        },
        "location": {
            "type": "SourceLocation",
            "script": {"type": "@Script", "id": "scripts/1", "uri": MAIN_URI},
            "line": line, "column": 3
        },
        "vars": [{
            "type": "BoundVariable",
            "name": "count",
            "value": {
                "type": "@Instance", "kind": "Int", "id": "objects/int-42",
                "valueAsString": "42", "class": {"type": "@Class", "id": "classes/int", "name": "int"}
            }
        }]
    })
}

fn sdk_frame(index: i64) -> Value {
    json!({
        "type": "Frame",
        "index": index,
        "kind": "Regular",
        "function": {"type": "@Function", "id": "functions/forEach", "name": "forEach"},
        "location": {
            "type": "SourceLocation",
            "script": {"type": "@Script", "id": "scripts/2", "uri": "dart:core/list.dart"},
            "line": 30, "column": 1
        }
    })
}

fn resolved_breakpoint(line: i64) -> Value {
    json!({
        "type": "Breakpoint", "id": "breakpoints/1", "resolved": true,
        "location": {
            "type": "SourceLocation",
            "script": {"type": "@Script", "id": "scripts/1", "uri": MAIN_URI},
            "line": line, "column": 3
        }
    })
}

struct Harness {
    adapter: DebugAdapter,
    out: mpsc::UnboundedReceiver<Value>,
    seen: Vec<Value>,
    vm: Arc<MockVmService>,
    vm_events: mpsc::UnboundedSender<StreamEvent>,
    connector: Arc<MockConnector>,
    seq: i64,
}

impl Harness {
    fn new() -> Self {
        let vm = Arc::new(MockVmService::new());
        for method in [
            "streamListen",
            "setIsolatePauseMode",
            "resume",
            "removeBreakpoint",
            "setLibraryDebuggable",
            "pause",
            "kill",
        ] {
            vm.respond(method, json!({"type": "Success"}));
        }
        vm.respond("getVM", json!({"type": "VM", "isolates": [isolate_ref()]}));
        vm.respond(
            "getIsolate",
            json!({
                "type": "Isolate", "id": ISOLATE, "name": "main", "runnable": true,
                "pauseEvent": {"type": "Event", "kind": "Resume", "isolate": isolate_ref()},
                "rootLib": {"type": "@Library", "id": "libraries/1", "uri": MAIN_URI},
                "libraries": [
                    {"type": "@Library", "id": "libraries/1", "uri": MAIN_URI},
                    {"type": "@Library", "id": "libraries/2", "uri": "dart:core"}
                ]
            }),
        );
        vm.respond(
            "getStack",
            json!({"type": "Stack", "frames": [
                user_frame(0, 7),
                {"type": "Frame", "index": 1, "kind": "AsyncSuspensionMarker"},
                sdk_frame(2)
            ]}),
        );
        vm.respond("addBreakpointWithScriptUri", resolved_breakpoint(7));

        let (vm_events, events_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            service: vm.clone(),
            events: Mutex::new(Some(events_rx)),
            uris: Mutex::new(Vec::new()),
        });
        let (out_tx, out) = mpsc::unbounded_channel();
        let settings = AdapterSettings {
            debug: Default::default(),
            dart_sdk_path: None,
            pub_cache: None,
            cwd: PathBuf::from("/app"),
        };
        let adapter = DebugAdapter::new(settings, out_tx, connector.clone());
        Self {
            adapter,
            out,
            seen: Vec::new(),
            vm,
            vm_events,
            connector,
            seq: 0,
        }
    }

    fn next_request(&mut self, command: &str, arguments: Value) -> Request {
        self.seq += 1;
        Request {
            seq: self.seq,
            message_type: "request".into(),
            command: command.into(),
            arguments: Some(arguments),
        }
    }

    async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let request = self.next_request(command, arguments);
        let seq = request.seq;
        self.adapter.dispatch(request).await;
        self.response_to(seq).await
    }

    async fn response_to(&mut self, seq: i64) -> Value {
        self.wait_for(move |m| m["type"] == "response" && m["request_seq"] == seq)
            .await
    }

    /// Take the first message matching `pred`, waiting for it if needed.
    async fn wait_for(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.seen.iter().position(&pred) {
            return self.seen.remove(pos);
        }
        let out = &mut self.out;
        let seen = &mut self.seen;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let message = out.recv().await.expect("adapter output closed");
                if pred(&message) {
                    return message;
                }
                seen.push(message);
            }
        })
        .await
        .expect("timed out waiting for adapter output")
    }

    async fn event(&mut self, name: &str) -> Value {
        self.wait_for(|m| m["type"] == "event" && m["event"] == name)
            .await
    }

    /// Events named `name` emitted so far, without waiting.
    fn events_named(&mut self, name: &str) -> Vec<Value> {
        while let Ok(message) = self.out.try_recv() {
            self.seen.push(message);
        }
        self.seen
            .iter()
            .filter(|m| m["type"] == "event" && m["event"] == name)
            .cloned()
            .collect()
    }

    async fn wait_for_calls(&self, method: &str, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = self.vm.calls_to(method);
                if calls.len() >= count {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} {method} calls"))
    }

    fn send(&self, stream_id: &str, event: Value) {
        let event = serde_json::from_value(event).expect("valid VM event");
        self.vm_events
            .send(StreamEvent {
                stream_id: stream_id.into(),
                event,
            })
            .expect("VM event loop is running");
    }

    fn send_debug(&self, kind: &str, extra: Value) {
        let mut event = json!({"type": "Event", "kind": kind, "isolate": isolate_ref()});
        if let (Some(target), Value::Object(fields)) = (event.as_object_mut(), extra) {
            target.extend(fields);
        }
        self.send("Debug", event);
    }

    async fn attach(&mut self) {
        let init = self.request("initialize", json!({"adapterID": "dart"})).await;
        assert_eq!(init["success"], true);
        self.event("initialized").await;
        let attach = self
            .request("attach", json!({"vmServiceUri": "http://127.0.0.1:8181/abc=/"}))
            .await;
        assert_eq!(attach["success"], true, "{attach}");
        let done = self.request("configurationDone", json!({})).await;
        assert_eq!(done["success"], true);
        self.event("thread").await;
    }

    async fn set_breakpoint(&mut self, breakpoint: Value) -> i64 {
        let response = self
            .request(
                "setBreakpoints",
                json!({"source": {"path": MAIN}, "breakpoints": [breakpoint]}),
            )
            .await;
        assert_eq!(response["success"], true, "{response}");
        response["body"]["breakpoints"][0]["id"].as_i64().unwrap()
    }

    async fn pause_at_breakpoint(&mut self, extra: Value) -> Value {
        let mut fields = json!({"topFrame": user_frame(0, 7), "pauseBreakpoints": []});
        if let (Some(target), Value::Object(more)) = (fields.as_object_mut(), extra) {
            target.extend(more);
        }
        self.send_debug("PauseBreakpoint", fields);
        self.event("stopped").await
    }

    async fn top_frame_id(&mut self) -> i64 {
        let trace = self
            .request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 1}))
            .await;
        trace["body"]["stackFrames"][0]["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn attach_subscribes_and_configures_running_isolates() {
    let mut h = Harness::new();
    h.attach().await;

    assert_eq!(
        h.connector.uris.lock().unwrap().as_slice(),
        ["http://127.0.0.1:8181/abc=/"]
    );
    let mut streams: Vec<String> = h
        .vm
        .calls_to("streamListen")
        .iter()
        .map(|p| p["streamId"].as_str().unwrap().to_string())
        .collect();
    streams.sort();
    assert_eq!(streams, ["Debug", "Isolate", "Logging", "Stderr", "Stdout"]);

    let modes = h.vm.calls_to("setIsolatePauseMode");
    assert_eq!(modes[0]["exceptionPauseMode"], "Unhandled");

    let debuggable = h.vm.calls_to("setLibraryDebuggable");
    assert_eq!(debuggable.len(), 1);
    assert_eq!(debuggable[0]["libraryId"], "libraries/2");
    assert_eq!(debuggable[0]["isDebuggable"], false);

    let threads = h.request("threads", json!({})).await;
    assert_eq!(threads["body"]["threads"], json!([{"id": 1, "name": "main"}]));
}

#[tokio::test]
async fn breakpoints_set_before_start_are_sent_on_configure() {
    let mut h = Harness::new();
    h.request("initialize", json!({})).await;
    h.request("attach", json!({"vmServiceUri": "ws://127.0.0.1:8181/ws"}))
        .await;
    let id = h.set_breakpoint(json!({"line": 7})).await;
    assert!(h.vm.calls_to("addBreakpointWithScriptUri").is_empty());

    h.request("configurationDone", json!({})).await;
    let added = h.wait_for_calls("addBreakpointWithScriptUri", 1).await;
    assert_eq!(added[0]["scriptUri"], MAIN_URI);
    assert_eq!(added[0]["line"], 7);

    let changed = h.event("breakpoint").await;
    assert_eq!(changed["body"]["reason"], "changed");
    assert_eq!(changed["body"]["breakpoint"]["id"], id);
    assert_eq!(changed["body"]["breakpoint"]["verified"], true);
}

#[tokio::test]
async fn breakpoint_resolution_is_reported() {
    let mut h = Harness::new();
    h.vm.respond(
        "addBreakpointWithScriptUri",
        json!({
            "type": "Breakpoint", "id": "breakpoints/1", "resolved": false,
            "location": {"type": "UnresolvedSourceLocation", "scriptUri": MAIN_URI, "line": 7}
        }),
    );
    h.attach().await;
    let response = h
        .request(
            "setBreakpoints",
            json!({"source": {"path": MAIN}, "breakpoints": [{"line": 7}]}),
        )
        .await;
    let bp = &response["body"]["breakpoints"][0];
    assert_eq!(bp["verified"], false);
    let id = bp["id"].as_i64().unwrap();

    h.send_debug("BreakpointResolved", json!({"breakpoint": resolved_breakpoint(8)}));
    let changed = h.event("breakpoint").await;
    assert_eq!(changed["body"]["breakpoint"]["id"], id);
    assert_eq!(changed["body"]["breakpoint"]["verified"], true);
    assert_eq!(changed["body"]["breakpoint"]["line"], 8);
}

#[tokio::test]
async fn stop_at_breakpoint_and_page_frames() {
    let mut h = Harness::new();
    h.attach().await;
    let id = h.set_breakpoint(json!({"line": 7})).await;

    let stopped = h
        .pause_at_breakpoint(json!({"pauseBreakpoints": [resolved_breakpoint(7)]}))
        .await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 1);
    assert_eq!(stopped["body"]["hitBreakpointIds"], json!([id]));

    let first = h
        .request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 1}))
        .await;
    let frames = first["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["name"], "Calc.compute");
    assert_eq!(frames[0]["line"], 7);
    assert_eq!(first["body"]["totalFrames"], 3);
    assert_eq!(h.vm.calls_to("getStack")[0]["limit"], 21);

    let rest = h
        .request("stackTrace", json!({"threadId": 1, "startFrame": 1, "levels": 2}))
        .await;
    let frames = rest["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames[0]["name"], "<asynchronous gap>");
    assert_eq!(frames[0]["presentationHint"], "label");
    assert_eq!(frames[1]["name"], "forEach");
    assert_eq!(frames[1]["presentationHint"], "subtle");
    assert_eq!(frames[1]["source"]["presentationHint"], "deemphasize");
    assert_eq!(frames[1]["source"]["origin"], "from the Dart SDK");
    assert!(frames[1]["source"]["sourceReference"].as_i64().unwrap() > 0);
    assert_eq!(h.vm.calls_to("getStack").len(), 1);
}

#[tokio::test]
async fn variables_go_stale_after_continue() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    let frame_id = h.top_frame_id().await;
    let scopes = h.request("scopes", json!({"frameId": frame_id})).await;
    let locals = &scopes["body"]["scopes"][0];
    assert_eq!(locals["name"], "Locals");
    let handle = locals["variablesReference"].as_i64().unwrap();

    let vars = h
        .request("variables", json!({"variablesReference": handle}))
        .await;
    assert_eq!(vars["body"]["variables"][0]["name"], "count");
    assert_eq!(vars["body"]["variables"][0]["value"], "42");
    assert_eq!(vars["body"]["variables"][0]["type"], "int");

    let cont = h.request("continue", json!({"threadId": 1})).await;
    assert_eq!(cont["success"], true);
    assert_eq!(cont["body"]["allThreadsContinued"], false);
    assert_eq!(h.vm.calls_to("resume").len(), 1);

    let stale = h
        .request("variables", json!({"variablesReference": handle}))
        .await;
    assert_eq!(stale["success"], false);
    assert!(stale["message"].as_str().unwrap().contains("stale reference"));
}

#[tokio::test]
async fn stack_that_arrives_after_continue_is_dropped() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    let gate = h.vm.hold("getStack");
    let request = h.next_request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 3}));
    let seq = request.seq;
    let adapter = h.adapter.clone();
    let stack = adapter.dispatch(request);
    tokio::pin!(stack);
    tokio::select! {
        _ = &mut stack => panic!("stackTrace answered before the VM replied"),
        _ = h.wait_for_calls("getStack", 1) => {}
    }

    let cont = h.request("continue", json!({"threadId": 1})).await;
    assert_eq!(cont["success"], true);
    gate.open();
    stack.await;

    let late = h.response_to(seq).await;
    assert_eq!(late["success"], true, "{late}");
    assert_eq!(late["body"]["stackFrames"], json!([]));
    assert_eq!(late["body"]["totalFrames"], 0);

    // The late frames were not cached for the next pause.
    h.pause_at_breakpoint(json!({})).await;
    let trace = h
        .request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 3}))
        .await;
    assert_eq!(h.vm.calls_to("getStack").len(), 2);
    assert_eq!(trace["body"]["stackFrames"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn update_debug_options_takes_effect_on_resume() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    let full_stack = json!({"threadId": 1, "startFrame": 0, "levels": 3});
    let before = h.request("stackTrace", full_stack.clone()).await;
    let sdk = &before["body"]["stackFrames"][2]["source"];
    assert_eq!(sdk["origin"], "from the Dart SDK");
    assert_eq!(sdk["presentationHint"], "deemphasize");

    let update = h
        .request("updateDebugOptions", json!({"debugSdkLibraries": true}))
        .await;
    assert_eq!(update["success"], true, "{update}");

    // Frames already handed out for this pause keep their labels.
    let same_pause = h.request("stackTrace", full_stack.clone()).await;
    assert_eq!(same_pause["body"]["stackFrames"][2]["source"]["origin"], "from the Dart SDK");
    assert_eq!(h.vm.calls_to("getStack").len(), 1);

    h.request("continue", json!({"threadId": 1})).await;
    let debuggable = h.vm.calls_to("setLibraryDebuggable");
    assert_eq!(
        debuggable.last().unwrap(),
        &json!({"isolateId": ISOLATE, "libraryId": "libraries/2", "isDebuggable": true})
    );

    h.pause_at_breakpoint(json!({})).await;
    let after = h.request("stackTrace", full_stack).await;
    let sdk = &after["body"]["stackFrames"][2]["source"];
    assert!(sdk["origin"].is_null(), "{sdk}");
    assert!(sdk["presentationHint"].is_null(), "{sdk}");
    assert!(sdk["sourceReference"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn evaluate_name_of_a_truncated_string_gives_the_whole_string() {
    let mut h = Harness::new();
    let full = "a".repeat(300);
    let string_class = json!({"type": "@Class", "id": "classes/String", "name": "String"});
    let truncated = json!({
        "type": "@Instance", "kind": "String", "id": "objects/s",
        "valueAsString": "a".repeat(128), "valueAsStringIsTruncated": true, "length": 300,
        "class": string_class.clone()
    });
    let mut frame = user_frame(0, 7);
    frame["vars"] = json!([{"type": "BoundVariable", "name": "s", "value": truncated.clone()}]);
    h.vm.respond("getStack", json!({"type": "Stack", "frames": [frame]}));
    h.vm.respond("evaluateInFrame", truncated.clone());
    let whole = json!({
        "type": "Instance", "kind": "String", "id": "objects/s",
        "valueAsString": full.clone(), "length": 300, "class": string_class
    });
    h.vm.on("getObject", move |params| match params["objectId"].as_str() {
        Some("objects/s") => Ok(whole.clone()),
        _ => Err(dartdbg_vm::VmError::Rpc {
            code: -32601,
            message: "Method not found: getObject".into(),
        }),
    });
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    let frame_id = h.top_frame_id().await;
    let scopes = h.request("scopes", json!({"frameId": frame_id})).await;
    let handle = scopes["body"]["scopes"][0]["variablesReference"].clone();
    let vars = h
        .request("variables", json!({"variablesReference": handle}))
        .await;
    let s = &vars["body"]["variables"][0];
    assert_eq!(s["evaluateName"], "s");
    let shown = s["value"].as_str().unwrap();
    assert!(shown.ends_with("…\""), "{shown}");

    let expected = format!("\"{full}\"");
    for context in [Some("watch"), Some("hover"), None] {
        let mut arguments = json!({"expression": "s", "frameId": frame_id});
        if let Some(context) = context {
            arguments["context"] = json!(context);
        }
        let result = h.request("evaluate", arguments).await;
        assert_eq!(result["success"], true, "{result}");
        let value = result["body"]["result"].as_str().unwrap();
        assert_eq!(value, expected, "context {context:?}");
        assert!(value.chars().count() > shown.chars().count());
    }
}

#[tokio::test]
async fn false_condition_resumes_without_stopping() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluateInFrame",
        json!({"type": "@Instance", "kind": "Bool", "valueAsString": "false"}),
    );
    h.attach().await;
    h.set_breakpoint(json!({"line": 7, "condition": "count > 100"}))
        .await;

    h.send_debug(
        "PauseBreakpoint",
        json!({"topFrame": user_frame(0, 7), "pauseBreakpoints": [resolved_breakpoint(7)]}),
    );
    h.wait_for_calls("resume", 1).await;
    let evaluated = h.vm.calls_to("evaluateInFrame");
    assert_eq!(evaluated[0]["expression"], "count > 100");
    assert_eq!(evaluated[0]["frameIndex"], 0);
    assert!(h.events_named("stopped").is_empty());
}

#[tokio::test]
async fn failed_condition_is_reported_on_the_console() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluateInFrame",
        json!({"type": "@Error", "kind": "CompilationError", "message": "Undefined name 'nope'"}),
    );
    h.attach().await;
    h.set_breakpoint(json!({"line": 7, "condition": "nope"})).await;

    h.send_debug(
        "PauseBreakpoint",
        json!({"topFrame": user_frame(0, 7), "pauseBreakpoints": [resolved_breakpoint(7)]}),
    );
    let output = h.event("output").await;
    assert_eq!(output["body"]["category"], "console");
    let text = output["body"]["output"].as_str().unwrap();
    assert!(text.contains("`nope`"), "{text}");
    assert!(text.contains("Undefined name 'nope'"), "{text}");
}

#[tokio::test]
async fn logpoint_prints_and_continues() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluateInFrame",
        json!({"type": "@Instance", "kind": "Int", "valueAsString": "42"}),
    );
    h.attach().await;
    h.set_breakpoint(json!({"line": 7, "logMessage": "count is {count}"}))
        .await;

    h.send_debug(
        "PauseBreakpoint",
        json!({"topFrame": user_frame(0, 7), "pauseBreakpoints": [resolved_breakpoint(7)]}),
    );
    let output = h.event("output").await;
    assert_eq!(output["body"]["output"], "count is 42\n");
    h.wait_for_calls("resume", 1).await;
    assert!(h.events_named("stopped").is_empty());
}

#[tokio::test]
async fn evaluate_errors_depend_on_context() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluateInFrame",
        json!({"type": "@Error", "kind": "CompilationError", "message": "Undefined name 'nope'"}),
    );
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;
    let frame_id = h.top_frame_id().await;

    let watch = h
        .request(
            "evaluate",
            json!({"expression": "nope", "frameId": frame_id, "context": "watch"}),
        )
        .await;
    assert_eq!(watch["success"], false);
    assert_eq!(watch["message"], "not available");

    let repl = h
        .request(
            "evaluate",
            json!({"expression": "nope", "frameId": frame_id, "context": "repl"}),
        )
        .await;
    assert_eq!(repl["success"], false);
    assert_eq!(repl["message"], "Undefined name 'nope'");
}

#[tokio::test]
async fn evaluate_without_frame_uses_root_library() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluate",
        json!({"type": "@Instance", "kind": "String", "valueAsString": "hi"}),
    );
    h.attach().await;

    let result = h
        .request("evaluate", json!({"expression": "greeting", "context": "repl"}))
        .await;
    assert_eq!(result["success"], true, "{result}");
    assert_eq!(result["body"]["result"], "\"hi\"");
    assert_eq!(h.vm.calls_to("evaluate")[0]["targetId"], "libraries/1");
}

#[tokio::test]
async fn exception_scope_and_dollar_e() {
    let mut h = Harness::new();
    h.vm.respond(
        "evaluate",
        json!({"type": "@Instance", "kind": "String", "valueAsString": "boom"}),
    );
    h.attach().await;

    h.send_debug(
        "PauseException",
        json!({
            "topFrame": user_frame(0, 7),
            "exception": {
                "type": "@Instance", "kind": "PlainInstance", "id": "objects/9",
                "class": {"type": "@Class", "id": "classes/5", "name": "StateError"}
            }
        }),
    );
    let stopped = h.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "exception");
    assert_eq!(stopped["body"]["text"], "StateError");

    let frame_id = h.top_frame_id().await;
    let scopes = h.request("scopes", json!({"frameId": frame_id})).await;
    let scopes = scopes["body"]["scopes"].as_array().unwrap().clone();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[1]["name"], "Exception");

    let exception = h
        .request(
            "variables",
            json!({"variablesReference": scopes[1]["variablesReference"]}),
        )
        .await;
    let dollar_e = &exception["body"]["variables"][0];
    assert_eq!(dollar_e["name"], "$e");
    assert_eq!(dollar_e["value"], "StateError");
    assert!(dollar_e["variablesReference"].as_i64().unwrap() > 0);

    let message = h
        .request(
            "evaluate",
            json!({"expression": "$e.message", "frameId": frame_id, "context": "watch"}),
        )
        .await;
    assert_eq!(message["body"]["result"], "\"boom\"");
    let calls = h.vm.calls_to("evaluate");
    assert_eq!(calls[0]["targetId"], "objects/9");
    assert_eq!(calls[0]["expression"], "this.message");
}

#[tokio::test]
async fn step_into_sdk_code_steps_back_out() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    let step = h.request("stepIn", json!({"threadId": 1})).await;
    assert_eq!(step["success"], true);
    assert_eq!(h.vm.calls_to("resume")[0]["step"], "Into");

    h.send_debug("PauseInterrupted", json!({"topFrame": sdk_frame(0)}));
    let resumes = h.wait_for_calls("resume", 2).await;
    assert_eq!(resumes[1]["step"], "Out");
    assert!(h.events_named("stopped").is_empty());

    h.send_debug("PauseInterrupted", json!({"topFrame": user_frame(0, 8)}));
    let stopped = h.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
}

#[tokio::test]
async fn next_at_async_suspension_steps_over_it() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({"atAsyncSuspension": true}))
        .await;

    h.request("next", json!({"threadId": 1})).await;
    assert_eq!(h.vm.calls_to("resume")[0]["step"], "OverAsyncSuspension");
}

#[tokio::test]
async fn pause_request_reports_pause_reason() {
    let mut h = Harness::new();
    h.attach().await;
    let response = h.request("pause", json!({"threadId": 1})).await;
    assert_eq!(response["success"], true);
    assert_eq!(h.vm.calls_to("pause")[0]["isolateId"], ISOLATE);

    h.send_debug("PauseInterrupted", json!({"topFrame": user_frame(0, 7)}));
    let stopped = h.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "pause");
}

#[tokio::test]
async fn exception_filters_change_pause_mode() {
    let mut h = Harness::new();
    h.attach().await;
    h.request("setExceptionBreakpoints", json!({"filters": ["All"]}))
        .await;
    let modes = h.vm.calls_to("setIsolatePauseMode");
    assert_eq!(modes.last().unwrap()["exceptionPauseMode"], "All");

    h.request("setExceptionBreakpoints", json!({"filters": []}))
        .await;
    let modes = h.vm.calls_to("setIsolatePauseMode");
    assert_eq!(modes.last().unwrap()["exceptionPauseMode"], "None");
}

#[tokio::test]
async fn output_and_log_records_reach_the_console() {
    let mut h = Harness::new();
    h.attach().await;

    h.send(
        "Stdout",
        json!({"type": "Event", "kind": "WriteEvent", "isolate": isolate_ref(), "bytes": "aGkK"}),
    );
    let stdout = h.event("output").await;
    assert_eq!(stdout["body"]["category"], "stdout");
    assert_eq!(stdout["body"]["output"], "hi\n");

    h.send(
        "Logging",
        json!({
            "type": "Event", "kind": "Logging", "isolate": isolate_ref(),
            "logRecord": {
                "message": {"type": "@Instance", "kind": "String", "valueAsString": "connected"},
                "loggerName": {"type": "@Instance", "kind": "String", "valueAsString": "net"},
                "level": 800
            }
        }),
    );
    let log = h.event("output").await;
    assert_eq!(log["body"]["category"], "console");
    assert_eq!(log["body"]["output"], "[net] connected\n");
}

#[tokio::test]
async fn resume_and_exit_events_update_threads() {
    let mut h = Harness::new();
    h.attach().await;
    h.pause_at_breakpoint(json!({})).await;

    h.send_debug("Resume", json!({}));
    let continued = h.event("continued").await;
    assert_eq!(continued["body"]["threadId"], 1);

    h.send_debug("IsolateExit", json!({}));
    let exited = h.event("thread").await;
    assert_eq!(exited["body"]["reason"], "exited");
    let threads = h.request("threads", json!({})).await;
    assert_eq!(threads["body"]["threads"], json!([]));
}

#[tokio::test]
async fn disconnect_leaves_attached_process_running() {
    let mut h = Harness::new();
    h.attach().await;
    h.set_breakpoint(json!({"line": 7})).await;
    h.pause_at_breakpoint(json!({})).await;

    let response = h.request("disconnect", json!({})).await;
    assert_eq!(response["success"], true);
    h.event("terminated").await;

    assert_eq!(h.vm.calls_to("removeBreakpoint")[0]["breakpointId"], "breakpoints/1");
    let modes = h.vm.calls_to("setIsolatePauseMode");
    assert_eq!(modes.last().unwrap()["exceptionPauseMode"], "None");
    assert_eq!(h.vm.calls_to("resume").len(), 1);
    assert!(h.vm.calls_to("kill").is_empty());
    assert!(h.adapter.is_disconnected());
    assert!(h.vm.is_closed());
}

#[tokio::test]
async fn lost_connection_terminates_attach_session() {
    let mut h = Harness::new();
    h.attach().await;
    let (replacement, _) = mpsc::unbounded_channel();
    h.vm_events = replacement;
    h.event("terminated").await;
}

#[tokio::test]
async fn attach_requires_a_vm_service_uri() {
    let mut h = Harness::new();
    h.request("initialize", json!({})).await;
    let response = h.request("attach", json!({})).await;
    assert_eq!(response["success"], false);
    assert!(response["message"].as_str().unwrap().contains("vmServiceUri"));
}

#[tokio::test]
async fn launch_requires_an_existing_program() {
    let mut h = Harness::new();
    h.request("initialize", json!({})).await;
    let response = h
        .request("launch", json!({"program": "/definitely/not/here.dart"}))
        .await;
    assert_eq!(response["success"], false);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("program does not exist"));
}

#[tokio::test]
async fn inspection_requires_a_pause() {
    let mut h = Harness::new();
    h.attach().await;
    let response = h
        .request("stackTrace", json!({"threadId": 1, "startFrame": 0, "levels": 20}))
        .await;
    assert_eq!(response["success"], false);
    assert!(response["message"].as_str().unwrap().contains("not paused"));
}
