//! The debug adapter: DAP requests in, VM service calls out.
//!
//! Requests are handled one at a time. VM events arrive on a separate task
//! (see `vm_events`), so shared state lives behind one async mutex that is
//! never held across a VM call: handlers lock, copy what they need, unlock,
//! await the VM, then re-lock and check the isolate's generation before
//! using the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dartdbg_config::{Config, DebugConfig};
use dartdbg_platform::{find_dart_sdk, pub_cache_dir};
use dartdbg_vm::{
    websocket_uri, EvalResult, ExceptionPauseMode, Frame, Script, StepOption, StreamEvent, VmApi,
    VmService, VmServiceClient,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::breakpoint::{Breakpoint, BreakpointManager};
use crate::capabilities::{adapter_capabilities, pause_mode_for_filters};
use crate::classifier::{classify, is_debuggable, source_kind, DebugOptions, SourceKind};
use crate::error::DapError;
use crate::frames::FetchPlan;
use crate::handles::HandleTable;
use crate::isolates::IsolateTable;
use crate::launch::{self, LaunchPlan, LaunchedProcess, ProcessEvent};
use crate::packages::PackageMap;
use crate::protocol::{
    self, AttachRequestArguments, ContinueResponseBody, DebugOptionArguments, DisconnectArguments,
    EvaluateArguments, EvaluateResponseBody, Event, ExitedEventBody,
    InitializeRequestArguments, LaunchRequestArguments, OutputCategory, OutputEventBody, Request,
    Response, Scope, ScopesArguments, ScopesResponseBody, SetBreakpointsArguments,
    SetBreakpointsResponseBody, SetExceptionBreakpointsArguments, SourceArguments,
    SourceResponseBody, StackFrame, StackTraceArguments, StackTraceResponseBody, ThreadArguments,
    ThreadsResponseBody, VariablesArguments, VariablesResponseBody,
};
use crate::session::{DapSession, SessionMode, SessionState};
use crate::source::{fetch_source, SourceLookup, SourceResolver};
use crate::variables::{Expander, FormatOptions, VariableRef};

/// Streams the bridge subscribes to after connecting.
const STREAMS: [&str; 5] = ["Debug", "Isolate", "Stdout", "Stderr", "Logging"];

/// Adapter-wide settings taken from the configuration file.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub debug: DebugConfig,
    pub dart_sdk_path: Option<PathBuf>,
    pub pub_cache: Option<PathBuf>,
    /// Fallback working directory for launch and package lookup.
    pub cwd: PathBuf,
}

impl AdapterSettings {
    pub fn from_config(config: &Config, cwd: PathBuf) -> Self {
        Self {
            debug: config.debug.clone(),
            dart_sdk_path: config.sdk.dart_sdk_path.clone(),
            pub_cache: config.sdk.pub_cache.clone().or_else(pub_cache_dir),
            cwd,
        }
    }
}

/// A live VM service connection.
pub struct VmConnection {
    pub service: Arc<dyn VmService>,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

/// Opens VM service connections.
#[async_trait]
pub trait VmConnector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<VmConnection, DapError>;
}

/// Connects over a WebSocket.
#[derive(Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl VmConnector for WebSocketConnector {
    async fn connect(&self, uri: &str) -> Result<VmConnection, DapError> {
        let (client, events) = VmServiceClient::connect(uri).await?;
        Ok(VmConnection {
            service: Arc::new(client),
            events,
        })
    }
}

/// A frame id's target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameRef {
    pub(crate) frame_index: usize,
    pub(crate) is_marker: bool,
}

/// Session state shared by request handlers and the VM event task.
pub(crate) struct SessionInner {
    pub(crate) session: DapSession,
    pub(crate) api: Option<VmApi>,
    pub(crate) options: DebugOptions,
    pub(crate) format: FormatOptions,
    pub(crate) show_log_output: bool,
    pub(crate) launch: Option<LaunchPlan>,
    pub(crate) attach_uri: Option<String>,
    pub(crate) stop_on_entry: bool,
    pub(crate) exception_mode: ExceptionPauseMode,
    pub(crate) breakpoints: BreakpointManager,
    pub(crate) isolates: IsolateTable,
    pub(crate) frames: HandleTable<FrameRef>,
    pub(crate) variables: HandleTable<VariableRef>,
    pub(crate) sources: SourceResolver,
    pub(crate) packages: PackageMap,
    /// Scripts fetched for their token position tables.
    pub(crate) scripts: HashMap<(String, String), Script>,
}

impl SessionInner {
    fn new(settings: &AdapterSettings) -> Self {
        Self {
            session: DapSession::new(),
            api: None,
            options: DebugOptions {
                debug_sdk_libraries: settings.debug.debug_sdk_libraries,
                debug_external_libraries: settings.debug.debug_external_libraries,
            },
            format: FormatOptions::from(&settings.debug),
            show_log_output: settings.debug.show_log_output,
            launch: None,
            attach_uri: None,
            stop_on_entry: false,
            exception_mode: ExceptionPauseMode::Unhandled,
            breakpoints: BreakpointManager::new(),
            isolates: IsolateTable::new(),
            frames: HandleTable::new(),
            variables: HandleTable::new(),
            sources: SourceResolver::new(),
            packages: PackageMap::new(settings.pub_cache.clone()),
            scripts: HashMap::new(),
        }
    }

    fn apply_option_overrides(&mut self, args: &DebugOptionArguments) {
        if let Some(value) = args.debug_sdk_libraries {
            self.options.debug_sdk_libraries = value;
        }
        if let Some(value) = args.debug_external_libraries {
            self.options.debug_external_libraries = value;
        }
        if let Some(value) = args.evaluate_getters_in_debug_views {
            self.format.evaluate_getters = value;
        }
        if let Some(value) = args.evaluate_to_string_in_debug_views {
            self.format.evaluate_to_string = value;
        }
    }

    pub(crate) fn require_api(&self) -> Result<VmApi, DapError> {
        self.api
            .clone()
            .ok_or_else(|| DapError::rejected("not connected to the VM service"))
    }

    pub(crate) fn configured_isolates(&self) -> Vec<String> {
        self.isolates
            .ids()
            .into_iter()
            .filter(|id| self.isolates.get(id).is_some_and(|i| i.configured))
            .collect()
    }

    pub(crate) fn generation_of(&self, isolate_id: &str) -> Option<u64> {
        self.isolates.get(isolate_id).map(|i| i.generation)
    }

    /// Leave the pause of `isolate_id` and drop every handle it issued.
    pub(crate) fn mark_resumed(&mut self, isolate_id: &str) -> bool {
        let was_paused = self
            .isolates
            .get_mut(isolate_id)
            .is_some_and(|iso| iso.mark_resumed());
        self.frames.invalidate_isolate(isolate_id);
        self.variables.invalidate_isolate(isolate_id);
        let any_paused = self.isolates.any_paused();
        self.session.handle_resumed(any_paused);
        was_paused
    }

    fn convert_frame(&mut self, isolate_id: &str, index: usize, frame: &Frame) -> StackFrame {
        if frame.is_async_suspension_marker() {
            let id = self.frames.insert(
                isolate_id,
                FrameRef {
                    frame_index: index,
                    is_marker: true,
                },
            );
            return StackFrame {
                id,
                name: "<asynchronous gap>".into(),
                source: None,
                line: 0,
                column: 0,
                presentation_hint: Some("label".into()),
            };
        }
        let id = self.frames.insert(
            isolate_id,
            FrameRef {
                frame_index: index,
                is_marker: false,
            },
        );
        let name = frame.display_name();
        let Some(location) = &frame.location else {
            return StackFrame {
                id,
                name,
                source: None,
                line: 0,
                column: 0,
                presentation_hint: Some("subtle".into()),
            };
        };
        let script = &location.script;
        let classification = classify(source_kind(&script.uri, &self.packages), self.options);
        let resolved = self
            .sources
            .resolve(&script.uri, isolate_id, &script.id, &self.packages);
        let (line, column) = match location.line {
            Some(line) => (line, location.column.unwrap_or(1)),
            None => location
                .token_pos
                .and_then(|pos| {
                    self.scripts
                        .get(&(isolate_id.to_string(), script.id.clone()))
                        .and_then(|s| s.line_and_column(pos))
                })
                .unwrap_or((0, 0)),
        };
        StackFrame {
            id,
            name,
            source: Some(resolved.to_dap(classification)),
            line,
            column,
            presentation_hint: classification
                .is_deemphasized()
                .then(|| "subtle".to_string()),
        }
    }
}

/// What to do after the response has been sent.
enum FollowUp {
    Nothing,
    Initialized,
    Start,
    Terminate,
}

struct Reply {
    body: Option<Value>,
    follow_up: FollowUp,
}

impl Reply {
    fn empty() -> Self {
        Self {
            body: None,
            follow_up: FollowUp::Nothing,
        }
    }

    fn body<T: Serialize>(body: &T) -> Result<Self, DapError> {
        let body = serde_json::to_value(body).map_err(|e| DapError::Transport(e.to_string()))?;
        Ok(Self {
            body: Some(body),
            follow_up: FollowUp::Nothing,
        })
    }

    fn then(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = follow_up;
        self
    }
}

fn parse_args<T: DeserializeOwned>(request: &Request) -> Result<T, DapError> {
    let value = request
        .arguments
        .clone()
        .unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value)
        .map_err(|e| DapError::rejected(format!("invalid {} arguments: {e}", request.command)))
}

fn evaluation_message(err: &DapError) -> String {
    match err {
        DapError::Vm(dartdbg_vm::VmError::Rpc { message, .. }) => message.clone(),
        other => other.to_string(),
    }
}

/// One debug session, driven by DAP requests.
#[derive(Clone)]
pub struct DebugAdapter {
    pub(crate) inner: Arc<Mutex<SessionInner>>,
    out: mpsc::UnboundedSender<Value>,
    connector: Arc<dyn VmConnector>,
    settings: Arc<AdapterSettings>,
    /// Stops the VM event task and pending stream subscriptions.
    pub(crate) shutdown: CancellationToken,
    /// Kills a launched debuggee.
    kill: CancellationToken,
    disconnected: Arc<AtomicBool>,
}

impl DebugAdapter {
    /// Create an adapter that writes responses and events to `out`.
    pub fn new(
        settings: AdapterSettings,
        out: mpsc::UnboundedSender<Value>,
        connector: Arc<dyn VmConnector>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner::new(&settings))),
            out,
            connector,
            settings: Arc::new(settings),
            shutdown: CancellationToken::new(),
            kill: CancellationToken::new(),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The editor sent `disconnect`; the server loop should stop.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.session.state()
    }

    fn emit<T: Serialize>(&self, message: &T) {
        match serde_json::to_value(message) {
            Ok(value) => {
                if self.out.send(value).is_err() {
                    tracing::debug!("DAP output closed; dropping message");
                }
            }
            Err(e) => tracing::error!("unserializable DAP message: {e}"),
        }
    }

    pub(crate) fn send_event<T: Serialize>(&self, name: &str, body: Option<&T>) {
        let body = body.and_then(|b| serde_json::to_value(b).ok());
        self.emit(&Event::new(name, body));
    }

    pub(crate) fn output(&self, category: OutputCategory, output: impl Into<String>) {
        self.send_event(
            "output",
            Some(&OutputEventBody {
                category,
                output: output.into(),
                variables_reference: None,
            }),
        );
    }

    /// Handle one request: send its response, then any follow-up events.
    pub async fn dispatch(&self, request: Request) {
        tracing::debug!(seq = request.seq, "DAP request {}", request.command);
        let result = match request.command.as_str() {
            "initialize" => self.initialize(&request).await,
            "launch" => self.launch(&request).await,
            "attach" => self.attach(&request).await,
            "configurationDone" => self.configuration_done().await,
            "setBreakpoints" => self.set_breakpoints(&request).await,
            "setExceptionBreakpoints" => self.set_exception_breakpoints(&request).await,
            "threads" => self.threads().await,
            "stackTrace" => self.stack_trace(&request).await,
            "scopes" => self.scopes(&request).await,
            "variables" => self.variables(&request).await,
            "evaluate" => self.evaluate(&request).await,
            "continue" => self.resume_request(&request, None).await,
            "next" => self.resume_request(&request, Some(StepOption::Over)).await,
            "stepIn" => self.resume_request(&request, Some(StepOption::Into)).await,
            "stepOut" => self.resume_request(&request, Some(StepOption::Out)).await,
            "pause" => self.pause(&request).await,
            "source" => self.source(&request).await,
            "updateDebugOptions" => self.update_debug_options(&request).await,
            "terminate" => self.terminate().await,
            "disconnect" => self.disconnect(&request).await,
            other => Err(DapError::rejected(format!("unsupported request: {other}"))),
        };
        match result {
            Ok(reply) => {
                self.emit(&Response::success(&request, reply.body));
                match reply.follow_up {
                    FollowUp::Nothing => {}
                    FollowUp::Initialized => self.send_event::<Value>("initialized", None),
                    FollowUp::Start => self.start().await,
                    FollowUp::Terminate => self.terminate_session().await,
                }
            }
            Err(err) => {
                tracing::debug!("{} failed: {err}", request.command);
                self.emit(&Response::error(&request, err.to_string()));
            }
        }
    }

    // -----------------------------------------------------------------
    // Session setup
    // -----------------------------------------------------------------

    async fn initialize(&self, request: &Request) -> Result<Reply, DapError> {
        let args: InitializeRequestArguments = parse_args(request)?;
        tracing::info!(
            "initialize from {}",
            args.client_name.as_deref().unwrap_or("unknown client")
        );
        self.inner.lock().await.session.initialize()?;
        Ok(Reply::body(&adapter_capabilities())?.then(FollowUp::Initialized))
    }

    fn dart_executable(&self, explicit: Option<&str>) -> Result<PathBuf, DapError> {
        if let Some(root) = explicit {
            return find_dart_sdk(Some(Path::new(root)))
                .map(|sdk| sdk.dart_executable())
                .map_err(|e| DapError::Configuration(e.to_string()));
        }
        match find_dart_sdk(self.settings.dart_sdk_path.as_deref()) {
            Ok(sdk) => Ok(sdk.dart_executable()),
            Err(e) => {
                tracing::warn!("{e}; using `dart` from PATH");
                Ok(PathBuf::from("dart"))
            }
        }
    }

    fn load_packages(&self, root: &Path) -> PackageMap {
        match PackageMap::load(root, self.settings.pub_cache.clone()) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!("cannot read package config under {}: {e}", root.display());
                PackageMap::new(self.settings.pub_cache.clone())
            }
        }
    }

    async fn launch(&self, request: &Request) -> Result<Reply, DapError> {
        let args: LaunchRequestArguments = parse_args(request)?;
        let dart = self.dart_executable(args.dart_sdk_path.as_deref())?;
        let plan = LaunchPlan::from_args(&args, dart, &self.settings.cwd)?;
        let packages = self.load_packages(&plan.cwd);

        let mut inner = self.inner.lock().await;
        inner.session.set_mode(SessionMode::Launch {
            no_debug: plan.no_debug,
        })?;
        inner.apply_option_overrides(&args.options);
        inner.stop_on_entry = plan.stop_on_entry;
        inner.packages = packages;
        inner.launch = Some(plan);
        let follow_up = if inner.session.ready_to_start() {
            FollowUp::Start
        } else {
            FollowUp::Nothing
        };
        Ok(Reply::empty().then(follow_up))
    }

    async fn attach(&self, request: &Request) -> Result<Reply, DapError> {
        let args: AttachRequestArguments = parse_args(request)?;
        let uri = args
            .vm_service_uri
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| DapError::Configuration("attach requires \"vmServiceUri\"".into()))?;
        websocket_uri(&uri).map_err(|e| DapError::Configuration(e.to_string()))?;
        let root = args
            .cwd
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.settings.cwd.clone());
        let packages = self.load_packages(&root);

        let mut inner = self.inner.lock().await;
        inner.session.set_mode(SessionMode::Attach)?;
        inner.apply_option_overrides(&args.options);
        inner.packages = packages;
        inner.attach_uri = Some(uri);
        let follow_up = if inner.session.ready_to_start() {
            FollowUp::Start
        } else {
            FollowUp::Nothing
        };
        Ok(Reply::empty().then(follow_up))
    }

    async fn configuration_done(&self) -> Result<Reply, DapError> {
        let mut inner = self.inner.lock().await;
        inner.session.configuration_done()?;
        let follow_up = if inner.session.ready_to_start() {
            FollowUp::Start
        } else {
            FollowUp::Nothing
        };
        Ok(Reply::empty().then(follow_up))
    }

    async fn start(&self) {
        if let Err(e) = self.try_start().await {
            tracing::error!("failed to start debugging: {e}");
            self.output(OutputCategory::Console, format!("{e}\n"));
            self.terminate_session().await;
        }
    }

    async fn try_start(&self) -> Result<(), DapError> {
        let (plan, attach_uri) = {
            let mut inner = self.inner.lock().await;
            inner.session.start()?;
            (inner.launch.clone(), inner.attach_uri.clone())
        };
        if let Some(plan) = plan {
            let process = launch::spawn(&plan, self.kill.clone())?;
            let adapter = self.clone();
            tokio::spawn(async move { adapter.pump_process(process).await });
            return Ok(());
        }
        match attach_uri {
            Some(uri) => self.connect(&uri).await,
            None => Err(DapError::rejected("neither launch nor attach was requested")),
        }
    }

    async fn pump_process(&self, mut process: LaunchedProcess) {
        while let Some(event) = process.events.recv().await {
            match event {
                ProcessEvent::Stdout(text) => self.output(OutputCategory::Stdout, text),
                ProcessEvent::Stderr(text) => self.output(OutputCategory::Stderr, text),
                ProcessEvent::VmService(uri) => {
                    let adapter = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = adapter.connect(&uri).await {
                            tracing::error!("VM service connection failed: {e}");
                            adapter.output(
                                OutputCategory::Console,
                                format!("Failed to connect to the VM service at {uri}: {e}\n"),
                            );
                        }
                    });
                }
                ProcessEvent::Exited(code) => {
                    let ended = matches!(
                        self.state().await,
                        SessionState::Terminating | SessionState::Terminated
                    );
                    if !ended {
                        self.send_event(
                            "exited",
                            Some(&ExitedEventBody {
                                exit_code: code.map_or(-1, i64::from),
                            }),
                        );
                    }
                    self.terminate_session().await;
                }
            }
        }
    }

    /// Connect to the VM service, subscribe to its streams and take over
    /// the isolates that already exist.
    pub(crate) async fn connect(&self, uri: &str) -> Result<(), DapError> {
        let VmConnection { service, events } = self.connector.connect(uri).await?;
        let api = VmApi::new(service);
        {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.session.state(),
                SessionState::Terminating | SessionState::Terminated
            ) {
                api.close();
                return Ok(());
            }
            inner.api = Some(api.clone());
        }
        tracing::info!("connected to VM service at {uri}");

        let listens = async {
            let [debug, isolate, stdout, stderr, logging] = STREAMS;
            tokio::try_join!(
                api.stream_listen(debug),
                api.stream_listen(isolate),
                api.stream_listen(stdout),
                api.stream_listen(stderr),
                api.stream_listen(logging),
            )
        };
        tokio::select! {
            result = listens => { result?; }
            _ = self.shutdown.cancelled() => return Ok(()),
        }

        self.adopt_existing_isolates(&api).await?;
        let adapter = self.clone();
        tokio::spawn(async move { adapter.run_vm_events(events).await });
        Ok(())
    }

    // -----------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------

    /// Install `bp` in one isolate. `None` when the VM refused it or it was
    /// replaced meanwhile.
    pub(crate) async fn install_breakpoint(
        &self,
        api: &VmApi,
        isolate_id: &str,
        bp: &Breakpoint,
    ) -> Result<Option<protocol::Breakpoint>, DapError> {
        let vm_bp = match api
            .add_breakpoint_with_script_uri(isolate_id, &bp.script_uri, bp.line, bp.column)
            .await
        {
            Ok(vm_bp) => vm_bp,
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            Err(e) => {
                tracing::debug!("breakpoint {}:{} not added: {e}", bp.script_uri, bp.line);
                return Ok(None);
            }
        };
        let recorded = self
            .inner
            .lock()
            .await
            .breakpoints
            .record_vm_breakpoint(&bp.path, bp.id, isolate_id, &vm_bp);
        match recorded {
            Some(updated) => Ok(Some(updated.to_dap())),
            None => {
                if let Err(e) = api.remove_breakpoint(isolate_id, &vm_bp.id).await {
                    tracing::debug!("stale breakpoint {} not removed: {e}", vm_bp.id);
                }
                Ok(None)
            }
        }
    }

    async fn set_breakpoints(&self, request: &Request) -> Result<Reply, DapError> {
        let args: SetBreakpointsArguments = parse_args(request)?;
        let path = args
            .source
            .path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| DapError::rejected("breakpoints need a source path"))?;
        let script_uri = Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| DapError::rejected(format!("not an absolute path: {}", path.display())))?;
        let requested = args.breakpoints.unwrap_or_default();

        let (added, removed, api, isolates) = {
            let mut inner = self.inner.lock().await;
            let (added, removed) = inner.breakpoints.set_for_file(&path, &script_uri, &requested);
            let live = matches!(
                inner.session.state(),
                SessionState::Running | SessionState::Paused
            ) && !inner.session.is_no_debug();
            let api = if live { inner.api.clone() } else { None };
            (added, removed, api, inner.configured_isolates())
        };

        let mut results: Vec<protocol::Breakpoint> = added.iter().map(Breakpoint::to_dap).collect();
        if let Some(api) = api {
            for bp in &removed {
                for (isolate_id, vm_id) in &bp.vm_ids {
                    match api.remove_breakpoint(isolate_id, vm_id).await {
                        Err(e) if e.is_connection_lost() => return Err(e.into()),
                        Err(e) => tracing::debug!("removing breakpoint {vm_id}: {e}"),
                        Ok(()) => {}
                    }
                }
            }
            for isolate_id in &isolates {
                for (slot, bp) in added.iter().enumerate() {
                    if let Some(updated) = self.install_breakpoint(&api, isolate_id, bp).await? {
                        results[slot] = updated;
                    }
                }
            }
        }
        Reply::body(&SetBreakpointsResponseBody {
            breakpoints: results,
        })
    }

    async fn set_exception_breakpoints(&self, request: &Request) -> Result<Reply, DapError> {
        let args: SetExceptionBreakpointsArguments = parse_args(request)?;
        let mode = pause_mode_for_filters(&args.filters);
        let (api, isolates) = {
            let mut inner = self.inner.lock().await;
            inner.exception_mode = mode;
            (inner.api.clone(), inner.configured_isolates())
        };
        if let Some(api) = api {
            for isolate_id in isolates {
                match api.set_isolate_pause_mode(&isolate_id, mode).await {
                    Err(e) if e.is_connection_lost() => return Err(e.into()),
                    Err(e) => tracing::warn!("setting pause mode on {isolate_id}: {e}"),
                    Ok(()) => {}
                }
            }
        }
        Ok(Reply::empty())
    }

    /// Mark SDK and external libraries debuggable or not to match the
    /// current options. Skipped when nothing changed since the last call.
    pub(crate) async fn apply_debuggability(
        &self,
        api: &VmApi,
        isolate_id: &str,
    ) -> Result<(), DapError> {
        let options = {
            let inner = self.inner.lock().await;
            match inner.isolates.get(isolate_id) {
                Some(iso) if iso.debuggability != Some(inner.options) => inner.options,
                _ => return Ok(()),
            }
        };
        let isolate = match api.get_isolate(isolate_id).await {
            Ok(isolate) => isolate,
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("cannot list libraries of {isolate_id}: {e}");
                return Ok(());
            }
        };
        let updates: Vec<(String, bool)> = {
            let inner = self.inner.lock().await;
            isolate
                .libraries
                .iter()
                .filter_map(|lib| match source_kind(&lib.uri, &inner.packages) {
                    kind @ (SourceKind::Sdk | SourceKind::ExternalPackage) => {
                        Some((lib.id.clone(), is_debuggable(kind, options)))
                    }
                    _ => None,
                })
                .collect()
        };
        for (library_id, debuggable) in updates {
            match api
                .set_library_debuggable(isolate_id, &library_id, debuggable)
                .await
            {
                Err(e) if e.is_connection_lost() => return Err(e.into()),
                Err(e) => tracing::debug!("setLibraryDebuggable {library_id}: {e}"),
                Ok(()) => {}
            }
        }
        if let Some(iso) = self.inner.lock().await.isolates.get_mut(isolate_id) {
            iso.debuggability = Some(options);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    async fn threads(&self) -> Result<Reply, DapError> {
        let threads = self.inner.lock().await.isolates.threads();
        Reply::body(&ThreadsResponseBody { threads })
    }

    async fn stack_trace(&self, request: &Request) -> Result<Reply, DapError> {
        let args: StackTraceArguments = parse_args(request)?;
        let start = usize::try_from(args.start_frame.unwrap_or(0)).unwrap_or(0);
        let levels = usize::try_from(args.levels.unwrap_or(0)).unwrap_or(0);
        let empty = StackTraceResponseBody {
            stack_frames: Vec::new(),
            total_frames: 0,
        };

        let (api, isolate_id, generation, plan, known) = {
            let inner = self.inner.lock().await;
            inner.session.require_debugging()?;
            let iso = inner.isolates.by_thread(args.thread_id)?;
            iso.require_paused()?;
            (
                inner.require_api()?,
                iso.id.clone(),
                iso.generation,
                iso.frames.plan(start, levels),
                iso.frames.known_len(),
            )
        };

        if plan != FetchPlan::Cached {
            let limit = match plan {
                FetchPlan::Limit(limit) => Some(limit),
                _ => None,
            };
            let stack = api.get_stack(&isolate_id, limit).await?;
            let fetched = stack.frames.len();
            let new_frames: Vec<Frame> = stack.frames.into_iter().skip(known).collect();
            self.fetch_token_tables(&api, &isolate_id, &new_frames).await?;

            let mut inner = self.inner.lock().await;
            if inner.generation_of(&isolate_id) != Some(generation) {
                return Reply::body(&empty);
            }
            let converted: Vec<StackFrame> = new_frames
                .iter()
                .enumerate()
                .map(|(offset, frame)| inner.convert_frame(&isolate_id, known + offset, frame))
                .collect();
            if let Some(iso) = inner.isolates.get_mut(&isolate_id) {
                iso.frames.extend(converted, fetched, plan);
            }
        }

        let inner = self.inner.lock().await;
        match inner.isolates.get(&isolate_id) {
            Some(iso) if iso.generation == generation => {
                let (frames, total) = iso.frames.slice(start, levels);
                Reply::body(&StackTraceResponseBody {
                    stack_frames: frames.to_vec(),
                    total_frames: total as i64,
                })
            }
            _ => Reply::body(&empty),
        }
    }

    /// Fetch scripts whose frames only carry a token position.
    async fn fetch_token_tables(
        &self,
        api: &VmApi,
        isolate_id: &str,
        frames: &[Frame],
    ) -> Result<(), DapError> {
        let mut wanted: Vec<String> = frames
            .iter()
            .filter_map(|f| f.location.as_ref())
            .filter(|loc| loc.line.is_none() && loc.token_pos.is_some())
            .map(|loc| loc.script.id.clone())
            .collect();
        wanted.sort();
        wanted.dedup();
        {
            let inner = self.inner.lock().await;
            wanted.retain(|id| {
                !inner
                    .scripts
                    .contains_key(&(isolate_id.to_string(), id.clone()))
            });
        }
        for script_id in wanted {
            match api.get_script(isolate_id, &script_id).await {
                Ok(script) => {
                    self.inner
                        .lock()
                        .await
                        .scripts
                        .insert((isolate_id.to_string(), script_id), script);
                }
                Err(e) if e.is_connection_lost() => return Err(e.into()),
                Err(e) => tracing::debug!("cannot load script {script_id}: {e}"),
            }
        }
        Ok(())
    }

    async fn scopes(&self, request: &Request) -> Result<Reply, DapError> {
        let args: ScopesArguments = parse_args(request)?;
        let mut inner = self.inner.lock().await;
        let frame = *inner.frames.get(args.frame_id)?;
        let isolate_id = inner
            .frames
            .isolate_of(args.frame_id)
            .map(str::to_string)
            .ok_or(DapError::StaleReference(args.frame_id))?;
        if frame.is_marker {
            return Reply::body(&ScopesResponseBody { scopes: Vec::new() });
        }
        let exception = inner
            .isolates
            .get(&isolate_id)
            .and_then(|iso| iso.exception().cloned());

        let locals = inner.variables.insert(
            &isolate_id,
            VariableRef::Locals {
                frame_index: frame.frame_index,
            },
        );
        let mut scopes = vec![Scope {
            name: "Locals".into(),
            variables_reference: locals,
            expensive: false,
            presentation_hint: Some("locals".into()),
        }];
        if let Some(exception) = exception {
            let handle = inner
                .variables
                .insert(&isolate_id, VariableRef::Exception { exception });
            scopes.push(Scope {
                name: "Exception".into(),
                variables_reference: handle,
                expensive: false,
                presentation_hint: None,
            });
        }
        Reply::body(&ScopesResponseBody { scopes })
    }

    async fn variables(&self, request: &Request) -> Result<Reply, DapError> {
        let args: VariablesArguments = parse_args(request)?;
        let handle = args.variables_reference;
        let (api, isolate_id, reference, generation, format) = {
            let inner = self.inner.lock().await;
            let reference = inner.variables.get(handle)?.clone();
            let isolate_id = inner
                .variables
                .isolate_of(handle)
                .map(str::to_string)
                .ok_or(DapError::StaleReference(handle))?;
            let generation = inner
                .generation_of(&isolate_id)
                .ok_or(DapError::StaleReference(handle))?;
            (inner.require_api()?, isolate_id, reference, generation, inner.format)
        };

        let expander = Expander::new(&api, &isolate_id, format);
        let nodes = expander.children(&reference, args.start, args.count).await?;

        let mut inner = self.inner.lock().await;
        if inner.generation_of(&isolate_id) != Some(generation) {
            return Reply::body(&VariablesResponseBody {
                variables: Vec::new(),
            });
        }
        let variables = nodes
            .into_iter()
            .map(|node| {
                let child = match &node.children {
                    Some(children) => inner.variables.insert(&isolate_id, children.clone()),
                    None => 0,
                };
                node.into_dap(child)
            })
            .collect();
        Reply::body(&VariablesResponseBody { variables })
    }

    async fn evaluate(&self, request: &Request) -> Result<Reply, DapError> {
        let args: EvaluateArguments = parse_args(request)?;
        let context = args.context.unwrap_or_default();
        match self.evaluate_expression(&args).await {
            Ok(body) => Reply::body(&body),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) if context.shows_full_errors() => Err(DapError::Evaluation(evaluation_message(&e))),
            Err(e) => {
                tracing::debug!("evaluation of {:?} failed: {e}", args.expression);
                Err(DapError::Evaluation("not available".into()))
            }
        }
    }

    async fn evaluate_expression(
        &self,
        args: &EvaluateArguments,
    ) -> Result<EvaluateResponseBody, DapError> {
        let expression = args.expression.trim();
        if expression.is_empty() {
            return Err(DapError::Evaluation("empty expression".into()));
        }
        let (api, isolate_id, frame_index, exception, generation, mut format) = {
            let inner = self.inner.lock().await;
            let api = inner.require_api()?;
            let (isolate_id, frame_index) = match args.frame_id {
                Some(frame_id) => {
                    let frame = *inner.frames.get(frame_id)?;
                    let isolate_id = inner
                        .frames
                        .isolate_of(frame_id)
                        .map(str::to_string)
                        .ok_or(DapError::StaleReference(frame_id))?;
                    (isolate_id, Some(frame.frame_index))
                }
                None => {
                    let iso = inner
                        .isolates
                        .default_isolate()
                        .ok_or_else(|| DapError::rejected("no isolate to evaluate in"))?;
                    (iso.id.clone(), None)
                }
            };
            let iso = inner
                .isolates
                .get(&isolate_id)
                .ok_or_else(|| DapError::rejected("the isolate has exited"))?;
            (
                api,
                isolate_id,
                frame_index,
                iso.exception().cloned(),
                iso.generation,
                inner.format,
            )
        };
        // Only the variables view truncates. Evaluating an `evaluateName` gives the whole value.
        format.max_string_length = usize::MAX;

        let exception_suffix = expression
            .strip_prefix("$e")
            .filter(|rest| rest.is_empty() || rest.starts_with(['.', '[', ' ', '?']));
        let result = match (exception_suffix, exception) {
            (Some(rest), Some(exception)) if rest.trim().is_empty() => {
                EvalResult::Instance(exception)
            }
            (Some(rest), Some(exception)) => {
                let id = exception
                    .id
                    .as_deref()
                    .ok_or_else(|| DapError::Evaluation("the exception is not available".into()))?;
                api.evaluate(&isolate_id, id, &format!("this{rest}")).await?
            }
            _ => match frame_index {
                Some(index) => api.evaluate_in_frame(&isolate_id, index, expression).await?,
                None => {
                    let isolate = api.get_isolate(&isolate_id).await?;
                    let root = isolate.root_lib.ok_or_else(|| {
                        DapError::Evaluation("the isolate has no root library".into())
                    })?;
                    api.evaluate(&isolate_id, &root.id, expression).await?
                }
            },
        };
        let instance = match result {
            EvalResult::Instance(instance) => instance,
            EvalResult::Error(error) => return Err(DapError::Evaluation(error.message)),
            EvalResult::Sentinel(text) => return Err(DapError::Evaluation(text)),
        };

        let expander = Expander::new(&api, &isolate_id, format);
        let instance = expander.expand_string(instance).await?;
        let node = expander
            .instance_node(expression.to_string(), instance, Some(expression.to_string()))
            .await?;

        let mut inner = self.inner.lock().await;
        let handle = match &node.children {
            Some(children) if inner.generation_of(&isolate_id) == Some(generation) => {
                inner.variables.insert(&isolate_id, children.clone())
            }
            _ => 0,
        };
        Ok(EvaluateResponseBody {
            result: node.value,
            result_type: node.type_name,
            variables_reference: handle,
            indexed_variables: node.indexed,
        })
    }

    async fn source(&self, request: &Request) -> Result<Reply, DapError> {
        let args: SourceArguments = parse_args(request)?;
        let reference = args.source_reference;
        let (lookup, api) = {
            let inner = self.inner.lock().await;
            (inner.sources.lookup(reference)?, inner.api.clone())
        };
        let content = match lookup {
            SourceLookup::Cached(content) => content,
            SourceLookup::Fetch {
                isolate_id,
                script_id,
            } => {
                let api = api.ok_or_else(|| DapError::rejected("not connected to the VM service"))?;
                let content = fetch_source(&api, &isolate_id, &script_id).await?;
                self.inner
                    .lock()
                    .await
                    .sources
                    .store_content(reference, content.clone());
                content
            }
        };
        Reply::body(&SourceResponseBody {
            content,
            mime_type: Some("text/x-dart".into()),
        })
    }

    async fn update_debug_options(&self, request: &Request) -> Result<Reply, DapError> {
        let args: DebugOptionArguments = parse_args(request)?;
        let mut inner = self.inner.lock().await;
        inner.apply_option_overrides(&args);
        tracing::info!("debug options now {:?}", inner.options);
        Ok(Reply::empty())
    }

    // -----------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------

    async fn resume_request(
        &self,
        request: &Request,
        step: Option<StepOption>,
    ) -> Result<Reply, DapError> {
        let args: ThreadArguments = parse_args(request)?;
        let (api, isolate_id, step) = {
            let inner = self.inner.lock().await;
            inner.session.require_debugging()?;
            let iso = inner.isolates.by_thread(args.thread_id)?;
            let pause = iso.require_paused()?;
            let step = match step {
                Some(StepOption::Over) if pause.at_async_suspension => {
                    Some(StepOption::OverAsyncSuspension)
                }
                other => other,
            };
            (inner.require_api()?, iso.id.clone(), step)
        };
        self.apply_debuggability(&api, &isolate_id).await?;
        if let Some(iso) = self.inner.lock().await.isolates.get_mut(&isolate_id) {
            iso.last_step = step;
            iso.step_out_hops = 0;
        }
        self.resume_isolate(&api, &isolate_id, step).await?;
        if request.command == "continue" {
            Reply::body(&ContinueResponseBody {
                all_threads_continued: false,
            })
        } else {
            Ok(Reply::empty())
        }
    }

    /// Resume `isolate_id`, invalidating its handles first so a pause that
    /// races the resume is never clobbered.
    pub(crate) async fn resume_isolate(
        &self,
        api: &VmApi,
        isolate_id: &str,
        step: Option<StepOption>,
    ) -> Result<(), DapError> {
        self.inner.lock().await.mark_resumed(isolate_id);
        api.resume(isolate_id, step).await?;
        Ok(())
    }

    async fn pause(&self, request: &Request) -> Result<Reply, DapError> {
        let args: ThreadArguments = parse_args(request)?;
        let (api, isolate_id) = {
            let inner = self.inner.lock().await;
            inner.session.require_debugging()?;
            let iso = inner.isolates.by_thread(args.thread_id)?;
            (inner.require_api()?, iso.id.clone())
        };
        api.pause(&isolate_id).await?;
        Ok(Reply::empty())
    }

    // -----------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------

    async fn terminate(&self) -> Result<Reply, DapError> {
        let (mode, state) = {
            let inner = self.inner.lock().await;
            (inner.session.mode(), inner.session.state())
        };
        let running = matches!(state, SessionState::Running | SessionState::Paused);
        match mode {
            Some(SessionMode::Launch { .. }) if running => {
                // The process watcher reports `exited` and `terminated`.
                self.kill.cancel();
                Ok(Reply::empty())
            }
            Some(SessionMode::Attach) => {
                self.detach(false).await;
                Ok(Reply::empty().then(FollowUp::Terminate))
            }
            _ => Ok(Reply::empty().then(FollowUp::Terminate)),
        }
    }

    async fn disconnect(&self, request: &Request) -> Result<Reply, DapError> {
        let args: DisconnectArguments = parse_args(request)?;
        let attached = self.inner.lock().await.session.is_attached();
        let terminate_debuggee = args.terminate_debuggee.unwrap_or(!attached);
        if attached {
            self.detach(terminate_debuggee).await;
        } else {
            self.kill.cancel();
        }
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(Reply::empty().then(FollowUp::Terminate))
    }

    /// Leave an attached VM as we found it: remove our breakpoints, stop
    /// pausing on exceptions and resume anything paused. With `kill`, the
    /// isolates are killed instead.
    async fn detach(&self, kill: bool) {
        let (api, isolates, paused, vm_breakpoints) = {
            let inner = self.inner.lock().await;
            let Some(api) = inner.api.clone() else {
                return;
            };
            let isolates = inner.isolates.ids();
            let vm_breakpoints: Vec<(String, Vec<String>)> = isolates
                .iter()
                .map(|id| (id.clone(), inner.breakpoints.vm_ids_for_isolate(id)))
                .collect();
            (api, isolates, inner.isolates.paused_ids(), vm_breakpoints)
        };
        if kill {
            for isolate_id in &isolates {
                if let Err(e) = api.kill(isolate_id).await {
                    tracing::debug!("kill {isolate_id}: {e}");
                }
            }
            return;
        }
        for (isolate_id, vm_ids) in vm_breakpoints {
            for vm_id in vm_ids {
                if let Err(e) = api.remove_breakpoint(&isolate_id, &vm_id).await {
                    tracing::debug!("removing breakpoint {vm_id}: {e}");
                }
            }
            if let Err(e) = api
                .set_isolate_pause_mode(&isolate_id, ExceptionPauseMode::None)
                .await
            {
                tracing::debug!("resetting pause mode of {isolate_id}: {e}");
            }
        }
        for isolate_id in paused {
            if let Err(e) = self.resume_isolate(&api, &isolate_id, None).await {
                tracing::debug!("resuming {isolate_id}: {e}");
            }
        }
    }

    /// End the session once: kill a launched debuggee, hang up on the VM
    /// and emit `terminated`.
    pub(crate) async fn terminate_session(&self) {
        let api = {
            let mut inner = self.inner.lock().await;
            if !inner.session.begin_terminate() {
                return;
            }
            inner.api.take()
        };
        self.kill.cancel();
        self.shutdown.cancel();
        if let Some(api) = api {
            api.close();
        }
        self.send_event::<Value>("terminated", None);
        self.inner.lock().await.session.finish_terminate();
        tracing::info!("debug session terminated");
    }

    /// Tear down after the editor went away without `disconnect`.
    pub async fn shutdown(&self) {
        self.terminate_session().await;
    }
}
