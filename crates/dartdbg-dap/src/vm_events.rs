//! VM service stream handling: isolate lifecycle, pauses, output.

use dartdbg_vm::{EventKind, IsolateRef, StepOption, StreamEvent, VmApi, VmEvent};
use tokio::sync::mpsc;

use crate::adapter::DebugAdapter;
use crate::classifier::{is_debuggable, source_kind};
use crate::error::DapError;
use crate::evaluator::{evaluate_condition, render_log_message, ConditionOutcome};
use crate::isolates::PauseInfo;
use crate::protocol::{
    BreakpointEventBody, ContinuedEventBody, OutputCategory, StopReason, StoppedEventBody,
    ThreadEventBody,
};
use crate::session::SessionState;
use crate::variables::format_instance;

/// Consecutive `Out` steps taken to leave non-debuggable code before
/// giving up and stopping where we are.
const MAX_STEP_OUT_HOPS: u32 = 8;

impl DebugAdapter {
    /// Drain VM stream events until the connection drops or the session
    /// shuts down.
    pub(crate) async fn run_vm_events(&self, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
        loop {
            let next = tokio::select! {
                next = events.recv() => next,
                _ = self.shutdown.cancelled() => return,
            };
            let Some(event) = next else {
                tracing::info!("VM service connection closed");
                break;
            };
            if let Err(e) = self.handle_vm_event(event).await {
                if e.is_fatal() {
                    tracing::warn!("stopping VM event handling: {e}");
                    break;
                }
                tracing::warn!("VM event not handled: {e}");
            }
        }
        let launched = { self.inner.lock().await.launch.is_some() };
        // A launched debuggee's exit is reported by the process watcher.
        if !launched {
            self.terminate_session().await;
        }
    }

    /// Take over isolates that were running before we connected.
    pub(crate) async fn adopt_existing_isolates(&self, api: &VmApi) -> Result<(), DapError> {
        let vm = api.get_vm().await?;
        for isolate_ref in vm.isolates.iter().filter(|i| !i.is_system_isolate) {
            let isolate = match api.get_isolate(&isolate_ref.id).await {
                Ok(isolate) => isolate,
                Err(e) if e.is_connection_lost() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!("skipping isolate {}: {e}", isolate_ref.id);
                    continue;
                }
            };
            self.track_isolate(isolate_ref).await;
            let pause = isolate.pause_event.filter(|event| event.kind.is_pause());
            let Some(mut event) = pause else {
                self.configure_isolate(api, &isolate_ref.id).await?;
                continue;
            };
            event.isolate = Some(isolate_ref.clone());
            if !matches!(event.kind, EventKind::PauseStart | EventKind::PauseExit) {
                self.configure_isolate(api, &isolate_ref.id).await?;
            }
            self.handle_vm_event(StreamEvent {
                stream_id: "Debug".into(),
                event,
            })
            .await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_vm_event(&self, stream: StreamEvent) -> Result<(), DapError> {
        let StreamEvent { stream_id, event } = stream;
        tracing::trace!("VM {stream_id} event {:?}", event.kind);
        let api = {
            let inner = self.inner.lock().await;
            match (&inner.api, inner.session.state()) {
                (_, SessionState::Terminating | SessionState::Terminated) => return Ok(()),
                (Some(api), _) => api.clone(),
                (None, _) => return Ok(()),
            }
        };
        let Some(isolate) = event.isolate.clone() else {
            return Ok(());
        };
        match &event.kind {
            EventKind::IsolateStart => {
                self.track_isolate(&isolate).await;
            }
            EventKind::IsolateRunnable => {
                self.track_isolate(&isolate).await;
                self.configure_isolate(&api, &isolate.id).await?;
            }
            EventKind::IsolateExit => self.isolate_exited(&isolate.id).await,
            EventKind::PauseStart => self.pause_start(&api, &isolate).await?,
            EventKind::PauseExit | EventKind::PausePostRequest => {
                self.track_isolate(&isolate).await;
                self.resume_isolate(&api, &isolate.id, None).await?;
            }
            EventKind::PauseBreakpoint => {
                self.track_isolate(&isolate).await;
                self.pause_breakpoint(&api, &isolate.id, &event).await?;
            }
            EventKind::PauseInterrupted => {
                self.track_isolate(&isolate).await;
                let stepping = self.last_step(&isolate.id).await.is_some();
                if stepping {
                    self.step_landed(&api, &isolate.id, &event).await?;
                } else {
                    self.report_stop(&isolate.id, StopReason::Pause, pause_info(&event), Vec::new(), None)
                        .await;
                }
            }
            EventKind::PauseException => {
                self.track_isolate(&isolate).await;
                let max_len = self.inner.lock().await.format.max_string_length;
                let text = event
                    .exception
                    .as_ref()
                    .map(|e| format_instance(e, Some(max_len)));
                let info = PauseInfo {
                    at_async_suspension: event.at_async_suspension,
                    exception: event.exception.clone(),
                };
                self.report_stop(&isolate.id, StopReason::Exception, info, Vec::new(), text)
                    .await;
            }
            EventKind::Resume => {
                let thread_id = {
                    let mut inner = self.inner.lock().await;
                    let thread_id = inner.isolates.get(&isolate.id).map(|i| i.thread_id);
                    let was_paused = inner.mark_resumed(&isolate.id);
                    thread_id.filter(|_| was_paused)
                };
                if let Some(thread_id) = thread_id {
                    self.send_event(
                        "continued",
                        Some(&ContinuedEventBody {
                            thread_id,
                            all_threads_continued: false,
                        }),
                    );
                }
            }
            EventKind::BreakpointResolved => {
                let Some(vm_bp) = &event.breakpoint else {
                    return Ok(());
                };
                let changed = self.inner.lock().await.breakpoints.mark_resolved(vm_bp);
                if let Some(bp) = changed {
                    self.send_event(
                        "breakpoint",
                        Some(&BreakpointEventBody {
                            reason: "changed".into(),
                            breakpoint: bp.to_dap(),
                        }),
                    );
                }
            }
            EventKind::WriteEvent => {
                let attached = self.inner.lock().await.session.is_attached();
                if let (true, Some(text)) = (attached, event.decoded_bytes()) {
                    let category = if stream_id == "Stderr" {
                        OutputCategory::Stderr
                    } else {
                        OutputCategory::Stdout
                    };
                    self.output(category, text);
                }
            }
            EventKind::Logging => {
                let show = self.inner.lock().await.show_log_output;
                if let (true, Some(record)) = (show, &event.log_record) {
                    let logger = record
                        .logger_name
                        .as_ref()
                        .and_then(|n| n.value_as_string.clone())
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| "log".into());
                    let message = record
                        .message
                        .as_ref()
                        .and_then(|m| m.value_as_string.clone())
                        .unwrap_or_default();
                    self.output(OutputCategory::Console, format!("[{logger}] {message}\n"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Register an isolate, announcing it as a thread the first time.
    async fn track_isolate(&self, isolate: &IsolateRef) -> i64 {
        let (thread_id, new) = self
            .inner
            .lock()
            .await
            .isolates
            .register(&isolate.id, &isolate.name);
        if new {
            self.send_event(
                "thread",
                Some(&ThreadEventBody {
                    reason: "started".into(),
                    thread_id,
                }),
            );
        }
        thread_id
    }

    async fn isolate_exited(&self, isolate_id: &str) {
        let thread_id = {
            let mut inner = self.inner.lock().await;
            let Some(state) = inner.isolates.remove(isolate_id) else {
                return;
            };
            inner.breakpoints.remove_isolate(isolate_id);
            inner.frames.invalidate_isolate(isolate_id);
            inner.variables.invalidate_isolate(isolate_id);
            inner.scripts.retain(|(iso, _), _| iso != isolate_id);
            if let Some(survivor) = inner.isolates.ids().into_iter().next() {
                inner.sources.reassign_isolate(isolate_id, &survivor);
            }
            let any_paused = inner.isolates.any_paused();
            inner.session.handle_resumed(any_paused);
            state.thread_id
        };
        self.send_event(
            "thread",
            Some(&ThreadEventBody {
                reason: "exited".into(),
                thread_id,
            }),
        );
    }

    /// Send breakpoints, exception pause mode and library debuggability to
    /// an isolate. Runs once per isolate.
    pub(crate) async fn configure_isolate(
        &self,
        api: &VmApi,
        isolate_id: &str,
    ) -> Result<(), DapError> {
        let (mode, breakpoints) = {
            let mut inner = self.inner.lock().await;
            match inner.isolates.get_mut(isolate_id) {
                Some(iso) if !iso.configured => iso.configured = true,
                _ => return Ok(()),
            }
            let breakpoints: Vec<_> = inner.breakpoints.all().cloned().collect();
            (inner.exception_mode, breakpoints)
        };
        tracing::debug!(
            "configuring {isolate_id}: {} breakpoints, pause mode {}",
            breakpoints.len(),
            mode.as_str()
        );
        match api.set_isolate_pause_mode(isolate_id, mode).await {
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            Err(e) => tracing::warn!("setIsolatePauseMode on {isolate_id}: {e}"),
            Ok(()) => {}
        }
        self.apply_debuggability(api, isolate_id).await?;
        for bp in &breakpoints {
            if let Some(updated) = self.install_breakpoint(api, isolate_id, bp).await? {
                self.send_event(
                    "breakpoint",
                    Some(&BreakpointEventBody {
                        reason: "changed".into(),
                        breakpoint: updated,
                    }),
                );
            }
        }
        Ok(())
    }

    async fn pause_start(&self, api: &VmApi, isolate: &IsolateRef) -> Result<(), DapError> {
        let thread_id = self.track_isolate(isolate).await;
        {
            let mut inner = self.inner.lock().await;
            match inner.isolates.get_mut(&isolate.id) {
                Some(iso) if !iso.start_handled => iso.start_handled = true,
                _ => return Ok(()),
            }
        }
        self.configure_isolate(api, &isolate.id).await?;
        let stop_on_entry = {
            let inner = self.inner.lock().await;
            inner.stop_on_entry && thread_id == 1
        };
        if stop_on_entry {
            let info = PauseInfo {
                at_async_suspension: false,
                exception: None,
            };
            self.report_stop(&isolate.id, StopReason::Entry, info, Vec::new(), None)
                .await;
            Ok(())
        } else {
            self.resume_isolate(api, &isolate.id, None).await
        }
    }

    async fn pause_breakpoint(
        &self,
        api: &VmApi,
        isolate_id: &str,
        event: &VmEvent,
    ) -> Result<(), DapError> {
        let hits: Vec<_> = {
            let inner = self.inner.lock().await;
            event
                .pause_breakpoints
                .iter()
                .filter_map(|vm_bp| inner.breakpoints.find_by_vm_id(&vm_bp.id).cloned())
                .collect()
        };
        if hits.is_empty() {
            return if self.last_step(isolate_id).await.is_some() {
                self.step_landed(api, isolate_id, event).await
            } else {
                self.report_stop(isolate_id, StopReason::Breakpoint, pause_info(event), Vec::new(), None)
                    .await;
                Ok(())
            };
        }

        let mut stop_ids = Vec::new();
        for bp in &hits {
            if let Some(condition) = &bp.condition {
                let outcome = evaluate_condition(api, isolate_id, condition).await?;
                if let ConditionOutcome::Failed(message) = &outcome {
                    self.output(OutputCategory::Console, message.clone());
                }
                if !outcome.should_stop() {
                    continue;
                }
            }
            match &bp.log_message {
                Some(segments) => {
                    let line = render_log_message(api, isolate_id, segments).await?;
                    self.output(OutputCategory::Console, line);
                }
                None => stop_ids.push(bp.id),
            }
        }

        if stop_ids.is_empty() {
            let step = self.last_step(isolate_id).await;
            self.resume_isolate(api, isolate_id, step).await
        } else {
            self.report_stop(isolate_id, StopReason::Breakpoint, pause_info(event), stop_ids, None)
                .await;
            Ok(())
        }
    }

    /// A step finished. Keep stepping out while the top frame is in code
    /// the user is not debugging.
    async fn step_landed(
        &self,
        api: &VmApi,
        isolate_id: &str,
        event: &VmEvent,
    ) -> Result<(), DapError> {
        let skip = {
            let mut inner = self.inner.lock().await;
            let debuggable = event
                .top_frame
                .as_ref()
                .and_then(|frame| frame.location.as_ref())
                .map(|location| {
                    let kind = source_kind(&location.script.uri, &inner.packages);
                    is_debuggable(kind, inner.options)
                })
                .unwrap_or(true);
            match inner.isolates.get_mut(isolate_id) {
                Some(iso) if !debuggable && iso.step_out_hops < MAX_STEP_OUT_HOPS => {
                    iso.step_out_hops += 1;
                    true
                }
                _ => false,
            }
        };
        if skip {
            tracing::debug!("step landed in non-debuggable code; stepping out");
            self.inner.lock().await.mark_resumed(isolate_id);
            api.resume(isolate_id, Some(StepOption::Out)).await?;
            return Ok(());
        }
        self.report_stop(isolate_id, StopReason::Step, pause_info(event), Vec::new(), None)
            .await;
        Ok(())
    }

    async fn last_step(&self, isolate_id: &str) -> Option<StepOption> {
        self.inner
            .lock()
            .await
            .isolates
            .get(isolate_id)
            .and_then(|iso| iso.last_step)
    }

    /// Record the pause and tell the editor.
    async fn report_stop(
        &self,
        isolate_id: &str,
        reason: StopReason,
        info: PauseInfo,
        hit_breakpoint_ids: Vec<i64>,
        text: Option<String>,
    ) {
        let thread_id = {
            let mut inner = self.inner.lock().await;
            let Some(iso) = inner.isolates.get_mut(isolate_id) else {
                return;
            };
            iso.mark_paused(info);
            iso.last_step = None;
            iso.step_out_hops = 0;
            let thread_id = iso.thread_id;
            if let Err(e) = inner.session.handle_paused() {
                tracing::debug!("ignoring pause of {isolate_id}: {e}");
                return;
            }
            thread_id
        };
        tracing::info!("thread {thread_id} stopped: {reason:?}");
        self.send_event(
            "stopped",
            Some(&StoppedEventBody {
                reason,
                description: None,
                thread_id,
                all_threads_stopped: false,
                text,
                hit_breakpoint_ids,
            }),
        );
    }
}

fn pause_info(event: &VmEvent) -> PauseInfo {
    PauseInfo {
        at_async_suspension: event.at_async_suspension,
        exception: None,
    }
}
