//! Per-isolate debugger state and the isolate ⇄ thread mapping.
//!
//! Every pause and every resume bumps the isolate's generation. Work that
//! awaits the VM records the generation first and drops its result if it
//! changed in the meantime.

use std::collections::HashMap;

use dartdbg_vm::{InstanceRef, StepOption};

use crate::classifier::DebugOptions;
use crate::error::DapError;
use crate::frames::FrameWindow;
use crate::protocol::{StackFrame, Thread};

/// Why an isolate is paused.
#[derive(Debug, Clone)]
pub struct PauseInfo {
    pub at_async_suspension: bool,
    /// Set when paused on an exception.
    pub exception: Option<InstanceRef>,
}

/// Everything the bridge tracks for one isolate.
#[derive(Debug)]
pub struct IsolateState {
    pub id: String,
    pub name: String,
    pub thread_id: i64,
    pub pause: Option<PauseInfo>,
    pub generation: u64,
    pub frames: FrameWindow<StackFrame>,
    /// The step the user requested last, until the next stop.
    pub last_step: Option<StepOption>,
    pub step_out_hops: u32,
    /// Breakpoints and pause mode have been sent.
    pub configured: bool,
    /// The `PauseStart` of this isolate was dealt with.
    pub start_handled: bool,
    /// Options the library debuggability flags were last computed for.
    pub debuggability: Option<DebugOptions>,
}

impl IsolateState {
    fn new(id: &str, name: &str, thread_id: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            thread_id,
            pause: None,
            generation: 0,
            frames: FrameWindow::new(),
            last_step: None,
            step_out_hops: 0,
            configured: false,
            start_handled: false,
            debuggability: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_some()
    }

    pub fn exception(&self) -> Option<&InstanceRef> {
        self.pause.as_ref().and_then(|p| p.exception.as_ref())
    }

    /// Enter a new pause. Returns the new generation.
    pub fn mark_paused(&mut self, info: PauseInfo) -> u64 {
        self.generation += 1;
        self.frames = FrameWindow::new();
        self.pause = Some(info);
        self.generation
    }

    /// Leave the current pause. Returns `false` when it was not paused.
    pub fn mark_resumed(&mut self) -> bool {
        let was_paused = self.pause.take().is_some();
        self.generation += 1;
        self.frames = FrameWindow::new();
        was_paused
    }

    pub fn require_paused(&self) -> Result<&PauseInfo, DapError> {
        self.pause
            .as_ref()
            .ok_or_else(|| DapError::rejected(format!("thread {} is not paused", self.thread_id)))
    }
}

/// All live isolates of the debuggee.
#[derive(Debug)]
pub struct IsolateTable {
    next_thread_id: i64,
    isolates: HashMap<String, IsolateState>,
}

impl Default for IsolateTable {
    fn default() -> Self {
        Self {
            next_thread_id: 1,
            isolates: HashMap::new(),
        }
    }
}

impl IsolateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an isolate. Returns its thread id and whether it is new.
    pub fn register(&mut self, id: &str, name: &str) -> (i64, bool) {
        if let Some(existing) = self.isolates.get(id) {
            return (existing.thread_id, false);
        }
        let thread_id = self.next_thread_id;
        self.next_thread_id += 1;
        self.isolates
            .insert(id.to_string(), IsolateState::new(id, name, thread_id));
        (thread_id, true)
    }

    pub fn remove(&mut self, id: &str) -> Option<IsolateState> {
        self.isolates.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&IsolateState> {
        self.isolates.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut IsolateState> {
        self.isolates.get_mut(id)
    }

    pub fn by_thread(&self, thread_id: i64) -> Result<&IsolateState, DapError> {
        self.isolates
            .values()
            .find(|i| i.thread_id == thread_id)
            .ok_or_else(|| DapError::rejected(format!("unknown thread {thread_id}")))
    }

    /// Threads in creation order.
    pub fn threads(&self) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self
            .isolates
            .values()
            .map(|i| Thread {
                id: i.thread_id,
                name: i.name.clone(),
            })
            .collect();
        threads.sort_by_key(|t| t.id);
        threads
    }

    pub fn ids(&self) -> Vec<String> {
        let mut states: Vec<&IsolateState> = self.isolates.values().collect();
        states.sort_by_key(|s| s.thread_id);
        states.into_iter().map(|s| s.id.clone()).collect()
    }

    pub fn any_paused(&self) -> bool {
        self.isolates.values().any(IsolateState::is_paused)
    }

    pub fn paused_ids(&self) -> Vec<String> {
        self.ids()
            .into_iter()
            .filter(|id| self.isolates.get(id).is_some_and(IsolateState::is_paused))
            .collect()
    }

    /// The isolate to use when a request names no frame: the first paused
    /// one, else the oldest.
    pub fn default_isolate(&self) -> Option<&IsolateState> {
        let mut states: Vec<&IsolateState> = self.isolates.values().collect();
        states.sort_by_key(|s| (!s.is_paused(), s.thread_id));
        states.into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.isolates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.isolates.len()
    }
}
