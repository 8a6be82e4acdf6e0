//! Debug session state machine.
//!
//! `Initializing → Configuring → Running ⇄ Paused → Terminating → Terminated`.
//! Launch and attach share the machine; [`SessionMode`] records which one
//! the editor asked for.

use crate::error::DapError;

/// The current state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`.
    Initializing,
    /// Breakpoints and exception filters are buffered until
    /// `configurationDone` and a launch/attach have both arrived.
    Configuring,
    /// The debuggee runs; no isolate is paused.
    Running,
    /// At least one isolate is paused.
    Paused,
    /// Shutdown has begun; no new work is accepted.
    Terminating,
    Terminated,
}

/// How the session reached the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// We spawned the process.
    Launch { no_debug: bool },
    /// We connected to an already running VM service.
    Attach,
}

/// Lifecycle state of a single debug session.
#[derive(Debug)]
pub struct DapSession {
    state: SessionState,
    mode: Option<SessionMode>,
    configuration_done: bool,
}

impl DapSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
            mode: None,
            configuration_done: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Option<SessionMode> {
        self.mode
    }

    pub fn is_attached(&self) -> bool {
        self.mode == Some(SessionMode::Attach)
    }

    pub fn is_no_debug(&self) -> bool {
        matches!(self.mode, Some(SessionMode::Launch { no_debug: true }))
    }

    /// Transition: Initializing → Configuring.
    pub fn initialize(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        if self.state != SessionState::Initializing {
            return Err(DapError::rejected(format!(
                "cannot initialize: session is in {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Configuring;
        Ok(())
    }

    /// Record the `launch` or `attach` request.
    pub fn set_mode(&mut self, mode: SessionMode) -> Result<(), DapError> {
        self.require_configuring()?;
        if self.mode.is_some() {
            return Err(DapError::rejected("launch or attach was already requested"));
        }
        self.mode = Some(mode);
        Ok(())
    }

    /// Record `configurationDone`.
    pub fn configuration_done(&mut self) -> Result<(), DapError> {
        self.require_configuring()?;
        self.configuration_done = true;
        Ok(())
    }

    /// Both `configurationDone` and a launch/attach have arrived.
    pub fn ready_to_start(&self) -> bool {
        self.state == SessionState::Configuring && self.configuration_done && self.mode.is_some()
    }

    /// Transition: Configuring → Running.
    pub fn start(&mut self) -> Result<(), DapError> {
        if !self.ready_to_start() {
            return Err(DapError::rejected(format!(
                "cannot start: session is in {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Transition: Running → Paused (idempotent while paused).
    pub fn handle_paused(&mut self) -> Result<(), DapError> {
        self.require_not_terminated()?;
        match self.state {
            SessionState::Running | SessionState::Paused => {
                self.state = SessionState::Paused;
                Ok(())
            }
            other => Err(DapError::rejected(format!(
                "cannot pause: session is in {other:?} state"
            ))),
        }
    }

    /// Transition: Paused → Running once no isolate remains paused.
    pub fn handle_resumed(&mut self, any_isolate_paused: bool) {
        if self.state == SessionState::Paused && !any_isolate_paused {
            self.state = SessionState::Running;
        }
    }

    /// Transition: any → Terminating. Returns `false` when shutdown was
    /// already under way, so callers emit `terminated` once.
    pub fn begin_terminate(&mut self) -> bool {
        match self.state {
            SessionState::Terminating | SessionState::Terminated => false,
            _ => {
                self.state = SessionState::Terminating;
                true
            }
        }
    }

    /// Transition: Terminating → Terminated.
    pub fn finish_terminate(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// The debuggee is live: Running or Paused.
    pub fn require_debugging(&self) -> Result<(), DapError> {
        match self.state {
            SessionState::Running | SessionState::Paused => Ok(()),
            SessionState::Initializing => Err(DapError::NotInitialized),
            SessionState::Terminating | SessionState::Terminated => Err(DapError::Terminated),
            SessionState::Configuring => Err(DapError::rejected("the debuggee has not started")),
        }
    }

    fn require_configuring(&self) -> Result<(), DapError> {
        match self.state {
            SessionState::Configuring => Ok(()),
            SessionState::Initializing => Err(DapError::NotInitialized),
            SessionState::Terminating | SessionState::Terminated => Err(DapError::Terminated),
            other => Err(DapError::rejected(format!(
                "session is already in {other:?} state"
            ))),
        }
    }

    fn require_not_terminated(&self) -> Result<(), DapError> {
        if matches!(
            self.state,
            SessionState::Terminating | SessionState::Terminated
        ) {
            return Err(DapError::Terminated);
        }
        Ok(())
    }
}

impl Default for DapSession {
    fn default() -> Self {
        Self::new()
    }
}
