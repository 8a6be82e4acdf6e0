//! dartdbg-dap — Debug Adapter Protocol server for Dart programs.
//!
//! Editors speak DAP on stdio; this crate translates requests into Dart VM
//! service calls and VM stream events back into DAP events. It owns session
//! state, breakpoints, frame pagination, variable expansion and source
//! mapping for SDK and package code.

pub mod adapter;
pub mod breakpoint;
pub mod capabilities;
pub mod classifier;
pub mod error;
pub mod evaluator;
pub mod frames;
pub mod handles;
pub mod isolates;
pub mod launch;
pub mod packages;
pub mod protocol;
pub mod server;
pub mod session;
pub mod source;
pub mod transport;
pub mod variables;
mod vm_events;

pub use adapter::{AdapterSettings, DebugAdapter, VmConnection, VmConnector, WebSocketConnector};
pub use breakpoint::{Breakpoint, BreakpointManager};
pub use classifier::{classify, source_kind, Classification, DebugOptions, SourceKind};
pub use error::DapError;
pub use server::serve;
pub use session::{DapSession, SessionMode, SessionState};
