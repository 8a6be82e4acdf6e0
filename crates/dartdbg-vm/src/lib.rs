//! dartdbg-vm — client for the Dart VM service protocol.
//!
//! Speaks JSON-RPC 2.0 over a WebSocket to a running Dart VM, correlates
//! responses with requests, and decodes `streamNotify` events into
//! [`VmEvent`]s. The debug bridge only ever talks to the VM through the
//! [`VmService`] trait, so tests can substitute a mock.

pub mod client;
pub mod dispatcher;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod service;
pub mod transport;
pub mod types;

pub use client::{websocket_uri, VmServiceClient};
pub use error::VmError;
pub use service::{ExceptionPauseMode, StepOption, VmApi, VmService};
pub use types::*;
