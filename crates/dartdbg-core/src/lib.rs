//! dartdbg-core — shared plumbing for the debug bridge crates.
//!
//! Logging helpers and the subscription-handle event emitter used by the
//! test tree and its command-line front end.

pub mod events;
pub mod logging;

pub use events::{Disposables, EventEmitter, Subscription};
