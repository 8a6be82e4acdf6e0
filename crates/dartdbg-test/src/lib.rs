//! dartdbg-test — the test result tree.
//!
//! Parses the `package:test` JSON reporter stream, folds it into a tree of
//! suites, groups and tests with status rollup, and coordinates overlapping
//! runs so that a superseded run never reports into the tree.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod render;
pub mod runner;
pub mod tree;

pub use coordinator::{RunId, RunSummary, TestSessionCoordinator, TestSignal};
pub use error::TestError;
pub use events::{parse_line, TestEvent};
pub use tree::{
    NodeId, NodeKey, NodeKind, RunIds, TestFailure, TestNode, TestStatus, TestTree, TreeChange,
};
