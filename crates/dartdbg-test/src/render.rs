//! Plain-text rendering of the tree for the command line.

use std::fmt::Write;

use crate::coordinator::RunSummary;
use crate::tree::{NodeId, NodeKind, TestStatus, TestTree};

pub fn glyph(status: TestStatus) -> &'static str {
    match status {
        TestStatus::NotRun => "·",
        TestStatus::Skipped => "~",
        TestStatus::Passed => "✓",
        TestStatus::Running => "…",
        TestStatus::Failed => "✗",
    }
}

/// One line per node, indented by depth. Failed tests are followed by
/// their errors and printed output.
pub fn render_tree(tree: &TestTree) -> String {
    let mut out = String::new();
    for root in tree.roots() {
        render_node(tree, *root, 0, &mut out);
    }
    out
}

fn render_node(tree: &TestTree, id: NodeId, depth: usize, out: &mut String) {
    let Some(node) = tree.node(id) else { return };
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}{} {}", glyph(node.status), node.label);
    if node.kind == NodeKind::Test && node.status == TestStatus::Failed {
        let detail = "  ".repeat(depth + 2);
        for line in &node.output {
            let _ = writeln!(out, "{detail}{line}");
        }
        for failure in &node.failures {
            for line in failure.message.lines().chain(failure.stack_trace.lines()) {
                let _ = writeln!(out, "{detail}{line}");
            }
        }
    }
    for child in &node.children {
        render_node(tree, *child, depth + 1, out);
    }
}

pub fn render_summary(summary: &RunSummary) -> String {
    let verdict = if summary.is_success() {
        "All tests passed"
    } else {
        "Some tests failed"
    };
    format!(
        "{verdict}: {} passed, {} failed, {} skipped",
        summary.passed, summary.failed, summary.skipped
    )
}
