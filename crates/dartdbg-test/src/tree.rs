//! The test tree: suites, nested groups and tests, with status rollup.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Parent
//! links are plain ids, so they never keep a subtree alive; removing a node
//! frees its whole subtree top-down. Slots are never reused, so an id held
//! after its node was removed resolves to `None` instead of a different node.
//!
//! A node's identity is its [`NodeKey`] (suite path plus full test or group
//! name). Re-running a suite finds the existing nodes by key and updates
//! them in place.

use std::collections::HashMap;
use std::fmt;

use dartdbg_core::{EventEmitter, Subscription};

use crate::events::{TestEvent, TestResult};

/// Test status, ordered by severity. A container's status is the maximum
/// over its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TestStatus {
    #[default]
    NotRun,
    Skipped,
    Passed,
    Running,
    Failed,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::NotRun => "not run",
            TestStatus::Skipped => "skipped",
            TestStatus::Passed => "passed",
            TestStatus::Running => "running",
            TestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Suite,
    Group,
    Test,
}

/// Identity of a node across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub suite_path: String,
    /// Fully qualified group or test name; empty for the suite itself.
    pub name: String,
}

impl NodeKey {
    pub fn suite(path: impl Into<String>) -> Self {
        Self {
            suite_path: path.into(),
            name: String::new(),
        }
    }

    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            suite_path: path.into(),
            name: name.into(),
        }
    }

    /// String form suitable as a UI tree item id.
    pub fn stable_id(&self) -> String {
        if self.name.is_empty() {
            self.suite_path.clone()
        } else {
            format!("{}::{}", self.suite_path, self.name)
        }
    }
}

/// An error or failure reported against a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub message: String,
    pub stack_trace: String,
    /// `false` for unexpected errors, `true` for failed expectations.
    pub is_failure: bool,
}

#[derive(Debug, Clone)]
pub struct TestNode {
    pub id: NodeId,
    pub key: NodeKey,
    pub kind: NodeKind,
    /// Name relative to the parent group.
    pub label: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub status: TestStatus,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub output: Vec<String>,
    pub failures: Vec<TestFailure>,
}

/// Which part of the tree changed. `None` means the list of suites itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeChange {
    pub node: Option<NodeId>,
}

/// Reporter ids of one run mapped to tree nodes.
///
/// Reporter ids are only unique within a single `dart test` invocation, so
/// every run keeps its own mapping.
#[derive(Debug, Default)]
pub struct RunIds {
    suites: HashMap<i64, NodeId>,
    groups: HashMap<i64, NodeId>,
    tests: HashMap<i64, NodeId>,
}

impl RunIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suite(&self, suite_id: i64) -> Option<NodeId> {
        self.suites.get(&suite_id).copied()
    }

    pub fn test(&self, test_id: i64) -> Option<NodeId> {
        self.tests.get(&test_id).copied()
    }
}

#[derive(Debug, Default)]
pub struct TestTree {
    nodes: Vec<Option<TestNode>>,
    index: HashMap<NodeKey, NodeId>,
    roots: Vec<NodeId>,
    on_did_change: EventEmitter<TreeChange>,
}

fn relative_label(parent_name: &str, full_name: &str) -> String {
    if parent_name.is_empty() {
        return full_name.to_string();
    }
    full_name
        .strip_prefix(parent_name)
        .and_then(|rest| rest.strip_prefix(' '))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(full_name)
        .to_string()
}

impl TestTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the smallest changed subtree after every mutation.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_did_change(&self, listener: impl Fn(&TreeChange) + Send + Sync + 'static) -> Subscription {
        self.on_did_change.subscribe(listener)
    }

    pub fn node(&self, id: NodeId) -> Option<&TestNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn find(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn status(&self, id: NodeId) -> Option<TestStatus> {
        self.node(id).map(|n| n.status)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The suite node `id` belongs to.
    pub fn suite_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            current = self.node(parent)?;
        }
        Some(current.id)
    }

    /// Every live test node under `id`, depth first.
    pub fn tests_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.node(next) else { continue };
            if node.kind == NodeKind::Test {
                out.push(next);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut TestNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.node(id).and_then(|n| n.parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.node(parent).and_then(|n| n.parent);
        }
        depth
    }

    /// The shallower of two nodes on the same ancestor chain.
    fn higher(&self, a: Option<NodeId>, b: Option<NodeId>) -> Option<NodeId> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if self.depth(a) <= self.depth(b) { a } else { b }),
            (a, None) => a,
            (None, b) => b,
        }
    }

    fn emit(&self, change: TreeChange) {
        self.on_did_change.emit(&change);
    }

    /// Find the node for `key`, creating it under `parent` when missing.
    /// Returns the id and whether it was created.
    fn ensure_node(
        &mut self,
        key: NodeKey,
        kind: NodeKind,
        label: String,
        parent: Option<NodeId>,
    ) -> (NodeId, bool) {
        if let Some(id) = self.find(&key) {
            if let Some(node) = self.node_mut(id) {
                node.label = label;
            }
            return (id, false);
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(TestNode {
            id,
            key: key.clone(),
            kind,
            label,
            parent,
            children: Vec::new(),
            status: TestStatus::NotRun,
            line: None,
            column: None,
            output: Vec::new(),
            failures: Vec::new(),
        }));
        self.index.insert(key, id);
        match parent.and_then(|p| self.node_mut(p)) {
            Some(parent) => parent.children.push(id),
            None => self.roots.push(id),
        }
        (id, true)
    }

    /// Recompute container statuses from `from` upward, stopping at the
    /// first one that does not change. Returns the highest changed node.
    fn rollup(&mut self, from: Option<NodeId>) -> Option<NodeId> {
        let mut changed = None;
        let mut current = from;
        while let Some(id) = current {
            let Some(node) = self.node(id) else { break };
            if node.kind == NodeKind::Test {
                break;
            }
            let status = node
                .children
                .iter()
                .filter_map(|c| self.status(*c))
                .max()
                .unwrap_or_default();
            let parent = node.parent;
            let Some(node) = self.node_mut(id) else { break };
            if node.status == status {
                break;
            }
            node.status = status;
            changed = Some(id);
            current = parent;
        }
        changed
    }

    /// Set a test's status and roll it up. Returns the highest changed node.
    fn set_test_status(&mut self, id: NodeId, status: TestStatus) -> Option<NodeId> {
        let node = self.node_mut(id)?;
        if node.status == status {
            return None;
        }
        node.status = status;
        let parent = node.parent;
        self.rollup(parent).or(Some(id))
    }

    /// Drop `id` and its subtree. Returns the highest changed node, or
    /// `None` when the suite list changed.
    fn remove_node(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id).and_then(|n| n.parent);
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(next.0).and_then(Option::take) {
                self.index.remove(&node.key);
                stack.extend(node.children);
            }
        }
        match parent {
            Some(parent) => {
                if let Some(p) = self.node_mut(parent) {
                    p.children.retain(|c| *c != id);
                }
                let changed = self.rollup(Some(parent));
                self.higher(Some(parent), changed)
            }
            None => {
                self.roots.retain(|r| *r != id);
                None
            }
        }
    }

    /// Remove a suite and everything under it.
    pub fn remove_suite(&mut self, path: &str) -> bool {
        let Some(id) = self.find(&NodeKey::suite(path)) else {
            return false;
        };
        self.remove_node(id);
        self.emit(TreeChange { node: None });
        true
    }

    /// Drop every node, suites first.
    pub fn clear(&mut self) {
        for root in std::mem::take(&mut self.roots) {
            self.remove_node(root);
        }
        self.emit(TreeChange { node: None });
    }

    /// Fold one reporter event into the tree and notify listeners.
    ///
    /// Returns the change that was emitted, if any.
    pub fn apply_event(&mut self, ids: &mut RunIds, event: &TestEvent) -> Option<TreeChange> {
        let change = match event {
            TestEvent::Suite { suite } => {
                let path = suite
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("suite {}", suite.id));
                let (id, created) =
                    self.ensure_node(NodeKey::suite(path.clone()), NodeKind::Suite, path, None);
                ids.suites.insert(suite.id, id);
                created.then_some(TreeChange { node: None })
            }
            TestEvent::Group { group } => {
                let suite = ids.suite(group.suite_id)?;
                if group.parent_id.is_none() || group.name.is_empty() {
                    // The implicit root group of a suite is the suite.
                    ids.groups.insert(group.id, suite);
                    return None;
                }
                let parent = group
                    .parent_id
                    .and_then(|p| ids.groups.get(&p).copied())
                    .unwrap_or(suite);
                let parent_node = self.node(parent)?;
                let key = NodeKey::new(parent_node.key.suite_path.clone(), group.name.clone());
                let label = relative_label(&parent_node.key.name, &group.name);
                let (id, created) = self.ensure_node(key, NodeKind::Group, label, Some(parent));
                if let Some(node) = self.node_mut(id) {
                    node.line = group.line;
                    node.column = group.column;
                }
                ids.groups.insert(group.id, id);
                created.then_some(TreeChange { node: Some(parent) })
            }
            TestEvent::TestStart { test } => {
                let suite = ids.suite(test.suite_id)?;
                let parent = test
                    .group_ids
                    .last()
                    .and_then(|g| ids.groups.get(g).copied())
                    .unwrap_or(suite);
                let parent_node = self.node(parent)?;
                let key = NodeKey::new(parent_node.key.suite_path.clone(), test.name.clone());
                let label = relative_label(&parent_node.key.name, &test.name);
                let (id, created) = self.ensure_node(key, NodeKind::Test, label, Some(parent));
                let (line, column) = test.location();
                if let Some(node) = self.node_mut(id) {
                    node.line = line;
                    node.column = column;
                    node.output.clear();
                    node.failures.clear();
                }
                ids.tests.insert(test.id, id);
                let changed = self.set_test_status(id, TestStatus::Running);
                let top = if created {
                    self.higher(Some(parent), changed)
                } else {
                    changed.or(Some(id))
                };
                Some(TreeChange { node: top })
            }
            TestEvent::Print { test_id, message, .. } => {
                let id = ids.test(*test_id)?;
                self.node_mut(id)?.output.push(message.clone());
                Some(TreeChange { node: Some(id) })
            }
            TestEvent::Error {
                test_id,
                error,
                stack_trace,
                is_failure,
            } => {
                let id = ids.test(*test_id)?;
                let node = self.node_mut(id)?;
                node.failures.push(TestFailure {
                    message: error.clone(),
                    stack_trace: stack_trace.clone(),
                    is_failure: *is_failure,
                });
                // An error after the test finished still fails it.
                let changed = if node.status == TestStatus::Passed {
                    self.set_test_status(id, TestStatus::Failed)
                } else {
                    None
                };
                Some(TreeChange {
                    node: changed.or(Some(id)),
                })
            }
            TestEvent::TestDone {
                test_id,
                result,
                skipped,
                hidden,
            } => {
                let id = ids.test(*test_id)?;
                self.node(id)?;
                if *hidden {
                    ids.tests.remove(test_id);
                    Some(TreeChange {
                        node: self.remove_node(id),
                    })
                } else {
                    let status = match (skipped, result) {
                        (true, _) => TestStatus::Skipped,
                        (false, TestResult::Success) => TestStatus::Passed,
                        (false, TestResult::Failure | TestResult::Error) => TestStatus::Failed,
                    };
                    let changed = self.set_test_status(id, status);
                    changed.map(|node| TreeChange { node: Some(node) })
                }
            }
            TestEvent::SuiteDone { suite_id } => {
                let suite = ids.suite(*suite_id)?;
                let tests: Vec<NodeId> = self
                    .tests_under(suite)
                    .into_iter()
                    .filter(|t| ids.tests.values().any(|id| id == t))
                    .collect();
                self.settle(&tests)
                    .then_some(TreeChange { node: Some(suite) })
            }
            TestEvent::Done { .. } => {
                let tests: Vec<NodeId> = ids.tests.values().copied().collect();
                self.settle(&tests).then_some(TreeChange { node: None })
            }
            TestEvent::Start { .. } | TestEvent::AllSuites { .. } | TestEvent::Unknown => None,
        };
        if let Some(change) = change {
            self.emit(change);
        }
        change
    }

    /// Tests still running when their run ended never got a result.
    fn settle(&mut self, tests: &[NodeId]) -> bool {
        let mut any = false;
        for id in tests {
            if self.status(*id) == Some(TestStatus::Running) {
                self.set_test_status(*id, TestStatus::NotRun);
                any = true;
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::parse_line;
    use std::sync::{Arc, Mutex};

    fn feed(tree: &mut TestTree, ids: &mut RunIds, lines: &[&str]) {
        for line in lines {
            let event = parse_line(line).unwrap().unwrap();
            tree.apply_event(ids, &event);
        }
    }

    const SUITE: &str = r#"{"type":"suite","suite":{"id":0,"platform":"vm","path":"test/math_test.dart"}}"#;
    const ROOT_GROUP: &str = r#"{"type":"group","group":{"id":1,"suiteID":0,"parentID":null,"name":"","testCount":2}}"#;
    const GROUP: &str = r#"{"type":"group","group":{"id":2,"suiteID":0,"parentID":1,"name":"math","testCount":2,"line":4,"column":3}}"#;
    const ADD_START: &str = r#"{"type":"testStart","test":{"id":3,"name":"math adds","suiteID":0,"groupIDs":[1,2],"line":5,"column":5}}"#;
    const SUB_START: &str = r#"{"type":"testStart","test":{"id":4,"name":"math subtracts","suiteID":0,"groupIDs":[1,2],"line":9,"column":5}}"#;

    fn done(id: i64, result: &str) -> String {
        format!(r#"{{"type":"testDone","testID":{id},"result":"{result}","skipped":false,"hidden":false}}"#)
    }

    #[test]
    fn builds_suite_group_test_hierarchy() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(&mut tree, &mut ids, &[SUITE, ROOT_GROUP, GROUP, ADD_START]);

        let suite = tree.find(&NodeKey::suite("test/math_test.dart")).unwrap();
        assert_eq!(tree.roots(), &[suite]);
        // The root group is folded into the suite.
        let groups = tree.children(suite);
        assert_eq!(groups.len(), 1);
        let group = tree.node(groups[0]).unwrap();
        assert_eq!(group.kind, NodeKind::Group);
        assert_eq!(group.label, "math");
        assert_eq!(group.line, Some(4));

        let test = tree.node(group.children[0]).unwrap();
        assert_eq!(test.label, "adds");
        assert_eq!(test.key.stable_id(), "test/math_test.dart::math adds");
        assert_eq!(test.parent, Some(group.id));
        assert_eq!(tree.status(suite), Some(TestStatus::Running));
        assert_eq!(tree.suite_of(test.id), Some(suite));
    }

    #[test]
    fn failed_dominates_rollup() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(&mut tree, &mut ids, &[SUITE, ROOT_GROUP, GROUP, ADD_START, SUB_START]);
        feed(&mut tree, &mut ids, &[done(3, "failure").as_str()]);
        let suite = tree.find(&NodeKey::suite("test/math_test.dart")).unwrap();
        let group = tree.find(&NodeKey::new("test/math_test.dart", "math")).unwrap();
        assert_eq!(tree.status(group), Some(TestStatus::Failed));

        feed(&mut tree, &mut ids, &[done(4, "success").as_str()]);
        assert_eq!(tree.status(group), Some(TestStatus::Failed));
        assert_eq!(tree.status(suite), Some(TestStatus::Failed));
    }

    #[test]
    fn running_dominates_passed_and_skipped() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        let skipped = r#"{"type":"testDone","testID":3,"result":"success","skipped":true,"hidden":false}"#;
        feed(&mut tree, &mut ids, &[SUITE, ROOT_GROUP, GROUP, ADD_START, SUB_START, skipped]);
        let group = tree.find(&NodeKey::new("test/math_test.dart", "math")).unwrap();
        let add = tree.find(&NodeKey::new("test/math_test.dart", "math adds")).unwrap();
        assert_eq!(tree.status(add), Some(TestStatus::Skipped));
        assert_eq!(tree.status(group), Some(TestStatus::Running));

        feed(&mut tree, &mut ids, &[done(4, "success").as_str()]);
        assert_eq!(tree.status(group), Some(TestStatus::Passed));
    }

    #[test]
    fn rerun_reuses_node_identity() {
        let mut tree = TestTree::new();
        let mut first = RunIds::new();
        feed(&mut tree, &mut first, &[SUITE, ROOT_GROUP, GROUP, ADD_START, done(3, "failure").as_str()]);
        let key = NodeKey::new("test/math_test.dart", "math adds");
        let before = tree.find(&key).unwrap();
        let count = tree.len();

        // A second run numbers everything differently.
        let mut second = RunIds::new();
        feed(
            &mut tree,
            &mut second,
            &[
                r#"{"type":"suite","suite":{"id":7,"path":"test/math_test.dart"}}"#,
                r#"{"type":"group","group":{"id":8,"suiteID":7,"parentID":null,"name":""}}"#,
                r#"{"type":"group","group":{"id":9,"suiteID":7,"parentID":8,"name":"math"}}"#,
                r#"{"type":"testStart","test":{"id":10,"name":"math adds","suiteID":7,"groupIDs":[8,9]}}"#,
            ],
        );
        assert_eq!(tree.find(&key), Some(before));
        assert_eq!(tree.len(), count);
        assert_eq!(tree.status(before), Some(TestStatus::Running));
        assert!(tree.node(before).unwrap().failures.is_empty());

        feed(&mut tree, &mut second, &[done(10, "success").as_str()]);
        assert_eq!(tree.status(before), Some(TestStatus::Passed));
    }

    #[test]
    fn hidden_tests_are_removed() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(
            &mut tree,
            &mut ids,
            &[
                SUITE,
                r#"{"type":"testStart","test":{"id":9,"name":"loading test/math_test.dart","suiteID":0,"groupIDs":[]}}"#,
                r#"{"type":"testDone","testID":9,"result":"success","skipped":false,"hidden":true}"#,
            ],
        );
        let suite = tree.find(&NodeKey::suite("test/math_test.dart")).unwrap();
        assert!(tree.children(suite).is_empty());
        assert_eq!(tree.status(suite), Some(TestStatus::NotRun));
        assert!(tree
            .find(&NodeKey::new("test/math_test.dart", "loading test/math_test.dart"))
            .is_none());
    }

    #[test]
    fn output_and_errors_attach_to_the_test() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(
            &mut tree,
            &mut ids,
            &[
                SUITE,
                ROOT_GROUP,
                GROUP,
                ADD_START,
                r#"{"type":"print","testID":3,"messageType":"print","message":"hello"}"#,
                r#"{"type":"error","testID":3,"error":"Expected: <2>","stackTrace":"test/math_test.dart 6:7","isFailure":true}"#,
                done(3, "failure").as_str(),
            ],
        );
        let add = tree.find(&NodeKey::new("test/math_test.dart", "math adds")).unwrap();
        let node = tree.node(add).unwrap();
        assert_eq!(node.output, vec!["hello".to_string()]);
        assert_eq!(node.failures.len(), 1);
        assert_eq!(node.failures[0].message, "Expected: <2>");
        assert!(node.failures[0].is_failure);
    }

    #[test]
    fn late_error_fails_a_passed_test() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(
            &mut tree,
            &mut ids,
            &[
                SUITE,
                ROOT_GROUP,
                GROUP,
                ADD_START,
                done(3, "success").as_str(),
                r#"{"type":"error","testID":3,"error":"Bad state","stackTrace":"","isFailure":false}"#,
            ],
        );
        let suite = tree.find(&NodeKey::suite("test/math_test.dart")).unwrap();
        assert_eq!(tree.status(suite), Some(TestStatus::Failed));
    }

    #[test]
    fn change_notifications_name_the_smallest_subtree() {
        let mut tree = TestTree::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            tree.on_did_change(move |change| seen.lock().unwrap().push(change.node))
        };
        let mut ids = RunIds::new();
        feed(&mut tree, &mut ids, &[SUITE, ROOT_GROUP, GROUP, ADD_START, SUB_START]);
        let suite = tree.find(&NodeKey::suite("test/math_test.dart")).unwrap();
        let group = tree.find(&NodeKey::new("test/math_test.dart", "math")).unwrap();
        let sub = tree.find(&NodeKey::new("test/math_test.dart", "math subtracts")).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                None,        // suite added
                Some(suite), // group added
                Some(suite), // first test: running reaches the suite
                Some(group), // second test: new child, statuses unchanged
            ]
        );

        seen.lock().unwrap().clear();
        feed(&mut tree, &mut ids, &[done(3, "success").as_str()]);
        // The group is still running because of its sibling.
        let add = tree.find(&NodeKey::new("test/math_test.dart", "math adds")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Some(add)]);

        seen.lock().unwrap().clear();
        feed(&mut tree, &mut ids, &[done(4, "success").as_str()]);
        assert_eq!(*seen.lock().unwrap(), vec![Some(suite)]);
        assert_ne!(sub, add);
    }

    #[test]
    fn done_settles_tests_without_results() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(
            &mut tree,
            &mut ids,
            &[SUITE, ROOT_GROUP, GROUP, ADD_START, r#"{"type":"done","success":false}"#],
        );
        let add = tree.find(&NodeKey::new("test/math_test.dart", "math adds")).unwrap();
        assert_eq!(tree.status(add), Some(TestStatus::NotRun));
    }

    #[test]
    fn remove_suite_drops_the_subtree() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        feed(&mut tree, &mut ids, &[SUITE, ROOT_GROUP, GROUP, ADD_START]);
        let add = tree.find(&NodeKey::new("test/math_test.dart", "math adds")).unwrap();

        assert!(tree.remove_suite("test/math_test.dart"));
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
        assert!(tree.node(add).is_none());
        assert!(!tree.remove_suite("test/math_test.dart"));
    }

    #[test]
    fn events_for_unknown_ids_are_ignored() {
        let mut tree = TestTree::new();
        let mut ids = RunIds::new();
        let event = parse_line(done(42, "success").as_str()).unwrap().unwrap();
        assert!(tree.apply_event(&mut ids, &event).is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn labels_strip_the_parent_name() {
        assert_eq!(relative_label("math", "math adds"), "adds");
        assert_eq!(relative_label("", "top level"), "top level");
        assert_eq!(relative_label("math", "mathematics"), "mathematics");
        assert_eq!(relative_label("math", "math"), "math");
    }
}
