//! Sequencing of test runs against one [`TestTree`].
//!
//! Several `dart test` invocations may report at once. Each run gets a
//! [`RunId`]; run ids increase, and a suite belongs to the newest run that
//! claimed it. Events from an older run for a suite it no longer owns are
//! dropped, so a superseded run can never overwrite newer results.

use std::collections::HashMap;
use std::fmt;

use dartdbg_core::{EventEmitter, Subscription};
use tracing::{debug, trace, warn};

use crate::error::TestError;
use crate::events::{parse_line, TestEvent, TestResult};
use crate::tree::{NodeId, RunIds, TestTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {}", self.0)
    }
}

/// Payload of the "tests started" and "first failure" signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSignal {
    pub run: RunId,
    pub node: NodeId,
    /// Fully qualified test name.
    pub name: String,
}

/// Counts for one finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// The runner's own verdict from its `done` event, if it sent one.
    pub success: Option<bool>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(self.failed == 0)
    }
}

#[derive(Debug, Default)]
struct RunState {
    ids: RunIds,
    suite_paths: HashMap<i64, String>,
    test_suites: HashMap<i64, i64>,
    started: bool,
    failed: bool,
    summary: RunSummary,
}

impl RunState {
    fn suite_path_of(&self, event: &TestEvent) -> Option<&str> {
        let suite_id = match event {
            TestEvent::Group { group } => group.suite_id,
            TestEvent::TestStart { test } => test.suite_id,
            TestEvent::Print { test_id, .. }
            | TestEvent::Error { test_id, .. }
            | TestEvent::TestDone { test_id, .. } => *self.test_suites.get(test_id)?,
            TestEvent::SuiteDone { suite_id } => *suite_id,
            _ => return None,
        };
        self.suite_paths.get(&suite_id).map(String::as_str)
    }
}

/// Owns the test tree and the runs reporting into it.
#[derive(Debug, Default)]
pub struct TestSessionCoordinator {
    tree: TestTree,
    next_run: u64,
    runs: HashMap<RunId, RunState>,
    owners: HashMap<String, RunId>,
    on_tests_started: EventEmitter<TestSignal>,
    on_first_failure: EventEmitter<TestSignal>,
}

impl TestSessionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    /// Fired once per run, when its first real test starts.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_tests_started(&self, listener: impl Fn(&TestSignal) + Send + Sync + 'static) -> Subscription {
        self.on_tests_started.subscribe(listener)
    }

    /// Fired once per run, for its first failing test.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_first_failure(&self, listener: impl Fn(&TestSignal) + Send + Sync + 'static) -> Subscription {
        self.on_first_failure.subscribe(listener)
    }

    /// Start a run. `suites` are the suite paths it is known to cover; they
    /// are claimed immediately so older runs stop reporting into them.
    /// Suites announced later by the runner are claimed as they appear.
    pub fn begin_run(&mut self, suites: &[String]) -> RunId {
        self.next_run += 1;
        let run = RunId(self.next_run);
        for path in suites {
            self.owners.insert(path.clone(), run);
        }
        self.runs.insert(run, RunState::default());
        debug!("{run} started for {suites:?}");
        run
    }

    pub fn is_active(&self, run: RunId) -> bool {
        self.runs.contains_key(&run)
    }

    /// The run whose results `path` currently shows.
    pub fn owner_of(&self, path: &str) -> Option<RunId> {
        self.owners.get(path).copied()
    }

    /// Parse and apply one line of reporter output.
    pub fn handle_line(&mut self, run: RunId, line: &str) -> Result<(), TestError> {
        match parse_line(line)? {
            Some(event) => self.handle_event(run, &event),
            None => {
                trace!("{run}: ignoring non-event output {line:?}");
                Ok(())
            }
        }
    }

    pub fn handle_event(&mut self, run: RunId, event: &TestEvent) -> Result<(), TestError> {
        let Self {
            tree,
            runs,
            owners,
            on_tests_started,
            on_first_failure,
            ..
        } = self;
        let state = runs.get_mut(&run).ok_or(TestError::UnknownRun(run.0))?;

        match event {
            TestEvent::Suite { suite } => {
                let path = suite
                    .path
                    .clone()
                    .unwrap_or_else(|| format!("suite {}", suite.id));
                state.suite_paths.insert(suite.id, path.clone());
                if let Some(owner) = owners.get(&path).copied().filter(|owner| *owner > run) {
                    debug!("{run}: {path} superseded by {owner}");
                    return Ok(());
                }
                owners.insert(path, run);
            }
            TestEvent::TestStart { test } => {
                state.test_suites.insert(test.id, test.suite_id);
            }
            TestEvent::Done { success } => {
                state.summary.success = *success;
                // Settle only the suites this run still owns.
                let owned: Vec<i64> = state
                    .suite_paths
                    .iter()
                    .filter(|(_, path)| owners.get(*path) == Some(&run))
                    .map(|(id, _)| *id)
                    .collect();
                for suite_id in owned {
                    tree.apply_event(&mut state.ids, &TestEvent::SuiteDone { suite_id });
                }
                return Ok(());
            }
            _ => {}
        }

        if !matches!(event, TestEvent::Suite { .. }) {
            let Some(path) = state.suite_path_of(event) else {
                return Ok(());
            };
            if owners.get(path) != Some(&run) {
                trace!("{run}: dropping event for superseded suite {path}");
                return Ok(());
            }
        }

        tree.apply_event(&mut state.ids, event);

        match event {
            TestEvent::TestStart { test } if !test.is_synthetic() && !state.started => {
                if let Some(node) = state.ids.test(test.id) {
                    state.started = true;
                    on_tests_started.emit(&TestSignal {
                        run,
                        node,
                        name: test.name.clone(),
                    });
                }
            }
            TestEvent::TestDone {
                test_id,
                result,
                skipped,
                hidden: false,
            } => {
                let summary = &mut state.summary;
                match (skipped, result) {
                    (true, _) => summary.skipped += 1,
                    (false, TestResult::Success) => summary.passed += 1,
                    (false, TestResult::Failure | TestResult::Error) => {
                        summary.failed += 1;
                        if !state.failed {
                            state.failed = true;
                            if let Some(node) = state.ids.test(*test_id) {
                                let name = tree
                                    .node(node)
                                    .map(|n| n.key.name.clone())
                                    .unwrap_or_default();
                                on_first_failure.emit(&TestSignal { run, node, name });
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// End a run and return its counts. Later events for it are rejected.
    pub fn finish_run(&mut self, run: RunId) -> Result<RunSummary, TestError> {
        let state = self.runs.remove(&run).ok_or(TestError::UnknownRun(run.0))?;
        if state.summary.success.is_none() {
            warn!("{run} ended without a done event");
        }
        debug!("{run} finished: {:?}", state.summary);
        Ok(state.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKey, TestStatus};
    use std::sync::{Arc, Mutex};

    const PATH: &str = "test/a_test.dart";

    fn suite(id: i64) -> String {
        format!(r#"{{"type":"suite","suite":{{"id":{id},"path":"{PATH}"}}}}"#)
    }

    fn root_group(id: i64, suite: i64) -> String {
        format!(r#"{{"type":"group","group":{{"id":{id},"suiteID":{suite},"parentID":null,"name":""}}}}"#)
    }

    fn start(id: i64, suite: i64, group: i64, name: &str) -> String {
        format!(
            r#"{{"type":"testStart","test":{{"id":{id},"name":"{name}","suiteID":{suite},"groupIDs":[{group}]}}}}"#
        )
    }

    fn done(id: i64, result: &str) -> String {
        format!(r#"{{"type":"testDone","testID":{id},"result":"{result}","skipped":false,"hidden":false}}"#)
    }

    fn feed(coord: &mut TestSessionCoordinator, run: RunId, lines: &[String]) {
        for line in lines {
            coord.handle_line(run, line).unwrap();
        }
    }

    fn recorder(
        coord: &TestSessionCoordinator,
    ) -> (Arc<Mutex<Vec<String>>>, Subscription, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let started = {
            let log = log.clone();
            coord.on_tests_started(move |s| log.lock().unwrap().push(format!("started {}", s.name)))
        };
        let failed = {
            let log = log.clone();
            coord.on_first_failure(move |s| log.lock().unwrap().push(format!("failed {}", s.name)))
        };
        (log, started, failed)
    }

    #[test]
    fn signals_fire_once_per_run() {
        let mut coord = TestSessionCoordinator::new();
        let (log, _a, _b) = recorder(&coord);
        let run = coord.begin_run(&[]);
        feed(
            &mut coord,
            run,
            &[
                suite(0),
                r#"{"type":"testStart","test":{"id":1,"name":"loading test/a_test.dart","suiteID":0,"groupIDs":[]}}"#.into(),
                r#"{"type":"testDone","testID":1,"result":"success","skipped":false,"hidden":true}"#.into(),
                root_group(2, 0),
                start(3, 0, 2, "one"),
                done(3, "failure"),
                start(4, 0, 2, "two"),
                done(4, "error"),
                start(5, 0, 2, "three"),
                done(5, "success"),
                r#"{"type":"done","success":false}"#.into(),
            ],
        );
        assert_eq!(*log.lock().unwrap(), vec!["started one", "failed one"]);

        let summary = coord.finish_run(run).unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 2);
        assert!(!summary.is_success());
    }

    #[test]
    fn superseded_run_cannot_overwrite_newer_results() {
        let mut coord = TestSessionCoordinator::new();
        let old = coord.begin_run(&[PATH.to_string()]);
        feed(&mut coord, old, &[suite(0), root_group(1, 0), start(2, 0, 1, "t")]);

        let new = coord.begin_run(&[PATH.to_string()]);
        assert_eq!(coord.owner_of(PATH), Some(new));
        feed(&mut coord, new, &[suite(0), root_group(1, 0), start(2, 0, 1, "t")]);

        // The old run finishes late with a failure; it must not land.
        feed(&mut coord, old, &[done(2, "failure"), r#"{"type":"done","success":false}"#.into()]);
        let node = coord.tree().find(&NodeKey::new(PATH, "t")).unwrap();
        assert_eq!(coord.tree().status(node), Some(TestStatus::Running));

        feed(&mut coord, new, &[done(2, "success")]);
        assert_eq!(coord.tree().status(node), Some(TestStatus::Passed));
        assert_eq!(coord.finish_run(old).unwrap().failed, 0);
    }

    #[test]
    fn older_run_does_not_reclaim_a_suite() {
        let mut coord = TestSessionCoordinator::new();
        let old = coord.begin_run(&[]);
        let new = coord.begin_run(&[]);
        feed(&mut coord, new, &[suite(0)]);
        feed(&mut coord, old, &[suite(5), root_group(6, 5), start(7, 5, 6, "t")]);
        assert_eq!(coord.owner_of(PATH), Some(new));
        assert!(coord.tree().find(&NodeKey::new(PATH, "t")).is_none());
    }

    #[test]
    fn unknown_and_finished_runs_are_rejected() {
        let mut coord = TestSessionCoordinator::new();
        let run = coord.begin_run(&[]);
        coord.finish_run(run).unwrap();
        assert!(!coord.is_active(run));
        assert!(matches!(
            coord.handle_line(run, &suite(0)),
            Err(TestError::UnknownRun(_))
        ));
        assert!(coord.finish_run(run).is_err());
    }

    #[test]
    fn malformed_lines_are_errors_and_noise_is_not() {
        let mut coord = TestSessionCoordinator::new();
        let run = coord.begin_run(&[]);
        assert!(coord.handle_line(run, "Building package executable...").is_ok());
        assert!(matches!(
            coord.handle_line(run, r#"{"type":"suite","#),
            Err(TestError::Malformed(_))
        ));
    }

    #[test]
    fn done_leaves_unfinished_tests_not_run() {
        let mut coord = TestSessionCoordinator::new();
        let run = coord.begin_run(&[]);
        feed(
            &mut coord,
            run,
            &[
                suite(0),
                root_group(1, 0),
                start(2, 0, 1, "hangs"),
                r#"{"type":"done","success":false}"#.into(),
            ],
        );
        let node = coord.tree().find(&NodeKey::new(PATH, "hangs")).unwrap();
        assert_eq!(coord.tree().status(node), Some(TestStatus::NotRun));
        assert_eq!(coord.finish_run(run).unwrap().success, Some(false));
    }
}
