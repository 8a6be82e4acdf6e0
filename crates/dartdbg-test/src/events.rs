//! Events of the `package:test` JSON reporter (`dart test --reporter json`).
//!
//! One JSON object per line, discriminated by `type`. Fields this crate
//! does not use (`time`, `metadata`, ...) are ignored, as are event types
//! it does not know.

use serde::Deserialize;

use crate::error::TestError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SuiteInfo {
    pub id: i64,
    pub path: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupInfo {
    pub id: i64,
    #[serde(rename = "suiteID")]
    pub suite_id: i64,
    #[serde(rename = "parentID", default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "testCount", default)]
    pub test_count: Option<u64>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TestInfo {
    pub id: i64,
    pub name: String,
    #[serde(rename = "suiteID")]
    pub suite_id: i64,
    #[serde(rename = "groupIDs", default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    /// Position inside the test file when the declaration lives in a helper.
    #[serde(default)]
    pub root_line: Option<u32>,
    #[serde(default)]
    pub root_column: Option<u32>,
}

impl TestInfo {
    /// The synthetic "loading <path>" test has no groups; every real test
    /// sits at least in its suite's root group.
    pub fn is_synthetic(&self) -> bool {
        self.group_ids.is_empty()
    }

    /// Line and column in the suite file, preferring the root position.
    pub fn location(&self) -> (Option<u32>, Option<u32>) {
        match self.root_line {
            Some(line) => (Some(line), self.root_column),
            None => (self.line, self.column),
        }
    }
}

/// Outcome reported by `testDone`. Skipped tests report `success` with
/// `skipped: true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    Success,
    Failure,
    Error,
}

/// One reporter event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TestEvent {
    Start {
        #[serde(rename = "protocolVersion", default)]
        protocol_version: Option<String>,
        #[serde(rename = "runnerVersion", default)]
        runner_version: Option<String>,
    },
    AllSuites {
        count: u64,
    },
    Suite {
        suite: SuiteInfo,
    },
    Group {
        group: GroupInfo,
    },
    TestStart {
        test: TestInfo,
    },
    Print {
        #[serde(rename = "testID")]
        test_id: i64,
        message: String,
        #[serde(rename = "messageType", default)]
        message_type: Option<String>,
    },
    Error {
        #[serde(rename = "testID")]
        test_id: i64,
        error: String,
        #[serde(rename = "stackTrace", default)]
        stack_trace: String,
        #[serde(rename = "isFailure", default)]
        is_failure: bool,
    },
    TestDone {
        #[serde(rename = "testID")]
        test_id: i64,
        result: TestResult,
        #[serde(default)]
        skipped: bool,
        #[serde(default)]
        hidden: bool,
    },
    /// Not emitted by `package:test` itself; runners that wrap it send it
    /// when one suite's output is complete.
    SuiteDone {
        #[serde(rename = "suiteID")]
        suite_id: i64,
    },
    Done {
        #[serde(default)]
        success: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

/// Parse one line of reporter output.
///
/// Lines that are not JSON objects (blank lines, `pub get` chatter) yield
/// `None`; an object that fails to decode is an error.
pub fn parse_line(line: &str) -> Result<Option<TestEvent>, TestError> {
    let line = line.trim();
    if !line.starts_with('{') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}
