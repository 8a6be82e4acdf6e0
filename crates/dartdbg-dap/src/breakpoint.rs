//! Editor breakpoints and their VM counterparts.
//!
//! The editor owns breakpoints per file; each one maps to at most one VM
//! breakpoint per isolate. VM ids are tracked so pause events and
//! `BreakpointResolved` notifications can be traced back to the editor's id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::evaluator::{parse_log_template, LogSegment};
use crate::protocol::{self, SourceBreakpoint};

/// An editor breakpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    /// DAP id, unique for the session.
    pub id: i64,
    pub path: PathBuf,
    /// URI handed to `addBreakpointWithScriptUri`.
    pub script_uri: String,
    /// Requested line (1-based).
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    /// Parsed logpoint template.
    pub log_message: Option<Vec<LogSegment>>,
    /// Set once any isolate resolved it.
    pub verified: bool,
    pub resolved_line: Option<i64>,
    pub resolved_column: Option<i64>,
    /// VM breakpoint id per isolate id.
    pub vm_ids: HashMap<String, String>,
}

impl Breakpoint {
    fn new(id: i64, path: PathBuf, script_uri: String, source: &SourceBreakpoint) -> Self {
        Self {
            id,
            path,
            script_uri,
            line: source.line,
            column: source.column,
            condition: source
                .condition
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            log_message: source
                .log_message
                .as_deref()
                .filter(|m| !m.is_empty())
                .map(parse_log_template),
            verified: false,
            resolved_line: None,
            resolved_column: None,
            vm_ids: HashMap::new(),
        }
    }

    pub fn is_logpoint(&self) -> bool {
        self.log_message.is_some()
    }

    /// The DAP view of this breakpoint.
    pub fn to_dap(&self) -> protocol::Breakpoint {
        protocol::Breakpoint {
            id: Some(self.id),
            verified: self.verified,
            message: None,
            source: None,
            line: Some(self.resolved_line.unwrap_or(self.line)),
            column: self.resolved_column.or(self.column),
        }
    }
}

/// Breakpoints across files for one debug session.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    next_id: i64,
    breakpoints: HashMap<PathBuf, Vec<Breakpoint>>,
    /// VM breakpoint id to (path, DAP id).
    vm_index: HashMap<String, (PathBuf, i64)>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the breakpoints of `path`. Returns the new set and the
    /// replaced set, whose VM breakpoints the caller must remove.
    pub fn set_for_file(
        &mut self,
        path: &Path,
        script_uri: &str,
        requested: &[SourceBreakpoint],
    ) -> (Vec<Breakpoint>, Vec<Breakpoint>) {
        let removed = self.clear_file(path);
        let added: Vec<Breakpoint> = requested
            .iter()
            .map(|source| {
                self.next_id += 1;
                Breakpoint::new(self.next_id, path.to_path_buf(), script_uri.to_string(), source)
            })
            .collect();
        if !added.is_empty() {
            self.breakpoints.insert(path.to_path_buf(), added.clone());
        }
        (added, removed)
    }

    /// Remove all breakpoints for `path`, returning them.
    pub fn clear_file(&mut self, path: &Path) -> Vec<Breakpoint> {
        let removed = self.breakpoints.remove(path).unwrap_or_default();
        for bp in &removed {
            for vm_id in bp.vm_ids.values() {
                self.vm_index.remove(vm_id);
            }
        }
        removed
    }

    pub fn get_for_file(&self, path: &Path) -> &[Breakpoint] {
        self.breakpoints.get(path).map_or(&[], |v| v.as_slice())
    }

    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values().flat_map(|v| v.iter())
    }

    fn get_mut(&mut self, path: &Path, id: i64) -> Option<&mut Breakpoint> {
        self.breakpoints
            .get_mut(path)
            .and_then(|list| list.iter_mut().find(|bp| bp.id == id))
    }

    /// Whether `id` still exists. Breakpoints replaced while an
    /// `addBreakpoint` call was in flight do not.
    pub fn contains(&self, path: &Path, id: i64) -> bool {
        self.get_for_file(path).iter().any(|bp| bp.id == id)
    }

    /// Record the VM breakpoint installed for `id` in `isolate_id`.
    /// Returns the updated breakpoint, or `None` if it was replaced.
    pub fn record_vm_breakpoint(
        &mut self,
        path: &Path,
        id: i64,
        isolate_id: &str,
        vm_breakpoint: &dartdbg_vm::Breakpoint,
    ) -> Option<Breakpoint> {
        let bp = self.get_mut(path, id)?;
        bp.vm_ids
            .insert(isolate_id.to_string(), vm_breakpoint.id.clone());
        if vm_breakpoint.resolved {
            bp.verified = true;
            if let Some(location) = &vm_breakpoint.location {
                bp.resolved_line = location.line.or(bp.resolved_line);
                bp.resolved_column = location.column.or(bp.resolved_column);
            }
        }
        let updated = bp.clone();
        self.vm_index
            .insert(vm_breakpoint.id.clone(), (path.to_path_buf(), id));
        Some(updated)
    }

    /// The editor breakpoint behind a VM breakpoint id.
    pub fn find_by_vm_id(&self, vm_id: &str) -> Option<&Breakpoint> {
        let (path, id) = self.vm_index.get(vm_id)?;
        self.get_for_file(path).iter().find(|bp| bp.id == *id)
    }

    /// Apply a `BreakpointResolved` notification. Returns the breakpoint
    /// when its visible state changed.
    pub fn mark_resolved(
        &mut self,
        vm_breakpoint: &dartdbg_vm::Breakpoint,
    ) -> Option<Breakpoint> {
        let (path, id) = self.vm_index.get(&vm_breakpoint.id).cloned()?;
        let bp = self.get_mut(&path, id)?;
        let line = vm_breakpoint.location.as_ref().and_then(|l| l.line);
        let column = vm_breakpoint.location.as_ref().and_then(|l| l.column);
        if bp.verified && bp.resolved_line == line.or(bp.resolved_line) {
            return None;
        }
        bp.verified = true;
        bp.resolved_line = line.or(bp.resolved_line);
        bp.resolved_column = column.or(bp.resolved_column);
        Some(bp.clone())
    }

    /// Forget VM ids belonging to an isolate that exited.
    pub fn remove_isolate(&mut self, isolate_id: &str) {
        for bp in self.breakpoints.values_mut().flat_map(|v| v.iter_mut()) {
            if let Some(vm_id) = bp.vm_ids.remove(isolate_id) {
                self.vm_index.remove(&vm_id);
            }
        }
    }

    /// VM breakpoint ids installed in `isolate_id`.
    pub fn vm_ids_for_isolate(&self, isolate_id: &str) -> Vec<String> {
        self.all()
            .filter_map(|bp| bp.vm_ids.get(isolate_id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_path(name: &str) -> PathBuf {
        PathBuf::from(format!("/src/{name}"))
    }

    fn source(line: i64) -> SourceBreakpoint {
        serde_json::from_value(json!({ "line": line })).unwrap()
    }

    fn vm_bp(id: &str, resolved: bool, line: Option<i64>) -> dartdbg_vm::Breakpoint {
        serde_json::from_value(json!({
            "type": "Breakpoint",
            "id": id,
            "resolved": resolved,
            "location": { "line": line, "scriptUri": "file:///src/main.dart" }
        }))
        .unwrap()
    }

    #[test]
    fn set_replaces_and_assigns_fresh_ids() {
        let mut mgr = BreakpointManager::new();
        let path = test_path("main.dart");

        let (added, removed) =
            mgr.set_for_file(&path, "file:///src/main.dart", &[source(10), source(20)]);
        assert_eq!(added.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(removed.is_empty());
        assert!(added.iter().all(|b| !b.verified));

        let (added, removed) = mgr.set_for_file(&path, "file:///src/main.dart", &[source(30)]);
        assert_eq!(added[0].id, 3);
        assert_eq!(removed.len(), 2);
        assert_eq!(mgr.get_for_file(&path).len(), 1);
        assert!(!mgr.contains(&path, 1));
    }

    #[test]
    fn condition_and_logpoint_are_parsed() {
        let mut mgr = BreakpointManager::new();
        let path = test_path("main.dart");
        let requested: Vec<SourceBreakpoint> = serde_json::from_value(json!([
            { "line": 1, "condition": "  x > 1 " },
            { "line": 2, "condition": "", "logMessage": "x is {x}" }
        ]))
        .unwrap();
        let (added, _) = mgr.set_for_file(&path, "file:///src/main.dart", &requested);
        assert_eq!(added[0].condition.as_deref(), Some("x > 1"));
        assert!(!added[0].is_logpoint());
        assert!(added[1].condition.is_none());
        assert!(added[1].is_logpoint());
    }

    #[test]
    fn vm_ids_map_back_to_editor_breakpoints() {
        let mut mgr = BreakpointManager::new();
        let path = test_path("main.dart");
        let (added, _) = mgr.set_for_file(&path, "file:///src/main.dart", &[source(5)]);
        let id = added[0].id;

        let updated = mgr
            .record_vm_breakpoint(&path, id, "isolates/1", &vm_bp("breakpoints/7", false, None))
            .unwrap();
        assert!(!updated.verified);
        assert_eq!(mgr.find_by_vm_id("breakpoints/7").map(|b| b.id), Some(id));
        assert_eq!(mgr.vm_ids_for_isolate("isolates/1"), vec!["breakpoints/7"]);

        let resolved = mgr.mark_resolved(&vm_bp("breakpoints/7", true, Some(6))).unwrap();
        assert!(resolved.verified);
        assert_eq!(resolved.to_dap().line, Some(6));
        // A second identical notification changes nothing.
        assert!(mgr.mark_resolved(&vm_bp("breakpoints/7", true, Some(6))).is_none());

        mgr.remove_isolate("isolates/1");
        assert!(mgr.find_by_vm_id("breakpoints/7").is_none());
        assert!(mgr.vm_ids_for_isolate("isolates/1").is_empty());
    }

    #[test]
    fn replaced_breakpoint_ignores_late_vm_result() {
        let mut mgr = BreakpointManager::new();
        let path = test_path("main.dart");
        let (added, _) = mgr.set_for_file(&path, "file:///src/main.dart", &[source(5)]);
        mgr.set_for_file(&path, "file:///src/main.dart", &[]);
        assert!(mgr
            .record_vm_breakpoint(&path, added[0].id, "isolates/1", &vm_bp("b/1", true, Some(5)))
            .is_none());
        assert_eq!(mgr.all().count(), 0);
    }

    #[test]
    fn multiple_files() {
        let mut mgr = BreakpointManager::new();
        mgr.set_for_file(&test_path("a.dart"), "file:///src/a.dart", &[source(1), source(2)]);
        mgr.set_for_file(&test_path("b.dart"), "file:///src/b.dart", &[source(10)]);
        assert_eq!(mgr.all().count(), 3);
        mgr.clear_file(&test_path("a.dart"));
        assert_eq!(mgr.all().count(), 1);
    }
}
