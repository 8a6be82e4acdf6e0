//! Source resolution: file path when the code is on disk, otherwise a
//! `sourceReference` whose content is downloaded from the VM on demand.

use std::collections::HashMap;
use std::path::PathBuf;

use dartdbg_vm::VmApi;
use url::Url;

use crate::classifier::Classification;
use crate::error::DapError;
use crate::packages::PackageMap;
use crate::protocol::Source;

/// Where the editor should read a script from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub name: String,
    pub path: Option<PathBuf>,
    pub source_reference: Option<i64>,
}

impl ResolvedSource {
    pub fn to_dap(&self, classification: Classification) -> Source {
        Source {
            name: Some(self.name.clone()),
            path: self.path.as_ref().map(|p| p.display().to_string()),
            source_reference: self.source_reference,
            presentation_hint: classification.presentation_hint.map(str::to_string),
            origin: classification.origin.map(str::to_string),
        }
    }
}

#[derive(Debug)]
struct SourceEntry {
    isolate_id: String,
    script_id: String,
    content: Option<String>,
}

/// What the `source` request needs to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLookup {
    Cached(String),
    Fetch { isolate_id: String, script_id: String },
}

/// Per-session source reference table.
#[derive(Debug)]
pub struct SourceResolver {
    next: i64,
    by_uri: HashMap<String, i64>,
    entries: HashMap<i64, SourceEntry>,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn display_name(uri: &str) -> String {
    uri.rsplit(|c| c == '/' || c == ':').next().unwrap_or(uri).to_string()
}

fn local_path(uri: &str, packages: &PackageMap) -> Option<PathBuf> {
    let path = if uri.starts_with("file:") {
        Url::parse(uri).ok()?.to_file_path().ok()?
    } else if uri.starts_with("package:") {
        packages.resolve(uri)?
    } else {
        return None;
    };
    path.exists().then_some(path)
}

impl SourceResolver {
    pub fn new() -> Self {
        Self {
            next: 1,
            by_uri: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Resolve a script URI. Identical URIs always get the same reference.
    pub fn resolve(
        &mut self,
        uri: &str,
        isolate_id: &str,
        script_id: &str,
        packages: &PackageMap,
    ) -> ResolvedSource {
        let name = display_name(uri);
        if let Some(path) = local_path(uri, packages) {
            return ResolvedSource {
                name,
                path: Some(path),
                source_reference: None,
            };
        }
        let reference = match self.by_uri.get(uri) {
            Some(&reference) => reference,
            None => {
                let reference = self.next;
                self.next += 1;
                self.by_uri.insert(uri.to_string(), reference);
                self.entries.insert(
                    reference,
                    SourceEntry {
                        isolate_id: isolate_id.to_string(),
                        script_id: script_id.to_string(),
                        content: None,
                    },
                );
                reference
            }
        };
        ResolvedSource {
            name,
            path: None,
            source_reference: Some(reference),
        }
    }

    pub fn lookup(&self, reference: i64) -> Result<SourceLookup, DapError> {
        let entry = self
            .entries
            .get(&reference)
            .ok_or_else(|| DapError::rejected(format!("unknown source reference {reference}")))?;
        Ok(match &entry.content {
            Some(content) => SourceLookup::Cached(content.clone()),
            None => SourceLookup::Fetch {
                isolate_id: entry.isolate_id.clone(),
                script_id: entry.script_id.clone(),
            },
        })
    }

    pub fn store_content(&mut self, reference: i64, content: String) {
        if let Some(entry) = self.entries.get_mut(&reference) {
            entry.content = Some(content);
        }
    }

    /// Point existing references at a surviving isolate after the one that
    /// first loaded them exits.
    pub fn reassign_isolate(&mut self, from: &str, to: &str) {
        for entry in self.entries.values_mut() {
            if entry.isolate_id == from {
                entry.isolate_id = to.to_string();
            }
        }
    }
}

/// Download a script's text, verbatim.
pub async fn fetch_source(api: &VmApi, isolate_id: &str, script_id: &str) -> Result<String, DapError> {
    let script = api.get_script(isolate_id, script_id).await?;
    script
        .source
        .ok_or_else(|| DapError::Protocol(format!("script {} has no source", script.uri)))
}
