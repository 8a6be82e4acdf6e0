//! Frame and source classification.
//!
//! Decides whether a library is something the user is debugging, and if
//! not, how the editor should mute it. The same answer drives step
//! filtering: non-debuggable libraries are marked with
//! `setLibraryDebuggable(false)` so stepping passes over them.

use std::path::Path;

use url::Url;

use crate::packages::PackageMap;

pub const DEEMPHASIZE: &str = "deemphasize";
pub const SDK_ORIGIN: &str = "from the Dart SDK";
pub const PUB_ORIGIN: &str = "from Pub packages";

/// Where a library comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `dart:` libraries.
    Sdk,
    /// Packages downloaded into the pub cache.
    ExternalPackage,
    /// Packages that are part of the user's workspace.
    LocalPackage,
    /// Plain files, e.g. `file:///.../bin/main.dart`.
    User,
}

/// Runtime-toggleable debugging options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugOptions {
    pub debug_sdk_libraries: bool,
    pub debug_external_libraries: bool,
}

/// Presentation of a frame's source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub presentation_hint: Option<&'static str>,
    pub origin: Option<&'static str>,
}

impl Classification {
    pub fn is_deemphasized(&self) -> bool {
        self.presentation_hint == Some(DEEMPHASIZE)
    }
}

pub fn is_debuggable(kind: SourceKind, options: DebugOptions) -> bool {
    match kind {
        SourceKind::Sdk => options.debug_sdk_libraries,
        SourceKind::ExternalPackage => options.debug_external_libraries,
        SourceKind::LocalPackage | SourceKind::User => true,
    }
}

pub fn classify(kind: SourceKind, options: DebugOptions) -> Classification {
    if is_debuggable(kind, options) {
        return Classification::default();
    }
    let origin = match kind {
        SourceKind::Sdk => SDK_ORIGIN,
        _ => PUB_ORIGIN,
    };
    Classification {
        presentation_hint: Some(DEEMPHASIZE),
        origin: Some(origin),
    }
}

/// Classify a library or script URI.
///
/// Packages missing from the package map count as local: without a
/// package config there is no evidence the code is not the user's.
pub fn source_kind(uri: &str, packages: &PackageMap) -> SourceKind {
    if uri.starts_with("dart:") || uri.starts_with("org-dartlang-sdk:") {
        return SourceKind::Sdk;
    }
    if let Some(rest) = uri.strip_prefix("package:") {
        let name = rest.split('/').next().unwrap_or(rest);
        return match packages.get(name) {
            Some(info) if !info.local => SourceKind::ExternalPackage,
            _ => SourceKind::LocalPackage,
        };
    }
    if uri.starts_with("file:") {
        if let Some(path) = Url::parse(uri).ok().and_then(|u| u.to_file_path().ok()) {
            return kind_of_path(&path, packages);
        }
    }
    SourceKind::User
}

fn kind_of_path(path: &Path, packages: &PackageMap) -> SourceKind {
    if packages.is_in_pub_cache(path) {
        SourceKind::ExternalPackage
    } else {
        SourceKind::User
    }
}
