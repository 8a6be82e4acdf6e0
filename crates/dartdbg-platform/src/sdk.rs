//! Dart SDK and pub-cache discovery.

use std::path::{Path, PathBuf};

use crate::error::PlatformError;

#[cfg(windows)]
const DART_EXE: &str = "dart.exe";
#[cfg(not(windows))]
const DART_EXE: &str = "dart";

/// A located Dart SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DartSdk {
    root: PathBuf,
}

impl DartSdk {
    /// Wrap `root` if it looks like a Dart SDK (has `bin/dart` and a
    /// `version` file).
    pub fn from_root(root: impl Into<PathBuf>) -> Result<Self, PlatformError> {
        let root = root.into();
        if root.join("bin").join(DART_EXE).is_file() && root.join("version").is_file() {
            Ok(Self { root })
        } else {
            Err(PlatformError::InvalidSdk(root))
        }
    }

    /// SDK root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the `dart` executable.
    pub fn dart_executable(&self) -> PathBuf {
        self.root.join("bin").join(DART_EXE)
    }

    /// Directory holding the SDK's library sources (`lib/`).
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Contents of the SDK `version` file, trimmed.
    pub fn version(&self) -> Option<String> {
        std::fs::read_to_string(self.root.join("version"))
            .ok()
            .map(|v| v.trim().to_string())
    }
}

/// Locate a Dart SDK.
///
/// Search order: `explicit`, `$DART_SDK`, `$FLUTTER_ROOT/bin/cache/dart-sdk`,
/// then the first `dart` on `$PATH` (following symlinks).
pub fn find_dart_sdk(explicit: Option<&Path>) -> Result<DartSdk, PlatformError> {
    if let Some(path) = explicit {
        return DartSdk::from_root(path);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(sdk) = std::env::var_os("DART_SDK") {
        candidates.push(PathBuf::from(sdk));
    }
    if let Some(flutter) = std::env::var_os("FLUTTER_ROOT") {
        candidates.push(
            PathBuf::from(flutter)
                .join("bin")
                .join("cache")
                .join("dart-sdk"),
        );
    }
    if let Some(path) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path) {
            let exe = dir.join(DART_EXE);
            if exe.is_file() {
                let resolved = std::fs::canonicalize(&exe).unwrap_or(exe);
                if let Some(root) = resolved.parent().and_then(Path::parent) {
                    candidates.push(root.to_path_buf());
                }
            }
        }
    }

    for candidate in &candidates {
        if let Ok(sdk) = DartSdk::from_root(candidate) {
            tracing::debug!("found Dart SDK at {}", sdk.root().display());
            return Ok(sdk);
        }
    }

    Err(PlatformError::SdkNotFound {
        searched: "DART_SDK, FLUTTER_ROOT, PATH".into(),
    })
}

/// Location of the pub package cache.
///
/// `$PUB_CACHE` wins; otherwise `%LOCALAPPDATA%\Pub\Cache` on Windows and
/// `~/.pub-cache` elsewhere.
pub fn pub_cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("PUB_CACHE") {
        return Some(PathBuf::from(dir));
    }
    #[cfg(windows)]
    {
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            return Some(PathBuf::from(local).join("Pub").join("Cache"));
        }
    }
    dirs::home_dir().map(|home| home.join(".pub-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_sdk(dir: &Path) -> PathBuf {
        let root = dir.join("dart-sdk");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin").join(DART_EXE), "").unwrap();
        std::fs::write(root.join("version"), "3.4.0\n").unwrap();
        root
    }

    #[test]
    fn from_root_accepts_sdk_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = fake_sdk(dir.path());
        let sdk = DartSdk::from_root(&root).unwrap();
        assert_eq!(sdk.root(), root.as_path());
        assert_eq!(sdk.version().as_deref(), Some("3.4.0"));
        assert!(sdk.dart_executable().ends_with(format!("bin/{DART_EXE}")));
        assert!(sdk.lib_dir().ends_with("lib"));
    }

    #[test]
    fn from_root_rejects_plain_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = DartSdk::from_root(dir.path()).unwrap_err();
        assert!(matches!(err, PlatformError::InvalidSdk(_)));
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = fake_sdk(dir.path());
        let sdk = find_dart_sdk(Some(&root)).unwrap();
        assert_eq!(sdk.root(), root.as_path());
    }

    #[test]
    fn explicit_invalid_path_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(find_dart_sdk(Some(dir.path())).is_err());
    }
}
