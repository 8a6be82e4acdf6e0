//! `.dart_tool/package_config.json` lookup.
//!
//! Tells local packages (path dependencies and the project itself) apart
//! from packages that live in the pub cache, and resolves `package:` URIs
//! to files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::DapError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageConfigFile {
    #[serde(default)]
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageEntry {
    name: String,
    root_uri: String,
    #[serde(default)]
    package_uri: Option<String>,
}

/// One resolved package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub root: PathBuf,
    /// Directory `package:<name>/` maps to, normally `<root>/lib`.
    pub lib_dir: PathBuf,
    /// Part of the user's project rather than a downloaded dependency.
    pub local: bool,
}

/// Packages known to the project being debugged.
#[derive(Debug, Clone, Default)]
pub struct PackageMap {
    packages: HashMap<String, PackageInfo>,
    pub_cache: Option<PathBuf>,
}

fn dir_url(path: &Path) -> Result<Url, DapError> {
    Url::from_directory_path(path)
        .map_err(|_| DapError::Configuration(format!("not an absolute path: {}", path.display())))
}

fn as_dir_ref(uri: &str) -> String {
    if uri.ends_with('/') {
        uri.to_string()
    } else {
        format!("{uri}/")
    }
}

impl PackageMap {
    pub fn new(pub_cache: Option<PathBuf>) -> Self {
        Self {
            packages: HashMap::new(),
            pub_cache,
        }
    }

    /// Load `<project_root>/.dart_tool/package_config.json`. A missing file
    /// yields an empty map.
    pub fn load(project_root: &Path, pub_cache: Option<PathBuf>) -> Result<Self, DapError> {
        let config_dir = project_root.join(".dart_tool");
        let path = config_dir.join("package_config.json");
        if !path.exists() {
            tracing::debug!("no package config at {}", path.display());
            return Ok(Self::new(pub_cache));
        }
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text, &config_dir, project_root, pub_cache)
    }

    /// Parse package config JSON. Relative `rootUri`s resolve against
    /// `config_dir`.
    pub fn parse(
        json: &str,
        config_dir: &Path,
        project_root: &Path,
        pub_cache: Option<PathBuf>,
    ) -> Result<Self, DapError> {
        let file: PackageConfigFile = serde_json::from_str(json)
            .map_err(|e| DapError::Configuration(format!("invalid package_config.json: {e}")))?;
        let base = dir_url(config_dir)?;

        let mut map = Self::new(pub_cache);
        for entry in file.packages {
            let relative = Url::parse(&entry.root_uri).is_err();
            let Ok(root_url) = base.join(&as_dir_ref(&entry.root_uri)) else {
                tracing::warn!("package {} has an invalid rootUri", entry.name);
                continue;
            };
            let lib_url = match &entry.package_uri {
                Some(p) => root_url.join(&as_dir_ref(p)).ok(),
                None => root_url.join("lib/").ok(),
            };
            let (Ok(root), Some(Ok(lib_dir))) = (
                root_url.to_file_path(),
                lib_url.map(|u| u.to_file_path()),
            ) else {
                tracing::debug!("package {} is not on the local file system", entry.name);
                continue;
            };
            let in_pub_cache = map
                .pub_cache
                .as_ref()
                .is_some_and(|cache| root.starts_with(cache));
            let local = !in_pub_cache && (relative || root.starts_with(project_root));
            map.packages.insert(
                entry.name.clone(),
                PackageInfo {
                    name: entry.name,
                    root,
                    lib_dir,
                    local,
                },
            );
        }
        tracing::debug!("loaded {} packages", map.packages.len());
        Ok(map)
    }

    pub fn get(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.get(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Whether `path` lives in the pub cache.
    pub fn is_in_pub_cache(&self, path: &Path) -> bool {
        self.pub_cache
            .as_ref()
            .is_some_and(|cache| path.starts_with(cache))
    }

    /// Resolve `package:name/path.dart` to a file path.
    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let rest = uri.strip_prefix("package:")?;
        let (name, path) = rest.split_once('/')?;
        let info = self.packages.get(name)?;
        Some(info.lib_dir.join(path))
    }
}
