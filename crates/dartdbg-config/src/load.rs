use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Directory name holding per-project overrides.
pub const PROJECT_CONFIG_DIR: &str = ".dartdbg";

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# dartdbg configuration
# Uncomment and edit settings below to override defaults.

# [debug]
# debug_sdk_libraries = false
# debug_external_libraries = false
# evaluate_getters_in_debug_views = true
# evaluate_to_string_in_debug_views = false
# max_string_display_length = 100
# show_log_output = true

# [sdk]
# dart_sdk_path = "/usr/lib/dart"
# pub_cache = "/home/me/.pub-cache"

# [log]
# level = "info"

# [test]
# extra_args = []
"#;

/// Load and merge configuration.
///
/// Order: `Config::default()` <- `config_dir/config.toml` (created with
/// commented defaults if missing) <- nearest `.dartdbg/config.toml` found
/// walking up from `project_dir`. The result is validated; the first
/// violation is returned as the error.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join("config.toml");

    if !global_path.exists() {
        std::fs::create_dir_all(config_dir)?;
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT).map_err(|e| {
            ConfigError::CreateDefault {
                path: global_path.clone(),
                reason: e.to_string(),
            }
        })?;
        tracing::info!("created default config at {}", global_path.display());
    }

    let mut config = Config::default();

    let global = std::fs::read_to_string(&global_path)?;
    if has_settings(&global) {
        config = merge_configs(&config, &global)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!("applying project config {}", project_path.display());
        let project = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project)?;
    }

    check(config)
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(content: &str) -> Result<Config, ConfigError> {
    check(merge_configs(&Config::default(), content)?)
}

fn check(config: Config) -> Result<Config, ConfigError> {
    match validate(&config) {
        Ok(()) => Ok(config),
        Err(mut errors) => Err(errors.swap_remove(0)),
    }
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_DIR).join("config.toml"))
        .find(|candidate| candidate.is_file())
}

fn has_settings(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}
