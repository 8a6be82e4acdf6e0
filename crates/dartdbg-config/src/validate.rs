use crate::config::Config;
use crate::error::ConfigError;

const MIN_STRING_DISPLAY: usize = 8;
const MAX_STRING_DISPLAY: usize = 100_000;

/// Check `config`, collecting every violation.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let len = config.debug.max_string_display_length;
    if !(MIN_STRING_DISPLAY..=MAX_STRING_DISPLAY).contains(&len) {
        errors.push(ConfigError::Validation {
            field: "debug.max_string_display_length".to_string(),
            message: format!("must be {MIN_STRING_DISPLAY}..={MAX_STRING_DISPLAY}, got {len}"),
        });
    }

    if let Some(path) = &config.sdk.dart_sdk_path {
        if path.as_os_str().is_empty() {
            errors.push(ConfigError::Validation {
                field: "sdk.dart_sdk_path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
