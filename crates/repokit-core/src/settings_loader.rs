//! Settings loading from configuration files and the environment.
//!
//! ## Loading Order
//!
//! 1. Start with [`Settings::default`].
//! 2. Deep-merge a TOML or JSON document over the defaults.
//! 3. Apply `REPOKIT_*` environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `REPOKIT_DEBUG` | `debug` |
//! | `REPOKIT_LOG_LEVEL` | `log_level` |
//! | `REPOKIT_DATABASE_PATH` | `database.path` |
//! | `REPOKIT_DATABASE_FOREIGN_KEYS` | `database.foreign_keys` |
//! | `REPOKIT_DATABASE_BUSY_TIMEOUT_MS` | `database.busy_timeout_ms` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use repokit_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/repokit.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::{RepoError, RepoResult};
use crate::settings::Settings;

/// Loads settings from a TOML string, keeping defaults for anything it omits.
pub fn from_toml_str(toml_str: &str) -> RepoResult<Settings> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| RepoError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> RepoResult<Settings> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> RepoResult<Settings> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string, keeping defaults for anything it omits.
pub fn from_json_str(json_str: &str) -> RepoResult<Settings> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| RepoError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> RepoResult<Settings> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> RepoResult<Settings> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from environment variables alone, starting from defaults.
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `REPOKIT_*` environment variable overrides.
///
/// Boolean variables accept `true`, `1` and `yes` (case-insensitive); any
/// other value is false. Unparseable numbers leave the setting untouched.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("REPOKIT_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("REPOKIT_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("REPOKIT_DATABASE_PATH") {
        settings.database.path = val;
    }

    if let Ok(val) = std::env::var("REPOKIT_DATABASE_FOREIGN_KEYS") {
        settings.database.foreign_keys = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("REPOKIT_DATABASE_BUSY_TIMEOUT_MS") {
        if let Ok(ms) = val.trim().parse::<u64>() {
            settings.database.busy_timeout_ms = ms;
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_config(path: &Path, format: &str) -> RepoResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RepoError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(overrides: serde_json::Value, format: &str) -> RepoResult<Settings> {
    let defaults = serde_json::to_value(Settings::default()).map_err(|e| {
        RepoError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;
    serde_json::from_value(merge_json(defaults, overrides)).map_err(|e| {
        RepoError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values. Objects merge key by key; anything else is replaced.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(base_v) => merge_json(base_v, override_v),
                    None => override_v,
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}
