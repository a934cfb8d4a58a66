//! Settings for repokit.
//!
//! [`Settings`] holds the database, query, and logging configuration with
//! sensible defaults. Files and environment variables are layered on top by
//! [`settings_loader`](crate::settings_loader).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `SQLite` connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path, or `:memory:` for an in-memory database.
    pub path: String,
    /// Whether to enforce foreign key constraints.
    pub foreign_keys: bool,
    /// The journal mode pragma (`WAL`, `DELETE`, ...). Ignored for in-memory databases.
    pub journal_mode: String,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            foreign_keys: true,
            journal_mode: "WAL".to_string(),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Query-layer defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySettings {
    /// The largest page a limit/offset paginator will serve.
    pub max_page_size: i64,
    /// The page size used when a caller gives none.
    pub default_page_size: i64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_page_size: 100,
            default_page_size: 10,
        }
    }
}

/// Top-level settings.
///
/// # Examples
///
/// ```
/// use repokit_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(!settings.debug);
/// assert_eq!(settings.database.path, ":memory:");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,
    /// The tracing filter directive, e.g. `info` or `repokit_db=debug`.
    pub log_level: String,

    // ── Database ─────────────────────────────────────────────────────

    /// Connection settings for the `SQLite` backend.
    pub database: DatabaseSettings,

    // ── Query ────────────────────────────────────────────────────────

    /// Query-layer defaults.
    pub query: QuerySettings,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
            query: QuerySettings::default(),
            extra: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.database.path, ":memory:");
        assert!(settings.database.foreign_keys);
        assert_eq!(settings.database.busy_timeout_ms, 5_000);
        assert_eq!(settings.query.max_page_size, 100);
        assert_eq!(settings.query.default_page_size, 10);
        assert!(settings.extra.is_empty());
    }

    #[test]
    fn test_settings_serde_roundtrip() {
        let mut settings = Settings::default();
        settings.database.path = "app.sqlite3".to_string();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.database, settings.database);
    }
}
