//! # repokit-core
//!
//! Error types, settings, and logging shared by every repokit crate.
//!
//! ## Modules
//!
//! - [`error`] - Error types, the result alias, and integrity warnings
//! - [`settings`] - Database, query, and logging configuration
//! - [`settings_loader`] - TOML/JSON loading with environment overrides
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{DataIntegrityWarning, Operation, RepoError, RepoResult};
pub use settings::{DatabaseSettings, QuerySettings, Settings};
