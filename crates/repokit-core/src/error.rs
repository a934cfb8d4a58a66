//! Core error types for repokit.
//!
//! This module provides the [`RepoError`] enum covering path resolution,
//! query configuration, slicing, key shape, and database failures, plus the
//! non-fatal [`DataIntegrityWarning`] emitted through `tracing`.

use std::fmt;

use thiserror::Error;

/// The query operation a path was resolved for.
///
/// Carried by [`RepoError::FieldResolution`] so callers can attribute a bad
/// path to the call that supplied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `filter(...)`
    Filter,
    /// `order_by(...)`
    OrderBy,
    /// `join(...)`, `innerjoin(...)`, `outerjoin(...)`
    Join,
    /// `options(...)`
    Options,
    /// `returning(...)`
    Returning,
    /// `values_list(...)`
    ValuesList,
    /// `update(...)` values
    Update,
    /// `create(...)` and `get_or_create(...)` construction parameters
    Create,
    /// `in_bulk(...)` key field
    InBulk,
}

impl Operation {
    /// Returns the snake-case name of the operation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::OrderBy => "order_by",
            Self::Join => "join",
            Self::Options => "options",
            Self::Returning => "returning",
            Self::ValuesList => "values_list",
            Self::Update => "update",
            Self::Create => "create",
            Self::InBulk => "in_bulk",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for repokit.
///
/// Resolution and configuration errors are raised while a query is being
/// built, before any round trip. Database errors come from the session
/// unchanged in meaning.
///
/// Each variant maps to a boundary status code via [`RepoError::status_code`].
#[derive(Error, Debug)]
pub enum RepoError {
    // ── Query construction ───────────────────────────────────────────

    /// A dotted path could not be resolved against the entity graph.
    #[error("Cannot resolve '{segment}' in path '{path}' for {operation}")]
    FieldResolution {
        /// The operation that supplied the path.
        operation: Operation,
        /// The full path as given by the caller.
        path: String,
        /// The first segment that did not resolve.
        segment: String,
    },

    /// A query argument is invalid (bad bounds, exclusive options, empty values).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An entity descriptor or repository binding is invalid.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// A query set was mutated after it had been sliced.
    #[error("Immutability violation: {0}")]
    ImmutabilityViolation(String),

    /// A single-column primary key was required but the entity declares several.
    #[error("Composite primary key on '{entity}' is not supported: ({})", columns.join(", "))]
    CompositeKeyUnsupported {
        /// The entity name.
        entity: String,
        /// The primary key columns found.
        columns: Vec<String>,
    },

    // ── Lookup results ───────────────────────────────────────────────

    /// A query expected exactly one result but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected at most one result but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    // ── Database ─────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// An operational database error (open failure, pragma failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RepoError {
    /// Shorthand for a [`RepoError::FieldResolution`].
    pub fn field_resolution(
        operation: Operation,
        path: impl Into<String>,
        segment: impl Into<String>,
    ) -> Self {
        Self::FieldResolution {
            operation,
            path: path.into(),
            segment: segment.into(),
        }
    }

    /// Returns the status code a request boundary should answer with.
    ///
    /// - `FieldResolution`, `ConfigurationError`, `ImmutabilityViolation` -> 400
    /// - `DoesNotExist` -> 404
    /// - `IntegrityError` -> 409
    /// - Everything else -> 500
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::FieldResolution { .. }
            | Self::ConfigurationError(_)
            | Self::ImmutabilityViolation(_) => 400,
            Self::DoesNotExist(_) => 404,
            Self::IntegrityError(_) => 409,
            Self::ImproperlyConfigured(_)
            | Self::CompositeKeyUnsupported { .. }
            | Self::MultipleObjectsReturned(_)
            | Self::DatabaseError(_)
            | Self::OperationalError(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => 500,
        }
    }
}

/// A convenience type alias for `Result<T, RepoError>`.
pub type RepoResult<T> = Result<T, RepoError>;

/// A non-fatal data integrity concern.
///
/// Raised where a call succeeds but its result may silently lose data, such
/// as `in_bulk` keyed on a column that is not declared unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIntegrityWarning {
    /// The entity the warning concerns.
    pub entity: String,
    /// The field the warning concerns.
    pub field: String,
    /// Human-readable detail.
    pub message: String,
}

impl DataIntegrityWarning {
    /// Creates a new warning.
    pub fn new(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Emits the warning as a `tracing` event on the `repokit::integrity` target.
    pub fn emit(&self) {
        tracing::warn!(
            target: "repokit::integrity",
            entity = %self.entity,
            field = %self.field,
            "{}",
            self.message
        );
    }
}

impl fmt::Display for DataIntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.entity, self.field, self.message)
    }
}
