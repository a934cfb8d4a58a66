//! # repokit-db
//!
//! Query layer for repokit. Provides the [`Entity`](entity::Entity) trait and
//! [`EntityDescriptor`](descriptor::EntityDescriptor) for describing persistent
//! types, the copy-on-write [`QueryBuilder`](query::QueryBuilder), the
//! session-bound [`QuerySet`](query::QuerySet), and the
//! [`Repository`](repository::Repository) that hands query sets out.
//!
//! ## Architecture
//!
//! A [`QuerySet`](query::QuerySet) accumulates filters, joins, orderings and
//! eager-load options through method chaining without touching the database.
//! Every intermediate call returns a new value. Dotted paths such as
//! `section__title__icontains` are resolved against the descriptor graph when
//! they are given, so a bad path fails before any round trip. A terminal call
//! (`fetch`, `count`, `update`, ...) builds a [`Statement`](query::Statement)
//! and hands it to the [`Session`](session::Session) it was created with; the
//! session compiles it with the [`SqlCompiler`](query::SqlCompiler) for its
//! dialect and executes it.
//!
//! ## Module Overview
//!
//! - [`descriptor`] - Entity descriptors, columns, and relationships
//! - [`entity`] - The [`Entity`](entity::Entity) trait and the [`fields!`] macro
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`row`] - Result rows and hydrated records
//! - [`session`] - The session seam to a live database
//! - [`query`] - Path resolution, building, compilation, and query sets
//! - [`repository`] - Per-entity repositories
//! - [`list`] - Filtering, ordering, and pagination helpers

// These clippy lints are intentionally allowed for the query crate:
// - struct_excessive_bools: ColumnDef and the builder carry several flags
// - too_many_lines: the SQL compiler methods are inherently large due to many match arms
// - cast_precision_loss: i64-to-f64 casts are acceptable when normalising driver values
// - result_large_err: RepoError is the crate error type and should be used consistently
// - format_push_string: format! with push_str is clearer than write! for SQL generation
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: some API signatures take owned values for chaining
// - return_self_not_must_use: builder pattern methods are self-documenting
// - use_self: explicit type names are clearer in some contexts
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::unnecessary_literal_bound)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_char_pattern)]
// literal_string_with_formatting_args: SQL fragments using {alias}/{column} are intentional
#![allow(clippy::literal_string_with_formatting_args)]
// significant_drop_tightening: false positives with mutex guards in test sessions
#![allow(clippy::significant_drop_tightening)]

pub mod descriptor;
pub mod entity;
mod lifecycle;
pub mod list;
pub mod query;
pub mod repository;
pub mod row;
pub mod session;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use descriptor::{Cardinality, ColumnDef, ColumnType, EntityDescriptor, Relationship};
pub use entity::{Entity, Fields};
pub use list::{FilterSet, LimitOffsetPagination, ListService, Listing, Ordering, Page};
pub use query::{
    Dialect, Evaluated, LookupOp, LookupRegistry, MutationResult, QueryBuilder, QuerySet,
    Returned, Returning, SqlCompiler, Statement,
};
pub use repository::Repository;
pub use row::{FromValue, Record, Related, Row};
pub use session::{AssignedKeys, ObjectId, PendingObject, Session, StatementResult};
pub use value::{Value, ValueKey};
