//! Query building, compilation, and execution.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - lookup tokens and the registry that resolves them
//! - [`path`] - join trees and dotted-path resolution
//! - [`builder`] - the copy-on-write [`QueryBuilder`]
//! - [`statement`] - compiled statement values
//! - [`compiler`] - SQL rendering with bound parameters
//! - [`hydrate`] - folding joined rows back into nested records
//! - [`queryset`] - the session-bound [`QuerySet`]

pub mod builder;
pub mod compiler;
pub mod hydrate;
pub mod lookups;
pub mod path;
pub mod queryset;
pub mod statement;

pub use builder::{QueryBuilder, Returning};
pub use compiler::{Dialect, SqlCompiler};
pub use lookups::{LookupOp, LookupRegistry, LOOKUP_SEP};
pub use queryset::{Evaluated, MutationResult, QuerySet, Returned};
pub use statement::{LoadPlan, SelectStatement, Statement};
