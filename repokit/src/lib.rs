//! # repokit
//!
//! Repositories and lazily evaluated query sets over a relational entity
//! graph.
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on
//! `repokit` for everything, or on the individual crates for finer-grained
//! control.
//!
//! ```ignore
//! use repokit::prelude::*;
//!
//! let db = SqliteDatabase::memory()?;
//! let session = db.session();
//! let sections = Repository::<Section>::new(&session)?;
//! let page = sections
//!     .objects()
//!     .filter([("subsections__title__icontains", "intro")])?
//!     .options(["subsections"])?
//!     .slice(..10)?
//!     .fetch()
//!     .await?;
//! ```

/// Errors, settings, and logging.
pub use repokit_core as core;

/// Entities, query builders, query sets, and repositories.
pub use repokit_db as db;

/// The SQLite database and session.
#[cfg(feature = "sqlite")]
pub use repokit_db_backends as db_backends;

/// Re-exported so custom [`Session`](repokit_db::Session) implementations
/// can use the same attribute macro.
pub use async_trait::async_trait;

/// The types most programs need.
pub mod prelude {
    pub use repokit_core::{RepoError, RepoResult, Settings};
    pub use repokit_db::{
        fields, Entity, EntityDescriptor, Evaluated, Fields, QuerySet, Record, Repository,
        Session, Value,
    };
    pub use repokit_db::{ColumnDef, ColumnType, Relationship};

    #[cfg(feature = "sqlite")]
    pub use repokit_db_backends::{session_scope, SqliteDatabase, SqliteSession};
}
