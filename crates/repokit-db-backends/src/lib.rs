//! # repokit-db-backends
//!
//! The SQLite backend for repokit. Provides [`SqliteDatabase`], a
//! connection handle configured from
//! [`DatabaseSettings`](repokit_core::settings::DatabaseSettings), the
//! [`SqliteSession`] unit of work that implements
//! [`Session`](repokit_db::Session), and [`session_scope`] for running a
//! block of work in one transaction.

// significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]

pub mod scope;
pub mod session;
pub mod sqlite;

pub use scope::session_scope;
pub use session::SqliteSession;
pub use sqlite::SqliteDatabase;
