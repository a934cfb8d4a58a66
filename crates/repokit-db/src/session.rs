//! The session seam between the query layer and a live database.
//!
//! A [`Session`] owns one connection and its transaction. It keeps a unit of
//! work of pending objects that are inserted on [`flush`](Session::flush),
//! on [`commit`](Session::commit), or automatically before any read. Query
//! builders and query sets hold no connection state; every round trip goes
//! through the session they were handed.

use async_trait::async_trait;
use repokit_core::RepoResult;

use crate::descriptor::EntityDescriptor;
use crate::entity::Fields;
use crate::query::compiler::Dialect;
use crate::query::statement::Statement;
use crate::row::Row;
use crate::value::Value;

/// Handle to an object added to a session's unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// A new row waiting to be inserted.
#[derive(Debug, Clone)]
pub struct PendingObject {
    /// The entity the row belongs to.
    pub descriptor: &'static EntityDescriptor,
    /// Column values; a NULL primary key is left to the database.
    pub values: Fields,
}

impl PendingObject {
    /// Creates a pending object.
    pub const fn new(descriptor: &'static EntityDescriptor, values: Fields) -> Self {
        Self { descriptor, values }
    }
}

/// What a statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    /// Returned rows (select results or `RETURNING` payloads).
    pub rows: Vec<Row>,
    /// Rows changed by an update or delete.
    pub rows_affected: u64,
}

/// Primary keys assigned to objects by a flush or commit.
pub type AssignedKeys = Vec<(ObjectId, Value)>;

/// A unit of work bound to one connection and transaction.
///
/// Implementations must autoflush pending objects before
/// [`execute`](Session::execute), [`scalar`](Session::scalar) and
/// [`get`](Session::get), so reads observe earlier `add` calls.
#[async_trait]
pub trait Session: Send + Sync {
    /// The SQL dialect statements are compiled for.
    fn dialect(&self) -> Dialect;

    /// Adds a new object to the unit of work.
    async fn add(&self, object: PendingObject) -> RepoResult<ObjectId>;

    /// Loads one row by primary key, labelled by plain column names.
    async fn get(&self, descriptor: &'static EntityDescriptor, pk: &Value)
        -> RepoResult<Option<Row>>;

    /// Inserts the given pending objects, returning their primary keys.
    /// Objects already flushed are skipped.
    async fn flush(&self, objects: &[ObjectId]) -> RepoResult<AssignedKeys>;

    /// Flushes everything pending and commits the transaction.
    async fn commit(&self) -> RepoResult<AssignedKeys>;

    /// Discards pending objects and rolls the transaction back.
    async fn rollback(&self) -> RepoResult<()>;

    /// Executes a statement.
    async fn execute(&self, statement: &Statement) -> RepoResult<StatementResult>;

    /// Executes a statement and returns the first column of its first row.
    async fn scalar(&self, statement: &Statement) -> RepoResult<Option<Value>>;
}
