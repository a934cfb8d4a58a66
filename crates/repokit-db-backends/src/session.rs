//! The SQLite [`Session`] implementation.
//!
//! A [`SqliteSession`] keeps a unit of work of added objects and a lazily
//! opened transaction. The first statement that touches the database runs
//! `BEGIN`; [`commit`](Session::commit) and [`rollback`](Session::rollback)
//! end the transaction, and the next statement opens a new one. Pending
//! objects are inserted before every read so queries observe earlier adds.

use async_trait::async_trait;
use repokit_core::{RepoError, RepoResult};
use repokit_db::query::statement::{InsertStatement, SelectStatement};
use repokit_db::{
    AssignedKeys, Dialect, EntityDescriptor, ObjectId, PendingObject, Row, Session, SqlCompiler,
    Statement, StatementResult, Value,
};
use tokio::sync::Mutex;

use crate::sqlite::SqliteDatabase;

#[derive(Debug, Default)]
struct UnitOfWork {
    next_id: u64,
    pending: Vec<(ObjectId, PendingObject)>,
    in_transaction: bool,
}

/// A unit of work over a [`SqliteDatabase`].
#[derive(Debug)]
pub struct SqliteSession {
    db: SqliteDatabase,
    compiler: SqlCompiler,
    state: Mutex<UnitOfWork>,
}

impl SqliteSession {
    pub(crate) fn new(db: SqliteDatabase) -> Self {
        Self {
            db,
            compiler: SqlCompiler::new(Dialect::SQLite),
            state: Mutex::new(UnitOfWork::default()),
        }
    }

    /// The database this session runs against.
    pub const fn database(&self) -> &SqliteDatabase {
        &self.db
    }

    /// The number of objects added but not yet inserted.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn begin(&self, state: &mut UnitOfWork) -> RepoResult<()> {
        if !state.in_transaction {
            self.db.execute_batch("BEGIN").await?;
            state.in_transaction = true;
        }
        Ok(())
    }

    /// Inserts the pending objects selected by `wanted`, in the order they
    /// were added.
    async fn flush_where(
        &self,
        state: &mut UnitOfWork,
        wanted: impl Fn(ObjectId) -> bool,
    ) -> RepoResult<AssignedKeys> {
        let (selected, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|(id, _)| wanted(*id));
        state.pending = rest;
        if selected.is_empty() {
            return Ok(AssignedKeys::new());
        }

        self.begin(state).await?;
        let mut keys = AssignedKeys::with_capacity(selected.len());
        let mut remaining = selected.into_iter();
        while let Some((id, object)) = remaining.next() {
            match self.insert(&object).await {
                Ok(key) => keys.push((id, key)),
                Err(e) => {
                    // Objects after the failed insert stay pending.
                    state.pending.splice(0..0, remaining);
                    return Err(e);
                }
            }
        }
        tracing::debug!(objects = keys.len(), "flushed pending objects");
        Ok(keys)
    }

    async fn insert(&self, object: &PendingObject) -> RepoResult<Value> {
        let pk = object.descriptor.primary_key()?;
        let values = object
            .values
            .iter()
            .filter(|(name, value)| !(name == pk.name && value.is_null()))
            .cloned()
            .collect();
        let stmt = InsertStatement {
            table: object.descriptor.table.to_string(),
            values,
            returning: vec![pk.name.to_string()],
        };
        let (sql, params) = self.compiler.compile_insert(&stmt);
        tracing::debug!(sql = %sql, params = params.len(), "insert");
        let rows = self.db.query(sql, params).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next())
            .map(|key| pk.column_type.normalize(key))
            .ok_or_else(|| {
                RepoError::DatabaseError(format!(
                    "insert into '{}' returned no key",
                    object.descriptor.table
                ))
            })
    }

    async fn run_select(&self, stmt: &SelectStatement) -> RepoResult<Vec<Row>> {
        let (sql, params) = self.compiler.compile_select(stmt);
        tracing::debug!(
            sql = %sql,
            params = params.len(),
            options = ?stmt.execution_options,
            "select"
        );
        self.db.query(sql, params).await
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    async fn add(&self, object: PendingObject) -> RepoResult<ObjectId> {
        let mut state = self.state.lock().await;
        let id = ObjectId(state.next_id);
        state.next_id += 1;
        state.pending.push((id, object));
        Ok(id)
    }

    async fn get(
        &self,
        descriptor: &'static EntityDescriptor,
        pk: &Value,
    ) -> RepoResult<Option<Row>> {
        let pk_column = descriptor.primary_key()?;
        let stmt = SelectStatement::by_primary_key(descriptor, pk_column.name, pk.clone());
        let mut state = self.state.lock().await;
        self.flush_where(&mut state, |_| true).await?;
        self.begin(&mut state).await?;
        Ok(self.run_select(&stmt).await?.into_iter().next())
    }

    async fn flush(&self, objects: &[ObjectId]) -> RepoResult<AssignedKeys> {
        let mut state = self.state.lock().await;
        self.flush_where(&mut state, |id| objects.contains(&id)).await
    }

    async fn commit(&self) -> RepoResult<AssignedKeys> {
        let mut state = self.state.lock().await;
        let keys = self.flush_where(&mut state, |_| true).await?;
        if state.in_transaction {
            self.db.execute_batch("COMMIT").await?;
            state.in_transaction = false;
            tracing::debug!("committed");
        }
        Ok(keys)
    }

    async fn rollback(&self) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        let discarded = state.pending.len();
        state.pending.clear();
        if state.in_transaction {
            state.in_transaction = false;
            self.db.execute_batch("ROLLBACK").await?;
        }
        tracing::debug!(discarded, "rolled back");
        Ok(())
    }

    async fn execute(&self, statement: &Statement) -> RepoResult<StatementResult> {
        let mut state = self.state.lock().await;
        self.flush_where(&mut state, |_| true).await?;
        self.begin(&mut state).await?;

        if let Statement::Select(select) = statement {
            let rows = self.run_select(select).await?;
            return Ok(StatementResult {
                rows,
                rows_affected: 0,
            });
        }

        let returns_rows = match statement {
            Statement::Update(s) => !s.returning.is_empty(),
            Statement::Delete(s) => !s.returning.is_empty(),
            Statement::Insert(s) => !s.returning.is_empty(),
            Statement::Select(_) => true,
        };
        let (sql, params) = self.compiler.compile(statement);
        tracing::debug!(
            sql = %sql,
            params = params.len(),
            options = ?statement.execution_options(),
            "execute"
        );
        if returns_rows {
            let rows = self.db.query(sql, params).await?;
            Ok(StatementResult {
                rows_affected: rows.len() as u64,
                rows,
            })
        } else {
            let rows_affected = self.db.execute(sql, params).await?;
            Ok(StatementResult {
                rows: Vec::new(),
                rows_affected,
            })
        }
    }

    async fn scalar(&self, statement: &Statement) -> RepoResult<Option<Value>> {
        let result = self.execute(statement).await?;
        Ok(result
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next()))
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if self.state.get_mut().in_transaction {
            self.db.try_rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repokit_db::{ColumnDef, ColumnType};
    use std::sync::LazyLock;

    static NOTE: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("note", "notes")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("body", ColumnType::Text))
            .build()
    });

    async fn setup() -> SqliteDatabase {
        let db = SqliteDatabase::memory().unwrap();
        db.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL)")
            .await
            .unwrap();
        db
    }

    fn note(body: &str) -> PendingObject {
        PendingObject::new(
            &NOTE,
            vec![
                ("id".to_string(), Value::Null),
                ("body".to_string(), Value::from(body)),
            ],
        )
    }

    #[tokio::test]
    async fn test_add_is_lazy() {
        let db = setup().await;
        let session = db.session();
        let before = db.round_trips();
        session.add(note("a")).await.unwrap();
        assert_eq!(db.round_trips(), before);
        assert_eq!(session.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_flush_assigns_keys_in_order() {
        let db = setup().await;
        let session = db.session();
        let a = session.add(note("a")).await.unwrap();
        let b = session.add(note("b")).await.unwrap();
        let keys = session.flush(&[b]).await.unwrap();
        assert_eq!(keys, vec![(b, Value::Int(1))]);
        // `a` is still pending; flushing it again is a no-op for `b`.
        let keys = session.flush(&[a, b]).await.unwrap();
        assert_eq!(keys, vec![(a, Value::Int(2))]);
        assert_eq!(session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_get_autoflushes() {
        let db = setup().await;
        let session = db.session();
        session.add(note("hello")).await.unwrap();
        let row = session.get(&NOTE, &Value::Int(1)).await.unwrap().unwrap();
        assert_eq!(row.get::<String>("body").unwrap(), "hello");
        assert!(session.get(&NOTE, &Value::Int(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let db = setup().await;
        let session = db.session();
        let id = session.add(note("kept")).await.unwrap();
        session.flush(&[id]).await.unwrap();
        session.add(note("pending")).await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(session.pending_count().await, 0);
        assert!(session.get(&NOTE, &Value::Int(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_survives_new_session() {
        let db = setup().await;
        {
            let session = db.session();
            session.add(note("saved")).await.unwrap();
            let keys = session.commit().await.unwrap();
            assert_eq!(keys.len(), 1);
        }
        let session = db.session();
        assert!(session.get(&NOTE, &Value::Int(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_session_rolls_back() {
        let db = setup().await;
        {
            let session = db.session();
            let id = session.add(note("lost")).await.unwrap();
            session.flush(&[id]).await.unwrap();
        }
        let session = db.session();
        assert!(session.get(&NOTE, &Value::Int(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_insert_is_integrity_error() {
        let db = setup().await;
        let session = db.session();
        let bad = PendingObject::new(&NOTE, vec![("body".to_string(), Value::Null)]);
        let id = session.add(bad).await.unwrap();
        let err = session.flush(&[id]).await.unwrap_err();
        assert!(matches!(err, RepoError::IntegrityError(_)));
    }
}
