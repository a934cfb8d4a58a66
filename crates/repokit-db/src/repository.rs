//! Repositories: the entry point for working with one entity type.
//!
//! A [`Repository`] is bound to a session. It creates entities, loads them
//! by primary key, and hands out [`QuerySet`]s through
//! [`objects`](Repository::objects).
//!
//! ```ignore
//! let sections = Repository::<Section>::new(&session)?;
//! let intro = sections
//!     .flush(true)
//!     .create(fields! { "name" => "Intro" })
//!     .await?;
//! let same = sections.get_by_pk(intro.id).await?;
//! ```

use std::marker::PhantomData;

use repokit_core::{RepoError, RepoResult};

use crate::entity::{Entity, Fields};
use crate::lifecycle::{add_entity, with_assigned_key, LifecycleFlags};
use crate::query::queryset::QuerySet;
use crate::row::Record;
use crate::session::Session;
use crate::value::Value;

/// Creates, loads, and queries entities of type `E`.
pub struct Repository<'s, E: Entity> {
    session: &'s dyn Session,
    lifecycle: LifecycleFlags,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<'_, E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            lifecycle: self.lifecycle.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> std::fmt::Debug for Repository<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &E::descriptor().name)
            .field("lifecycle", &self.lifecycle.peek())
            .finish_non_exhaustive()
    }
}

impl<'s, E: Entity> Repository<'s, E> {
    /// Binds a repository to `session`.
    ///
    /// Fails when the entity's descriptor is invalid, for example when it
    /// has no primary key or a composite one.
    pub fn new(session: &'s dyn Session) -> RepoResult<Self> {
        E::descriptor().validate()?;
        Ok(Self {
            session,
            lifecycle: LifecycleFlags::default(),
            _entity: PhantomData,
        })
    }

    /// A copy that flushes new objects after the next `create` or
    /// `bulk_create`.
    pub fn flush(&self, flush: bool) -> Self {
        let mut next = self.clone();
        next.lifecycle = self.lifecycle.with_flush(flush);
        next
    }

    /// A copy that commits after the next `create` or `bulk_create`.
    pub fn commit(&self, commit: bool) -> Self {
        let mut next = self.clone();
        next.lifecycle = self.lifecycle.with_commit(commit);
        next
    }

    /// Builds an entity from `fields` and adds it to the session.
    ///
    /// The primary key is known on return only when a flush or commit was
    /// requested; otherwise the row is inserted by the next autoflush.
    pub async fn create(&self, fields: Fields) -> RepoResult<E> {
        let entity = E::from_fields(&fields)?;
        let id = add_entity(self.session, &entity).await?;
        let keys = self.lifecycle.take().apply(self.session, &[id]).await?;
        with_assigned_key(entity, id, &keys)
    }

    /// Creates one entity per item of `values`.
    ///
    /// With a `batch_size`, objects are added and flushed or committed one
    /// chunk at a time; the pending policy applies to every chunk.
    pub async fn bulk_create(
        &self,
        values: Vec<Fields>,
        batch_size: Option<usize>,
    ) -> RepoResult<Vec<E>> {
        if batch_size == Some(0) {
            return Err(RepoError::ConfigurationError(
                "batch_size must be a positive integer".into(),
            ));
        }
        let policy = self.lifecycle.take();
        let chunk = batch_size.unwrap_or(values.len()).max(1);
        let mut created = Vec::with_capacity(values.len());

        for batch in values.chunks(chunk) {
            let mut pending = Vec::with_capacity(batch.len());
            for fields in batch {
                let entity = E::from_fields(fields)?;
                let id = add_entity(self.session, &entity).await?;
                pending.push((id, entity));
            }
            let ids: Vec<_> = pending.iter().map(|(id, _)| *id).collect();
            let keys = policy.apply(self.session, &ids).await?;
            for (id, entity) in pending {
                created.push(with_assigned_key(entity, id, &keys)?);
            }
            tracing::debug!(
                entity = E::descriptor().name,
                batch = ids.len(),
                "bulk_create chunk added"
            );
        }
        Ok(created)
    }

    /// Loads one entity by primary key.
    pub async fn get_by_pk(&self, pk: impl Into<Value>) -> RepoResult<Option<E>> {
        let descriptor = E::descriptor();
        let row = self.session.get(descriptor, &pk.into()).await?;
        row.map(|row| E::from_record(&Record::from_row(descriptor, &row)))
            .transpose()
    }

    /// A query set over every entity of this type.
    pub fn objects(&self) -> QuerySet<'s, E> {
        QuerySet::new(self.session)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{LazyLock, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::descriptor::{ColumnDef, ColumnType, EntityDescriptor};
    use crate::fields;
    use crate::query::compiler::Dialect;
    use crate::query::statement::Statement;
    use crate::row::Row;
    use crate::session::{AssignedKeys, ObjectId, PendingObject, StatementResult};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: Option<i64>,
        name: String,
    }

    static ITEM: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("item", "items")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("name", ColumnType::Text))
            .build()
    });

    static KEYLESS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("keyless", "keyless")
            .column(ColumnDef::new("name", ColumnType::Text))
            .build()
    });

    impl Entity for Item {
        fn descriptor() -> &'static EntityDescriptor {
            &ITEM
        }

        fn from_record(record: &Record) -> RepoResult<Self> {
            Ok(Self {
                id: record.get("id")?,
                name: record.get("name")?,
            })
        }

        fn field_values(&self) -> Fields {
            fields! { "id" => self.id, "name" => self.name.as_str() }
        }
    }

    struct Keyless;

    impl Entity for Keyless {
        fn descriptor() -> &'static EntityDescriptor {
            &KEYLESS
        }

        fn from_record(_record: &Record) -> RepoResult<Self> {
            Ok(Self)
        }

        fn field_values(&self) -> Fields {
            Fields::new()
        }
    }

    #[derive(Default)]
    struct CountingSession {
        calls: Mutex<Vec<String>>,
        next_id: AtomicU64,
    }

    impl CountingSession {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Session for CountingSession {
        fn dialect(&self) -> Dialect {
            Dialect::SQLite
        }

        async fn add(&self, _object: PendingObject) -> RepoResult<ObjectId> {
            self.calls.lock().unwrap().push("add".into());
            Ok(ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn get(
            &self,
            _descriptor: &'static EntityDescriptor,
            pk: &Value,
        ) -> RepoResult<Option<Row>> {
            self.calls.lock().unwrap().push("get".into());
            Ok((pk == &Value::Int(1)).then(|| {
                Row::new(
                    vec!["id".into(), "name".into()],
                    vec![Value::Int(1), Value::from("one")],
                )
            }))
        }

        async fn flush(&self, objects: &[ObjectId]) -> RepoResult<AssignedKeys> {
            self.calls.lock().unwrap().push(format!("flush {}", objects.len()));
            Ok(objects
                .iter()
                .map(|id| (*id, Value::Int(i64::try_from(id.0).unwrap() + 1)))
                .collect())
        }

        async fn commit(&self) -> RepoResult<AssignedKeys> {
            self.calls.lock().unwrap().push("commit".into());
            Ok(AssignedKeys::new())
        }

        async fn rollback(&self) -> RepoResult<()> {
            Ok(())
        }

        async fn execute(&self, _statement: &Statement) -> RepoResult<StatementResult> {
            Ok(StatementResult::default())
        }

        async fn scalar(&self, _statement: &Statement) -> RepoResult<Option<Value>> {
            Ok(None)
        }
    }

    #[test]
    fn test_new_rejects_keyless_entity() {
        let session = CountingSession::default();
        assert!(Repository::<Item>::new(&session).is_ok());
        assert!(matches!(
            Repository::<Keyless>::new(&session),
            Err(RepoError::ImproperlyConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_create_without_policy_stays_pending() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        let item = repo.create(fields! { "name" => "a" }).await.unwrap();
        assert_eq!(item.id, None);
        assert_eq!(session.calls(), vec!["add"]);
    }

    #[tokio::test]
    async fn test_create_with_flush_assigns_key() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        let flushing = repo.flush(true);
        let item = flushing.create(fields! { "name" => "a" }).await.unwrap();
        assert_eq!(item.id, Some(1));
        // The policy was consumed by the first call.
        let again = flushing.create(fields! { "name" => "b" }).await.unwrap();
        assert_eq!(again.id, None);
        assert_eq!(session.calls(), vec!["add", "flush 1", "add"]);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_field() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        let err = repo.create(fields! { "colour" => "red" }).await.unwrap_err();
        assert!(err.to_string().contains("'colour'"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_create_in_batches() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        let values = (0..5).map(|i| fields! { "name" => format!("n{i}") }).collect();
        let items = repo.flush(true).bulk_create(values, Some(2)).await.unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[4].id, Some(5));
        let flushes: Vec<String> = session
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("flush"))
            .collect();
        assert_eq!(flushes, vec!["flush 2", "flush 2", "flush 1"]);
    }

    #[tokio::test]
    async fn test_bulk_create_rejects_zero_batch() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        assert!(matches!(
            repo.bulk_create(vec![fields! { "name" => "x" }], Some(0)).await,
            Err(RepoError::ConfigurationError(_))
        ));
        assert!(repo.bulk_create(Vec::new(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_pk() {
        let session = CountingSession::default();
        let repo = Repository::<Item>::new(&session).unwrap();
        let found = repo.get_by_pk(1).await.unwrap().unwrap();
        assert_eq!(found.name, "one");
        assert!(repo.get_by_pk(2).await.unwrap().is_none());
    }
}
