//! Session-bound query sets.
//!
//! A [`QuerySet`] wraps a [`QueryBuilder`] together with the session it runs
//! against. Intermediate calls (`filter`, `order_by`, `options`, joins,
//! `values_list`, ...) return modified copies and never touch the database.
//! Terminal calls (`evaluate`, `count`, `first`, `delete`, ...) compile one
//! statement and make one round trip.
//!
//! ```ignore
//! let page = repo
//!     .objects()
//!     .filter([("status__code", "published")])?
//!     .options(["subsections"])?
//!     .order_by(["name"])?
//!     .slice(10..20)?
//!     .fetch()
//!     .await?;
//! ```
//!
//! Slicing is terminal in shape: once sliced, a query set rejects further
//! intermediate calls.

use std::collections::HashMap;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::ops::{Bound, RangeBounds};
use std::pin::Pin;
use std::sync::Arc;

use repokit_core::logging::query_span;
use repokit_core::{DataIntegrityWarning, Operation, RepoError, RepoResult};
use tracing::Instrument;

use crate::descriptor::EntityDescriptor;
use crate::entity::{Entity, Fields};
use crate::lifecycle::{add_entity, with_assigned_key, LifecycleFlags};
use crate::query::builder::{QueryBuilder, Returning};
use crate::query::hydrate::hydrate;
use crate::query::lookups::{LookupRegistry, LOOKUP_SEP};
use crate::query::statement::{SelectStatement, Statement};
use crate::row::{Record, Row};
use crate::session::Session;
use crate::value::{Value, ValueKey};

/// How selected rows are shaped when a query set is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Entities,
    Tuples,
    Flat,
    Named,
}

/// The result of evaluating a query set.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated<E> {
    /// An indexed entity query: the entity at that position, if any.
    Entity(Option<E>),
    /// Entities, one per distinct primary key.
    Entities(Vec<E>),
    /// `values_list` rows as positional tuples.
    Tuples(Vec<Vec<Value>>),
    /// `values_list(flat)` values.
    Flat(Vec<Value>),
    /// `values_list(named)` rows, addressable by column name.
    Named(Vec<Row>),
    /// An indexed `values_list` query: the first column of the row.
    Scalar(Option<Value>),
}

impl<E> Evaluated<E> {
    /// Returns the entities, or `None` for a projection result.
    pub fn into_entities(self) -> Option<Vec<E>> {
        match self {
            Self::Entities(entities) => Some(entities),
            Self::Entity(entity) => Some(entity.into_iter().collect()),
            _ => None,
        }
    }

    /// Returns the tuples of a `values_list` result.
    pub fn into_tuples(self) -> Option<Vec<Vec<Value>>> {
        match self {
            Self::Tuples(rows) => Some(rows),
            _ => None,
        }
    }

    /// Returns the values of a flat `values_list` result.
    pub fn into_flat(self) -> Option<Vec<Value>> {
        match self {
            Self::Flat(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the rows of a named `values_list` result.
    pub fn into_named(self) -> Option<Vec<Row>> {
        match self {
            Self::Named(rows) => Some(rows),
            _ => None,
        }
    }
}

/// What an update or delete handed back.
#[derive(Debug, Clone, PartialEq)]
pub enum Returned<E> {
    /// No `RETURNING` was configured.
    Nothing,
    /// The configured columns, one row per affected row.
    Columns(Vec<Row>),
    /// The affected rows built back into entities.
    Entities(Vec<E>),
}

/// The outcome of an update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult<E> {
    /// Rows changed.
    pub rows_affected: u64,
    /// The `RETURNING` payload.
    pub returning: Returned<E>,
}

/// A lazily evaluated query over entity `E`, bound to a session.
pub struct QuerySet<'s, E: Entity> {
    session: &'s dyn Session,
    builder: QueryBuilder,
    shape: Shape,
    scalar: bool,
    sliced: bool,
    lifecycle: LifecycleFlags,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for QuerySet<'_, E> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            builder: self.builder.clone(),
            shape: self.shape,
            scalar: self.scalar,
            sliced: self.sliced,
            lifecycle: self.lifecycle.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> std::fmt::Debug for QuerySet<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("entity", &E::descriptor().name)
            .field("builder", &self.builder)
            .field("shape", &self.shape)
            .field("scalar", &self.scalar)
            .field("sliced", &self.sliced)
            .finish_non_exhaustive()
    }
}

impl<'s, E: Entity> QuerySet<'s, E> {
    /// Creates a query set over every row of `E`.
    pub fn new(session: &'s dyn Session) -> Self {
        Self {
            session,
            builder: QueryBuilder::new(E::descriptor()),
            shape: Shape::Entities,
            scalar: false,
            sliced: false,
            lifecycle: LifecycleFlags::default(),
            _entity: PhantomData,
        }
    }

    fn descriptor() -> &'static EntityDescriptor {
        E::descriptor()
    }

    /// The underlying builder.
    pub const fn builder(&self) -> &QueryBuilder {
        &self.builder
    }

    /// Whether evaluation yields a single item.
    pub const fn is_scalar(&self) -> bool {
        self.scalar
    }

    /// Whether this query set came from slicing.
    pub const fn is_sliced(&self) -> bool {
        self.sliced
    }

    /// Builds the select this query set would run.
    pub fn to_select(&self) -> RepoResult<SelectStatement> {
        self.builder.build_select()
    }

    // ── Intermediate calls ──────────────────────────────────────────────

    fn ensure_not_sliced(&self) -> RepoResult<()> {
        if self.sliced {
            Err(RepoError::ImmutabilityViolation(format!(
                "Cannot change a {} query once it has been sliced",
                Self::descriptor().name
            )))
        } else {
            Ok(())
        }
    }

    fn derive(
        &self,
        f: impl FnOnce(&QueryBuilder) -> RepoResult<QueryBuilder>,
    ) -> RepoResult<Self> {
        self.ensure_not_sliced()?;
        let mut next = self.clone();
        next.builder = f(&self.builder)?;
        Ok(next)
    }

    /// An unmodified copy.
    pub fn all(&self) -> Self {
        self.clone()
    }

    /// Narrows the query; see [`QueryBuilder::filter`].
    pub fn filter<I, K, V>(&self, conditions: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.derive(|b| b.filter(conditions))
    }

    /// Orders the query; see [`QueryBuilder::order_by`].
    pub fn order_by<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.derive(|b| b.order_by(fields))
    }

    /// Eager-loads relationship paths.
    pub fn options<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.derive(|b| b.options(fields))
    }

    /// Inner-joins relationship paths.
    pub fn innerjoin<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.derive(|b| b.join(fields, false))
    }

    /// Left-outer-joins relationship paths.
    pub fn outerjoin<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.derive(|b| b.join(fields, true))
    }

    /// Replaces the execution options handed to the session.
    pub fn execution_options<I, K>(&self, options: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.derive(|b| Ok(b.execution_options(options)))
    }

    /// Configures `RETURNING` for [`update`](Self::update) and
    /// [`delete`](Self::delete).
    pub fn returning<I, S>(&self, fields: I, return_entity: bool) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.derive(|b| b.returning(fields, return_entity))
    }

    /// Selects root columns instead of entities.
    ///
    /// `flat` yields bare values and needs exactly one column; `named`
    /// yields rows addressable by column name; otherwise rows are tuples.
    pub fn values_list<I, S>(&self, fields: I, flat: bool, named: bool) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_not_sliced()?;
        if flat && named {
            return Err(RepoError::ConfigurationError(
                "values_list() takes flat or named, not both".into(),
            ));
        }
        let mut next = self.derive(|b| b.values_list(fields))?;
        if flat && next.builder.projection().len() > 1 {
            return Err(RepoError::ConfigurationError(
                "values_list(flat) takes exactly one field".into(),
            ));
        }
        next.shape = if next.builder.projection().is_empty() {
            Shape::Entities
        } else if named {
            Shape::Named
        } else if flat {
            Shape::Flat
        } else {
            Shape::Tuples
        };
        Ok(next)
    }

    /// Eliminates duplicate rows.
    pub fn distinct(&self) -> RepoResult<Self> {
        self.derive(|b| Ok(b.distinct()))
    }

    /// Resolves filter lookups against another registry.
    pub fn with_lookups(&self, lookups: Arc<LookupRegistry>) -> RepoResult<Self> {
        self.derive(|b| Ok(b.with_lookups(lookups)))
    }

    /// Requests a flush of new objects after the next mutating call.
    pub fn flush(&self, flush: bool) -> RepoResult<Self> {
        self.ensure_not_sliced()?;
        let mut next = self.clone();
        next.lifecycle = self.lifecycle.with_flush(flush);
        Ok(next)
    }

    /// Requests a commit after the next mutating call.
    pub fn commit(&self, commit: bool) -> RepoResult<Self> {
        self.ensure_not_sliced()?;
        let mut next = self.clone();
        next.lifecycle = self.lifecycle.with_commit(commit);
        Ok(next)
    }

    // ── Slicing ─────────────────────────────────────────────────────────

    /// Selects the single row at `index`: offset `index`, limit 1.
    pub fn at(&self, index: i64) -> RepoResult<Self> {
        self.ensure_not_sliced()?;
        if index < 0 {
            return Err(RepoError::ConfigurationError(format!(
                "Negative indexing is not supported, got {index}"
            )));
        }
        let mut next = self.clone();
        next.builder = self.builder.with_bounds(Some(1), Some(index))?;
        next.scalar = true;
        next.sliced = true;
        Ok(next)
    }

    /// Bounds the query to a half-open range of rows.
    ///
    /// `a..b` gives offset `a` and limit `b - a`; `..b` gives offset 0 and
    /// limit `b`; `a..` gives offset `a` with no limit; `..` clears both.
    pub fn slice<R: RangeBounds<i64>>(&self, range: R) -> RepoResult<Self> {
        self.ensure_not_sliced()?;
        let start = match range.start_bound() {
            Bound::Included(&a) => Some(a),
            Bound::Excluded(&a) => Some(a.saturating_add(1)),
            Bound::Unbounded => None,
        };
        let stop = match range.end_bound() {
            Bound::Included(&b) => Some(b.saturating_add(1)),
            Bound::Excluded(&b) => Some(b),
            Bound::Unbounded => None,
        };
        if start.is_some_and(|a| a < 0) || stop.is_some_and(|b| b < 0) {
            return Err(RepoError::ConfigurationError(
                "Negative indexing is not supported".into(),
            ));
        }
        let (limit, offset) = match (start, stop) {
            (None, None) => (None, None),
            (None, Some(b)) => (Some(b), Some(0)),
            (Some(a), None) => (None, Some(a)),
            (Some(a), Some(b)) if a >= b => {
                return Err(RepoError::ConfigurationError(format!(
                    "Slice start must be less than its end, got {a}..{b}"
                )))
            }
            (Some(a), Some(b)) => (Some(b - a), Some(a)),
        };
        let mut next = self.clone();
        next.builder = self.builder.with_bounds(limit, offset)?;
        next.scalar = false;
        next.sliced = true;
        Ok(next)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    async fn fetch_records(&self, builder: &QueryBuilder) -> RepoResult<Vec<Record>> {
        let stmt = builder.build_select()?;
        let plan = stmt.load_plan.clone().ok_or_else(|| {
            RepoError::ConfigurationError(
                "This call returns entities and cannot follow values_list()".into(),
            )
        })?;
        let result = self.session.execute(&Statement::Select(stmt)).await?;
        hydrate(&plan, &result.rows)
    }

    async fn fetch_entities(&self, builder: &QueryBuilder) -> RepoResult<Vec<E>> {
        self.fetch_records(builder)
            .await?
            .iter()
            .map(E::from_record)
            .collect()
    }

    /// Runs the query and shapes its rows.
    pub async fn evaluate(&self) -> RepoResult<Evaluated<E>> {
        let span = query_span(Self::descriptor().name, "evaluate");
        async {
            tracing::debug!(
                limit = ?self.builder.limit_value(),
                offset = ?self.builder.offset_value(),
                options = self.builder.option_paths().len(),
                "evaluating query set"
            );
            if self.shape == Shape::Entities {
                let entities = self.fetch_entities(&self.builder).await?;
                return Ok(if self.scalar {
                    Evaluated::Entity(entities.into_iter().next())
                } else {
                    Evaluated::Entities(entities)
                });
            }

            let descriptor = Self::descriptor();
            let stmt = Statement::Select(self.builder.build_select()?);
            if self.scalar {
                let value = self.session.scalar(&stmt).await?;
                let column = self
                    .builder
                    .projection()
                    .first()
                    .and_then(|name| descriptor.column(name));
                return Ok(Evaluated::Scalar(match (value, column) {
                    (Some(v), Some(col)) => Some(col.column_type.normalize(v)),
                    (v, _) => v,
                }));
            }

            let rows: Vec<Row> = self
                .session
                .execute(&stmt)
                .await?
                .rows
                .iter()
                .map(|row| normalize_row(descriptor, row))
                .collect();
            Ok(match self.shape {
                Shape::Flat => Evaluated::Flat(
                    rows.into_iter()
                        .filter_map(|row| row.into_values().into_iter().next())
                        .collect(),
                ),
                Shape::Named => Evaluated::Named(rows),
                Shape::Tuples | Shape::Entities => {
                    Evaluated::Tuples(rows.into_iter().map(Row::into_values).collect())
                }
            })
        }
        .instrument(span)
        .await
    }

    /// Runs the query and returns its entities.
    pub async fn fetch(&self) -> RepoResult<Vec<E>> {
        self.evaluate().await?.into_entities().ok_or_else(|| {
            RepoError::ConfigurationError(
                "fetch() returns entities; evaluate() a values_list() query instead".into(),
            )
        })
    }

    /// Counts distinct matching entities.
    pub async fn count(&self) -> RepoResult<u64> {
        let stmt = self.builder.build_count()?;
        let span = query_span(Self::descriptor().name, "count");
        let value = self
            .session
            .scalar(&Statement::Select(stmt))
            .instrument(span)
            .await?;
        let count = value.as_ref().and_then(Value::as_int).unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Whether any entity matches.
    pub async fn exists(&self) -> RepoResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// The first matching entity, if any. Same as `at(0)`.
    ///
    /// A `values_list` set answers [`first_value`](Self::first_value) instead.
    pub async fn first(&self) -> RepoResult<Option<E>> {
        match self.at(0)?.evaluate().await? {
            Evaluated::Entity(entity) => Ok(entity),
            _ => Err(RepoError::ConfigurationError(
                "first() returns an entity; use first_value() after values_list()".into(),
            )),
        }
    }

    /// The first column of the first row of a `values_list` set, if any.
    pub async fn first_value(&self) -> RepoResult<Option<Value>> {
        match self.at(0)?.evaluate().await? {
            Evaluated::Scalar(value) => Ok(value),
            _ => Err(RepoError::ConfigurationError(
                "first_value() needs values_list(); use first() for entities".into(),
            )),
        }
    }

    /// The single matching entity, `None` when nothing matches, or an
    /// error when more than one does.
    pub async fn get_one_or_none(&self) -> RepoResult<Option<E>> {
        self.ensure_not_sliced()?;
        let bounded = self.builder.with_bounds(Some(2), Some(0))?;
        let span = query_span(Self::descriptor().name, "get_one_or_none");
        let mut entities = self.fetch_entities(&bounded).instrument(span).await?;
        if entities.len() > 1 {
            return Err(RepoError::MultipleObjectsReturned(format!(
                "get_one_or_none() found more than one {}",
                Self::descriptor().name
            )));
        }
        Ok(entities.pop())
    }

    /// Maps each entity by the value of `field`.
    ///
    /// `Some(empty)` returns an empty map without a round trip; `None`
    /// loads every matching row.
    pub async fn in_bulk(
        &self,
        ids: Option<Vec<Value>>,
        field: &str,
    ) -> RepoResult<HashMap<ValueKey, E>> {
        self.ensure_not_sliced()?;
        let descriptor = Self::descriptor();
        if let Some(warning) = in_bulk_key_warning(descriptor, field)? {
            warning.emit();
        }

        let builder = match ids {
            Some(ids) if ids.is_empty() => return Ok(HashMap::new()),
            Some(ids) => self
                .builder
                .filter([(format!("{field}{LOOKUP_SEP}in"), Value::List(ids))])?,
            None => self.builder.clone(),
        };
        let span = query_span(descriptor.name, "in_bulk");
        let records = self.fetch_records(&builder).instrument(span).await?;

        let mut out = HashMap::with_capacity(records.len());
        for record in &records {
            let Some(value) = record.value(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            out.insert(ValueKey::try_from(value)?, E::from_record(record)?);
        }
        Ok(out)
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Returns the entity matching `filters`, creating it from the plain
    /// (non-path) filters plus `defaults` when there is none.
    ///
    /// The flag is `true` iff a new entity was created.
    pub async fn get_or_create<I, K, V>(
        &self,
        defaults: Fields,
        filters: I,
    ) -> RepoResult<(E, bool)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let filters: Fields = filters
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.into()))
            .collect();
        if let Some(found) = self.filter(filters.clone())?.get_one_or_none().await? {
            return Ok((found, false));
        }

        let mut params: Fields = filters
            .into_iter()
            .filter(|(key, _)| !key.contains(LOOKUP_SEP))
            .collect();
        params.extend(defaults);
        let entity = E::from_fields(&params)?;

        let id = add_entity(self.session, &entity).await?;
        let keys = self.lifecycle.take().apply(self.session, &[id]).await?;
        tracing::debug!(entity = Self::descriptor().name, "get_or_create inserted a new row");
        Ok((with_assigned_key(entity, id, &keys)?, true))
    }

    /// Creates the entity matching `filters` from `create_defaults` (or
    /// `defaults` when absent), or applies `defaults` to the existing one.
    ///
    /// The flag is `true` iff a new entity was created.
    pub async fn update_or_create<I, K, V>(
        &self,
        defaults: Fields,
        create_defaults: Option<Fields>,
        filters: I,
    ) -> RepoResult<(E, bool)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let descriptor = Self::descriptor();
        let create_defaults = create_defaults.unwrap_or_else(|| defaults.clone());
        let (entity, created) = self.get_or_create(create_defaults, filters).await?;
        if created {
            return Ok((entity, true));
        }

        let entity = if defaults.is_empty() {
            entity
        } else {
            let pk = descriptor.primary_key()?;
            let stmt = QueryBuilder::new(descriptor)
                .filter([(pk.name, entity.pk()?)])?
                .build_update(&defaults)?;
            self.session.execute(&Statement::Update(stmt)).await?;
            entity.with_fields(&defaults)?
        };
        self.lifecycle.take().apply(self.session, &[]).await?;
        Ok((entity, false))
    }

    /// Deletes every matching row.
    pub async fn delete(&self) -> RepoResult<MutationResult<E>> {
        self.ensure_not_sliced()?;
        let stmt = self.builder.build_delete()?;
        let span = query_span(Self::descriptor().name, "delete");
        let result = self
            .session
            .execute(&Statement::Delete(stmt))
            .instrument(span)
            .await?;
        self.lifecycle.take().apply(self.session, &[]).await?;
        tracing::debug!(rows = result.rows_affected, "deleted");
        Ok(MutationResult {
            rows_affected: result.rows_affected,
            returning: self.returned(&result.rows)?,
        })
    }

    /// Applies `values` to every matching row.
    pub async fn update(&self, values: Fields) -> RepoResult<MutationResult<E>> {
        self.ensure_not_sliced()?;
        let stmt = self.builder.build_update(&values)?;
        let span = query_span(Self::descriptor().name, "update");
        let result = self
            .session
            .execute(&Statement::Update(stmt))
            .instrument(span)
            .await?;
        self.lifecycle.take().apply(self.session, &[]).await?;
        tracing::debug!(rows = result.rows_affected, "updated");
        Ok(MutationResult {
            rows_affected: result.rows_affected,
            returning: self.returned(&result.rows)?,
        })
    }

    fn returned(&self, rows: &[Row]) -> RepoResult<Returned<E>> {
        let descriptor = Self::descriptor();
        Ok(match self.builder.returning_spec() {
            Returning::None => Returned::Nothing,
            Returning::Columns(_) => Returned::Columns(
                rows.iter().map(|row| normalize_row(descriptor, row)).collect(),
            ),
            Returning::Entity => Returned::Entities(
                rows.iter()
                    .map(|row| E::from_record(&Record::from_row(descriptor, row)))
                    .collect::<RepoResult<Vec<_>>>()?,
            ),
        })
    }
}

/// The warning `in_bulk` raises when `field` may repeat across rows.
///
/// Primary-key and unique columns need none.
fn in_bulk_key_warning(
    descriptor: &EntityDescriptor,
    field: &str,
) -> RepoResult<Option<DataIntegrityWarning>> {
    let column = descriptor
        .column(field)
        .ok_or_else(|| RepoError::field_resolution(Operation::InBulk, field, field))?;
    if column.is_unique() {
        return Ok(None);
    }
    Ok(Some(DataIntegrityWarning::new(
        descriptor.name,
        field,
        "in_bulk() keyed on a non-unique field keeps one entity per value",
    )))
}

/// Normalises a plain-labelled row by column type, keeping its column order.
fn normalize_row(descriptor: &EntityDescriptor, row: &Row) -> Row {
    Row::from_pairs(row.columns().iter().zip(row.values()).map(|(label, value)| {
        let value = descriptor.column(label).map_or_else(
            || value.clone(),
            |col| col.column_type.normalize(value.clone()),
        );
        (label.clone(), value)
    }))
}

impl<'s, E: Entity> IntoFuture for QuerySet<'s, E> {
    type Output = RepoResult<Evaluated<E>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send + 's>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.evaluate().await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{LazyLock, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::descriptor::{ColumnDef, ColumnType, Relationship};
    use crate::fields;
    use crate::query::compiler::{Dialect, SqlCompiler};
    use crate::session::{AssignedKeys, ObjectId, PendingObject, StatementResult};

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: Option<i64>,
        label: String,
        group_id: Option<i64>,
    }

    static TAG: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("tag", "tags")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("label", ColumnType::Text))
            .column(ColumnDef::new("group_id", ColumnType::Integer).nullable())
            .relationship(Relationship::many_to_one("group", || &*GROUP, "group_id", "id"))
            .build()
    });

    static GROUP: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("group", "groups")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("name", ColumnType::Text))
            .build()
    });

    impl Entity for Tag {
        fn descriptor() -> &'static EntityDescriptor {
            &TAG
        }

        fn from_record(record: &Record) -> RepoResult<Self> {
            Ok(Self {
                id: record.get("id")?,
                label: record.get("label")?,
                group_id: record.get("group_id")?,
            })
        }

        fn field_values(&self) -> Fields {
            fields! { "id" => self.id, "label" => self.label.as_str(), "group_id" => self.group_id }
        }
    }

    /// Records every call and answers selects with canned rows.
    #[derive(Default)]
    struct MockSession {
        calls: Mutex<Vec<String>>,
        rows: Mutex<Vec<Row>>,
        pending: Mutex<Vec<ObjectId>>,
        next_id: AtomicU64,
    }

    impl MockSession {
        fn with_tags(tags: &[(i64, &str)]) -> Self {
            let session = Self::default();
            *session.rows.lock().unwrap() = tags
                .iter()
                .map(|(id, label)| {
                    Row::new(
                        vec!["tags.id".into(), "tags.label".into(), "tags.group_id".into()],
                        vec![Value::Int(*id), Value::from(*label), Value::Null],
                    )
                })
                .collect();
            session
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn assign(&self, ids: &[ObjectId]) -> AssignedKeys {
            let mut pending = self.pending.lock().unwrap();
            let keys: AssignedKeys = ids
                .iter()
                .filter(|id| pending.contains(id))
                .map(|id| (*id, Value::Int(100 + i64::try_from(id.0).unwrap())))
                .collect();
            pending.retain(|id| !ids.contains(id));
            keys
        }
    }

    #[async_trait]
    impl Session for MockSession {
        fn dialect(&self) -> Dialect {
            Dialect::SQLite
        }

        async fn add(&self, object: PendingObject) -> RepoResult<ObjectId> {
            self.record(format!("add {}", object.descriptor.table));
            let id = ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.pending.lock().unwrap().push(id);
            Ok(id)
        }

        async fn get(
            &self,
            _descriptor: &'static EntityDescriptor,
            _pk: &Value,
        ) -> RepoResult<Option<Row>> {
            self.record("get");
            Ok(None)
        }

        async fn flush(&self, objects: &[ObjectId]) -> RepoResult<AssignedKeys> {
            self.record("flush");
            Ok(self.assign(objects))
        }

        async fn commit(&self) -> RepoResult<AssignedKeys> {
            self.record("commit");
            let all = self.pending.lock().unwrap().clone();
            Ok(self.assign(&all))
        }

        async fn rollback(&self) -> RepoResult<()> {
            self.record("rollback");
            Ok(())
        }

        async fn execute(&self, statement: &Statement) -> RepoResult<StatementResult> {
            let (sql, _) = SqlCompiler::new(self.dialect()).compile(statement);
            self.record(format!("execute {sql}"));
            let rows = self.rows.lock().unwrap().clone();
            Ok(match statement {
                Statement::Select(_) => StatementResult {
                    rows,
                    rows_affected: 0,
                },
                _ => StatementResult {
                    rows: Vec::new(),
                    rows_affected: rows.len() as u64,
                },
            })
        }

        async fn scalar(&self, statement: &Statement) -> RepoResult<Option<Value>> {
            let (sql, _) = SqlCompiler::new(self.dialect()).compile(statement);
            self.record(format!("scalar {sql}"));
            let n = self.rows.lock().unwrap().len();
            Ok(Some(Value::Int(i64::try_from(n).unwrap())))
        }
    }

    #[test]
    fn test_slice_bounds() {
        let session = MockSession::default();
        let qs = QuerySet::<Tag>::new(&session);

        let s = qs.slice(2..5).unwrap();
        assert_eq!(s.builder().offset_value(), Some(2));
        assert_eq!(s.builder().limit_value(), Some(3));
        assert!(!s.is_scalar());

        let s = qs.slice(5..).unwrap();
        assert_eq!(s.builder().offset_value(), Some(5));
        assert_eq!(s.builder().limit_value(), None);

        let s = qs.slice(..5).unwrap();
        assert_eq!(s.builder().offset_value(), Some(0));
        assert_eq!(s.builder().limit_value(), Some(5));

        let s = qs.slice(1..=3).unwrap();
        assert_eq!(s.builder().limit_value(), Some(3));

        let s = qs.slice(..).unwrap();
        assert_eq!(s.builder().limit_value(), None);
        assert_eq!(s.builder().offset_value(), None);

        let s = qs.at(3).unwrap();
        assert_eq!(s.builder().offset_value(), Some(3));
        assert_eq!(s.builder().limit_value(), Some(1));
        assert!(s.is_scalar());
    }

    #[test]
    fn test_invalid_slices() {
        let session = MockSession::default();
        let qs = QuerySet::<Tag>::new(&session);
        assert!(matches!(qs.slice(3..1), Err(RepoError::ConfigurationError(_))));
        assert!(matches!(qs.slice(2..2), Err(RepoError::ConfigurationError(_))));
        assert!(matches!(qs.at(-1), Err(RepoError::ConfigurationError(_))));
        assert!(matches!(qs.slice(-2..), Err(RepoError::ConfigurationError(_))));
    }

    #[test]
    fn test_sliced_set_rejects_intermediate_calls() {
        let session = MockSession::default();
        let qs = QuerySet::<Tag>::new(&session);
        let sliced = qs.slice(..5).unwrap();
        assert!(!qs.is_sliced());
        assert!(matches!(
            sliced.filter([("label", "x")]),
            Err(RepoError::ImmutabilityViolation(_))
        ));
        assert!(matches!(
            sliced.order_by(["id"]),
            Err(RepoError::ImmutabilityViolation(_))
        ));
        assert!(matches!(sliced.at(0), Err(RepoError::ImmutabilityViolation(_))));
        assert!(matches!(
            sliced.values_list(["id"], true, false),
            Err(RepoError::ImmutabilityViolation(_))
        ));
        assert!(matches!(sliced.commit(true), Err(RepoError::ImmutabilityViolation(_))));
        assert!(matches!(
            sliced.values_list(["id"], true, true),
            Err(RepoError::ImmutabilityViolation(_))
        ));
        // The receiver stays usable.
        assert!(qs.filter([("label", "x")]).is_ok());
    }

    #[test]
    fn test_values_list_flag_checks() {
        let session = MockSession::default();
        let qs = QuerySet::<Tag>::new(&session);
        assert!(qs.values_list(["id"], true, true).is_err());
        assert!(qs.values_list(["id", "label"], true, false).is_err());
        assert!(qs.values_list(["id"], true, false).is_ok());
    }

    #[tokio::test]
    async fn test_evaluate_entities_once() {
        let session = MockSession::with_tags(&[(1, "a"), (2, "b")]);
        let tags = QuerySet::<Tag>::new(&session)
            .filter([("label__in", Value::list(["a", "b"]))])
            .unwrap()
            .await
            .unwrap()
            .into_entities()
            .unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].label, "b");
        let calls = session.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("\"tags\".\"label\" IN (?, ?)"));
    }

    #[tokio::test]
    async fn test_evaluate_indexed_entity() {
        let session = MockSession::with_tags(&[(7, "x")]);
        let qs = QuerySet::<Tag>::new(&session).at(0).unwrap();
        match qs.evaluate().await.unwrap() {
            Evaluated::Entity(Some(tag)) => assert_eq!(tag.id, Some(7)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.calls()[0].ends_with("LIMIT 1 OFFSET 0"));
    }

    #[tokio::test]
    async fn test_count_and_exists() {
        let session = MockSession::with_tags(&[(1, "a"), (2, "b"), (3, "c")]);
        let qs = QuerySet::<Tag>::new(&session);
        assert_eq!(qs.count().await.unwrap(), 3);
        assert!(qs.exists().await.unwrap());
        assert!(session.calls()[0].starts_with("scalar SELECT COUNT(DISTINCT"));
    }

    #[tokio::test]
    async fn test_get_one_or_none_rejects_many() {
        let session = MockSession::with_tags(&[(1, "a"), (2, "a")]);
        let qs = QuerySet::<Tag>::new(&session)
            .filter([("label", "a")])
            .unwrap();
        assert!(matches!(
            qs.get_one_or_none().await,
            Err(RepoError::MultipleObjectsReturned(_))
        ));
        assert!(session.calls()[0].ends_with("LIMIT 2 OFFSET 0"));
    }

    #[tokio::test]
    async fn test_in_bulk_empty_list_makes_no_round_trip() {
        let session = MockSession::with_tags(&[(1, "a")]);
        let qs = QuerySet::<Tag>::new(&session);
        let map = qs.in_bulk(Some(vec![]), "id").await.unwrap();
        assert!(map.is_empty());
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_in_bulk_all_rows() {
        let session = MockSession::with_tags(&[(1, "a"), (2, "b")]);
        let map = QuerySet::<Tag>::new(&session)
            .in_bulk(None, "id")
            .await
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&ValueKey::from(2)].label, "b");

        let by_label = QuerySet::<Tag>::new(&session)
            .in_bulk(None, "label")
            .await
            .unwrap();
        assert!(by_label.contains_key(&ValueKey::from("a")));
        assert!(QuerySet::<Tag>::new(&session)
            .in_bulk(None, "nope")
            .await
            .is_err());
    }

    #[test]
    fn test_in_bulk_warns_only_for_non_unique_keys() {
        let warning = in_bulk_key_warning(&TAG, "label").unwrap().unwrap();
        assert_eq!(warning.entity, "tag");
        assert_eq!(warning.field, "label");
        assert!(in_bulk_key_warning(&TAG, "id").unwrap().is_none());

        let page = EntityDescriptor::builder("page", "pages")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("slug", ColumnType::Text).unique())
            .build();
        assert!(in_bulk_key_warning(&page, "slug").unwrap().is_none());

        let err = in_bulk_key_warning(&TAG, "nope").unwrap_err();
        assert!(matches!(err, RepoError::FieldResolution { .. }));
    }

    #[tokio::test]
    async fn test_get_or_create_flushes_and_assigns_key() {
        let session = MockSession::default();
        let qs = QuerySet::<Tag>::new(&session).flush(true).unwrap();
        let (tag, created) = qs
            .get_or_create(fields! { "group_id" => 4 }, [("label", "new"), ("group__name", "g")])
            .await
            .unwrap();
        assert!(created);
        assert_eq!(tag.label, "new");
        assert_eq!(tag.group_id, Some(4));
        assert_eq!(tag.id, Some(100));
        let calls = session.calls();
        assert!(calls[0].starts_with("execute SELECT"));
        assert_eq!(&calls[1..], &["add tags".to_string(), "flush".to_string()]);
    }

    #[tokio::test]
    async fn test_update_or_create_reports_existing_row_as_not_created() {
        let session = MockSession::with_tags(&[(5, "old")]);
        let qs = QuerySet::<Tag>::new(&session);
        let (tag, created) = qs
            .update_or_create(fields! { "group_id" => 9 }, None, [("label", "old")])
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(tag.group_id, Some(9));
        let calls = session.calls();
        assert!(calls[1].starts_with("execute UPDATE \"tags\" SET \"group_id\" = ?"));
    }

    #[tokio::test]
    async fn test_update_or_create_reports_new_row_as_created() {
        let session = MockSession::default();
        let (tag, created) = QuerySet::<Tag>::new(&session)
            .update_or_create(fields! { "group_id" => 1 }, None, [("label", "fresh")])
            .await
            .unwrap();
        assert!(created);
        assert_eq!(tag.group_id, Some(1));
    }

    #[tokio::test]
    async fn test_lifecycle_flags_consumed_once() {
        let session = MockSession::with_tags(&[(1, "a")]);
        let qs = QuerySet::<Tag>::new(&session).commit(true).unwrap();
        qs.delete().await.unwrap();
        qs.delete().await.unwrap();
        let commits = session.calls().iter().filter(|c| *c == "commit").count();
        assert_eq!(commits, 1);
    }

    #[tokio::test]
    async fn test_update_returning_columns() {
        let session = MockSession::with_tags(&[(1, "a")]);
        let result = QuerySet::<Tag>::new(&session)
            .returning(["id"], false)
            .unwrap()
            .update(fields! { "label" => "b" })
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert!(matches!(result.returning, Returned::Columns(_)));
        assert!(matches!(
            QuerySet::<Tag>::new(&session).update(fields! {}).await,
            Err(RepoError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_sliced_set_rejects_mutations() {
        let session = MockSession::default();
        let sliced = QuerySet::<Tag>::new(&session).slice(..3).unwrap();
        assert!(matches!(sliced.delete().await, Err(RepoError::ImmutabilityViolation(_))));
        assert!(matches!(
            sliced.in_bulk(None, "id").await,
            Err(RepoError::ImmutabilityViolation(_))
        ));
        assert!(session.calls().is_empty());
    }
}
