//! The [`Entity`] trait and construction helpers.
//!
//! Entities are plain values. They describe themselves through a static
//! [`EntityDescriptor`], are built from hydrated [`Record`]s, and hand their
//! column values back as [`Fields`] when persisted.

use repokit_core::{Operation, RepoError, RepoResult};

use crate::descriptor::EntityDescriptor;
use crate::row::{Record, Row};
use crate::value::Value;

/// Ordered `(column, value)` pairs, as passed to `create`, `update`, and
/// the defaults of `get_or_create`.
pub type Fields = Vec<(String, Value)>;

/// Builds a [`Fields`] list.
///
/// ```
/// use repokit_db::fields;
/// use repokit_db::value::Value;
///
/// let f = fields! { "title" => "Intro", "position" => 1 };
/// assert_eq!(f[1], ("position".to_string(), Value::Int(1)));
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::value::Value)>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$((::std::string::String::from($key), $crate::value::Value::from($value))),+]
    };
}

/// A persistent entity.
///
/// # Examples
///
/// ```
/// use std::sync::LazyLock;
/// use repokit_core::RepoResult;
/// use repokit_db::descriptor::{ColumnDef, ColumnType, EntityDescriptor};
/// use repokit_db::entity::{Entity, Fields};
/// use repokit_db::fields;
/// use repokit_db::row::Record;
///
/// struct Tag {
///     id: Option<i64>,
///     label: String,
/// }
///
/// static TAG: LazyLock<EntityDescriptor> = LazyLock::new(|| {
///     EntityDescriptor::builder("tag", "tags")
///         .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
///         .column(ColumnDef::new("label", ColumnType::Text).unique())
///         .build()
/// });
///
/// impl Entity for Tag {
///     fn descriptor() -> &'static EntityDescriptor {
///         &TAG
///     }
///
///     fn from_record(record: &Record) -> RepoResult<Self> {
///         Ok(Self {
///             id: record.get("id")?,
///             label: record.get("label")?,
///         })
///     }
///
///     fn field_values(&self) -> Fields {
///         fields! { "id" => self.id, "label" => self.label.as_str() }
///     }
/// }
///
/// let tag = Tag::from_fields(&fields! { "label" => "rust" }).unwrap();
/// assert_eq!(tag.label, "rust");
/// assert!(tag.pk().unwrap().is_null());
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    /// Returns the static descriptor for this entity type.
    fn descriptor() -> &'static EntityDescriptor;

    /// Builds an instance from a hydrated record.
    fn from_record(record: &Record) -> RepoResult<Self>;

    /// Returns every column value of this instance.
    fn field_values(&self) -> Fields;

    /// Returns the primary key value, `Null` while unsaved.
    fn pk(&self) -> RepoResult<Value> {
        let pk = Self::descriptor().primary_key()?;
        Ok(self
            .field_values()
            .into_iter()
            .find(|(name, _)| name == pk.name)
            .map_or(Value::Null, |(_, v)| v))
    }

    /// Builds an unsaved instance from construction parameters.
    ///
    /// Columns not named in `fields` are NULL.
    fn from_fields(fields: &Fields) -> RepoResult<Self> {
        Self::from_record(&record_from_fields(Self::descriptor(), fields, Operation::Create)?)
    }

    /// Returns a copy of this instance with `changes` applied.
    fn with_fields(&self, changes: &Fields) -> RepoResult<Self> {
        let mut merged = self.field_values();
        for (name, value) in changes {
            match merged.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }
        Self::from_fields(&merged)
    }
}

/// Lays `fields` out over every column of `descriptor`.
///
/// Unknown names fail with a field-resolution error attributed to `operation`.
pub fn record_from_fields(
    descriptor: &EntityDescriptor,
    fields: &Fields,
    operation: Operation,
) -> RepoResult<Record> {
    if let Some((name, _)) = fields.iter().find(|(name, _)| !descriptor.has_column(name)) {
        return Err(RepoError::field_resolution(operation, name, name));
    }
    let pairs = descriptor.columns().iter().map(|col| {
        let value = fields
            .iter()
            .rev()
            .find(|(name, _)| name == col.name)
            .map_or(Value::Null, |(_, v)| v.clone());
        (col.name.to_string(), value)
    });
    Ok(Record::new(Row::from_pairs(pairs)))
}
