//! Static entity metadata.
//!
//! An [`EntityDescriptor`] declares an entity's table, its columns, and the
//! relationships the query builder may traverse. Descriptors are built once,
//! usually inside a `LazyLock`, and referenced as `&'static`. Relationship
//! targets are reached through a function pointer so two descriptors can
//! point at each other.
//!
//! # Examples
//!
//! ```
//! use std::sync::LazyLock;
//! use repokit_db::descriptor::{ColumnDef, ColumnType, EntityDescriptor, Relationship};
//!
//! static STATUS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
//!     EntityDescriptor::builder("status", "statuses")
//!         .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!         .column(ColumnDef::new("code", ColumnType::Text).unique())
//!         .build()
//! });
//!
//! static SECTION: LazyLock<EntityDescriptor> = LazyLock::new(|| {
//!     EntityDescriptor::builder("section", "sections")
//!         .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
//!         .column(ColumnDef::new("status_id", ColumnType::Integer).nullable())
//!         .relationship(Relationship::many_to_one("status", || &*STATUS, "status_id", "id"))
//!         .build()
//! });
//!
//! assert!(SECTION.validate().is_ok());
//! assert_eq!(SECTION.primary_key().unwrap().name, "id");
//! ```

use std::collections::HashSet;
use std::fmt;

use repokit_core::{RepoError, RepoResult};

use crate::value::Value;

/// The storage type of a column.
///
/// Used to normalise raw driver values (for example `SQLite` integers back
/// into booleans) before they reach entity constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// Floating point.
    Float,
    /// Text.
    Text,
    /// Boolean.
    Boolean,
    /// Binary data.
    Bytes,
    /// Date without time.
    Date,
    /// Date and time without timezone.
    DateTime,
    /// Date and time in UTC.
    DateTimeTz,
    /// Time without date.
    Time,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
}

impl ColumnType {
    /// Converts a raw driver value into this column's canonical [`Value`] variant.
    ///
    /// Values that cannot be interpreted are returned unchanged so the
    /// entity constructor can report the mismatch.
    pub fn normalize(self, value: Value) -> Value {
        match (self, value) {
            (Self::Boolean, Value::Int(i)) => Value::Bool(i != 0),
            (Self::Float, Value::Int(i)) => Value::Float(i as f64),
            (Self::Date, Value::String(s)) => s
                .parse::<chrono::NaiveDate>()
                .map_or(Value::String(s), Value::Date),
            (Self::DateTime, Value::String(s)) => {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f"))
                    .map_or(Value::String(s), Value::DateTime)
            }
            (Self::DateTimeTz, Value::String(s)) => chrono::DateTime::parse_from_rfc3339(&s)
                .map_or(Value::String(s), |dt| Value::DateTimeTz(dt.with_timezone(&chrono::Utc))),
            (Self::Time, Value::String(s)) => s
                .parse::<chrono::NaiveTime>()
                .map_or(Value::String(s), Value::Time),
            (Self::Uuid, Value::String(s)) => s
                .parse::<uuid::Uuid>()
                .map_or(Value::String(s), Value::Uuid),
            (Self::Json, Value::String(s)) => {
                serde_json::from_str(&s).map_or(Value::String(s), Value::Json)
            }
            (_, value) => value,
        }
    }
}

/// One column of an entity's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// The column name.
    pub name: &'static str,
    /// The storage type.
    pub column_type: ColumnType,
    /// Whether this column is (part of) the primary key.
    pub primary_key: bool,
    /// Whether a UNIQUE constraint applies.
    pub unique: bool,
    /// Whether NULL is allowed.
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a non-null, non-unique column.
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            primary_key: false,
            unique: false,
            nullable: false,
        }
    }

    /// Marks this column as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks this column as having a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Allows NULL values.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Whether lookups on this column can match at most one row.
    pub const fn is_unique(&self) -> bool {
        self.primary_key || self.unique
    }
}

/// How many target rows one source row relates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// The source holds a foreign key to one target.
    ManyToOne,
    /// Many targets hold a foreign key to the source.
    OneToMany,
    /// At most one target per source.
    OneToOne,
}

impl Cardinality {
    /// Whether traversing this relationship yields a collection.
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany)
    }
}

/// A traversable relationship from one entity to another.
///
/// The join condition is `source.local_column = target.remote_column`.
#[derive(Clone)]
pub struct Relationship {
    /// The relationship name used in dotted paths.
    pub name: &'static str,
    /// Resolves the target descriptor.
    pub target: fn() -> &'static EntityDescriptor,
    /// The column on the source entity.
    pub local_column: &'static str,
    /// The column on the target entity.
    pub remote_column: &'static str,
    /// The relationship's cardinality.
    pub cardinality: Cardinality,
}

impl Relationship {
    /// Creates a relationship.
    pub const fn new(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        local_column: &'static str,
        remote_column: &'static str,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name,
            target,
            local_column,
            remote_column,
            cardinality,
        }
    }

    /// A foreign key on the source pointing at the target.
    pub const fn many_to_one(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self::new(name, target, local_column, remote_column, Cardinality::ManyToOne)
    }

    /// A collection of targets that point back at the source.
    pub const fn one_to_many(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self::new(name, target, local_column, remote_column, Cardinality::OneToMany)
    }

    /// A single related target.
    pub const fn one_to_one(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        Self::new(name, target, local_column, remote_column, Cardinality::OneToOne)
    }

    /// Returns the target descriptor.
    pub fn target(&self) -> &'static EntityDescriptor {
        (self.target)()
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("target", &self.target().name)
            .field("local_column", &self.local_column)
            .field("remote_column", &self.remote_column)
            .field("cardinality", &self.cardinality)
            .finish()
    }
}

/// Static metadata for one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// The entity name used in messages.
    pub name: &'static str,
    /// The database table.
    pub table: &'static str,
    columns: Vec<ColumnDef>,
    relationships: Vec<Relationship>,
}

impl EntityDescriptor {
    /// Starts building a descriptor.
    pub const fn builder(name: &'static str, table: &'static str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: Self {
                name,
                table,
                columns: Vec::new(),
                relationships: Vec::new(),
            },
        }
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// All relationships in declaration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Looks up a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Column names followed by relationship names.
    pub fn declared_fields(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|c| c.name)
            .chain(self.relationships.iter().map(|r| r.name))
            .collect()
    }

    /// Whether `name` is a declared column or relationship.
    pub fn is_declared(&self, name: &str) -> bool {
        self.has_column(name) || self.relationship(name).is_some()
    }

    /// Returns the single primary key column.
    ///
    /// # Errors
    ///
    /// [`RepoError::CompositeKeyUnsupported`] when several columns are marked
    /// as primary key, [`RepoError::ImproperlyConfigured`] when none is.
    pub fn primary_key(&self) -> RepoResult<&ColumnDef> {
        let mut keys = self.columns.iter().filter(|c| c.primary_key);
        match (keys.next(), keys.next()) {
            (Some(pk), None) => Ok(pk),
            (None, _) => Err(RepoError::ImproperlyConfigured(format!(
                "Entity '{}' declares no primary key",
                self.name
            ))),
            (Some(_), Some(_)) => Err(RepoError::CompositeKeyUnsupported {
                entity: self.name.to_string(),
                columns: self
                    .columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.name.to_string())
                    .collect(),
            }),
        }
    }

    /// Checks the descriptor is usable by a repository.
    pub fn validate(&self) -> RepoResult<()> {
        if self.table.is_empty() {
            return Err(RepoError::ImproperlyConfigured(format!(
                "Entity '{}' has no table",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(RepoError::ImproperlyConfigured(format!(
                "Entity '{}' declares no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in self.declared_fields() {
            if !seen.insert(field) {
                return Err(RepoError::ImproperlyConfigured(format!(
                    "Entity '{}' declares '{field}' more than once",
                    self.name
                )));
            }
        }

        self.primary_key()?;

        for rel in &self.relationships {
            if !self.has_column(rel.local_column) {
                return Err(RepoError::ImproperlyConfigured(format!(
                    "Relationship '{}.{}' joins on unknown column '{}'",
                    self.name, rel.name, rel.local_column
                )));
            }
            let target = rel.target();
            if !target.has_column(rel.remote_column) {
                return Err(RepoError::ImproperlyConfigured(format!(
                    "Relationship '{}.{}' joins on unknown column '{}.{}'",
                    self.name, rel.name, target.name, rel.remote_column
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.descriptor.columns.push(column);
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.descriptor.relationships.push(relationship);
        self
    }

    /// Finishes the descriptor. Call [`EntityDescriptor::validate`] to check it.
    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;

    static PARENT: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("parent", "parents")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("slug", ColumnType::Text).unique())
            .relationship(Relationship::one_to_many("children", || &*CHILD, "id", "parent_id"))
            .build()
    });

    static CHILD: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("child", "children")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("parent_id", ColumnType::Integer))
            .relationship(Relationship::many_to_one("parent", || &*PARENT, "parent_id", "id"))
            .build()
    });

    #[test]
    fn test_cyclic_descriptors_validate() {
        assert!(PARENT.validate().is_ok());
        assert!(CHILD.validate().is_ok());
        let rel = PARENT.relationship("children").unwrap();
        assert_eq!(rel.target().name, "child");
        assert!(rel.cardinality.is_collection());
    }

    #[test]
    fn test_declared_fields() {
        assert_eq!(PARENT.declared_fields(), vec!["id", "slug", "children"]);
        assert!(PARENT.is_declared("children"));
        assert!(!PARENT.is_declared("bogus"));
    }

    #[test]
    fn test_primary_key() {
        assert_eq!(PARENT.primary_key().unwrap().name, "id");
        assert!(PARENT.column("id").unwrap().is_unique());
        assert!(PARENT.column("slug").unwrap().is_unique());
    }

    #[test]
    fn test_composite_key_rejected() {
        let desc = EntityDescriptor::builder("membership", "memberships")
            .column(ColumnDef::new("user_id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("group_id", ColumnType::Integer).primary_key())
            .build();
        match desc.primary_key() {
            Err(RepoError::CompositeKeyUnsupported { entity, columns }) => {
                assert_eq!(entity, "membership");
                assert_eq!(columns, vec!["user_id", "group_id"]);
            }
            other => panic!("expected composite key error, got {other:?}"),
        }
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_missing_pk() {
        let desc = EntityDescriptor::builder("log", "logs")
            .column(ColumnDef::new("line", ColumnType::Text))
            .build();
        assert!(matches!(
            desc.validate(),
            Err(RepoError::ImproperlyConfigured(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_field() {
        let desc = EntityDescriptor::builder("dup", "dups")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("id", ColumnType::Integer))
            .build();
        let err = desc.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_bad_join_column() {
        let desc = EntityDescriptor::builder("orphan", "orphans")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .relationship(Relationship::many_to_one("parent", || &*PARENT, "parent_id", "id"))
            .build();
        let err = desc.validate().unwrap_err();
        assert!(err.to_string().contains("parent_id"));
    }

    #[test]
    fn test_validate_empty() {
        let desc = EntityDescriptor::builder("empty", "empties").build();
        assert!(desc.validate().is_err());
        let desc = EntityDescriptor::builder("tableless", "")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .build();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(ColumnType::Boolean.normalize(Value::Int(1)), Value::Bool(true));
        assert_eq!(ColumnType::Boolean.normalize(Value::Int(0)), Value::Bool(false));
        assert_eq!(ColumnType::Float.normalize(Value::Int(2)), Value::Float(2.0));
        assert_eq!(
            ColumnType::Date.normalize(Value::from("2024-01-15")),
            Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert_eq!(
            ColumnType::Date.normalize(Value::from("not a date")),
            Value::from("not a date")
        );
        assert_eq!(ColumnType::Text.normalize(Value::Null), Value::Null);
    }
}
