//! Result rows and hydrated records.
//!
//! A [`Row`] is one flat result row as the driver returned it. A [`Record`]
//! is one entity's worth of column values plus whatever relations were
//! eager-loaded alongside it; entities are built from records.

use repokit_core::{RepoError, RepoResult};

use crate::descriptor::EntityDescriptor;
use crate::entity::Entity;
use crate::value::Value;

/// A single flat result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Creates a row from `(column, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let (columns, values) = pairs.into_iter().unzip();
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values in column order.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> RepoResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            RepoError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> RepoResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            RepoError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }
}

/// Conversion from a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> RepoResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> RepoError {
    RepoError::DatabaseError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> RepoResult<Self> {
        value.as_int().ok_or_else(|| mismatch("Int", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> RepoResult<Self> {
        let i = i64::from_value(value)?;
        Self::try_from(i)
            .map_err(|e| RepoError::DatabaseError(format!("Int value out of i32 range: {e}")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> RepoResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            _ => Err(mismatch("Bytes", value)),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => s
                .parse()
                .map_err(|e| RepoError::DatabaseError(format!("Invalid UUID '{s}': {e}"))),
            _ => Err(mismatch("Uuid", value)),
        }
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            _ => Err(mismatch("Date", value)),
        }
    }
}

impl FromValue for chrono::NaiveDateTime {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            _ => Err(mismatch("DateTime", value)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            _ => Err(mismatch("DateTimeTz", value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Json(j) => Ok(j.clone()),
            _ => Err(mismatch("Json", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> RepoResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> RepoResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// Relations loaded alongside a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// A to-one relation; `None` when the foreign key matched nothing.
    One(Option<Box<Record>>),
    /// A to-many relation.
    Many(Vec<Record>),
}

/// One hydrated entity: its columns plus any eager-loaded relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    row: Row,
    related: Vec<(&'static str, Related)>,
}

impl Record {
    /// Wraps a row of plain column values.
    pub const fn new(row: Row) -> Self {
        Self {
            row,
            related: Vec::new(),
        }
    }

    /// Builds a record from a row whose labels are plain column names,
    /// normalising each value by the column's declared type.
    ///
    /// Columns the row does not carry are left out.
    pub fn from_row(descriptor: &EntityDescriptor, row: &Row) -> Self {
        let pairs = descriptor.columns().iter().filter_map(|col| {
            row.get_value(col.name)
                .map(|v| (col.name.to_string(), col.column_type.normalize(v.clone())))
        });
        Self::new(Row::from_pairs(pairs))
    }

    /// The record's column values.
    pub const fn row(&self) -> &Row {
        &self.row
    }

    /// Gets a typed column value.
    pub fn get<T: FromValue>(&self, column: &str) -> RepoResult<T> {
        self.row.get(column)
    }

    /// Returns a raw column value.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.row.get_value(column)
    }

    /// Attaches a loaded relation, replacing any previous one of that name.
    pub fn set_related(&mut self, name: &'static str, related: Related) {
        match self.related.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = related,
            None => self.related.push((name, related)),
        }
    }

    /// Returns a loaded relation.
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.related
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, r)| r)
    }

    pub(crate) fn related_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.related
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, r)| r)
    }

    /// Whether the relation was eager-loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.related(name).is_some()
    }

    /// Builds the to-one relation `name` as `E`.
    ///
    /// Returns `Ok(None)` when the relation was not loaded and
    /// `Ok(Some(None))` when it was loaded but empty.
    pub fn load_one<E: Entity>(&self, name: &str) -> RepoResult<Option<Option<E>>> {
        match self.related(name) {
            None => Ok(None),
            Some(Related::One(None)) => Ok(Some(None)),
            Some(Related::One(Some(record))) => E::from_record(record).map(|e| Some(Some(e))),
            Some(Related::Many(_)) => Err(RepoError::DatabaseError(format!(
                "Relation '{name}' holds a collection, not a single record"
            ))),
        }
    }

    /// Builds the to-many relation `name` as a list of `E`.
    ///
    /// Returns `Ok(None)` when the relation was not loaded.
    pub fn load_many<E: Entity>(&self, name: &str) -> RepoResult<Option<Vec<E>>> {
        match self.related(name) {
            None => Ok(None),
            Some(Related::Many(records)) => records
                .iter()
                .map(E::from_record)
                .collect::<RepoResult<Vec<_>>>()
                .map(Some),
            Some(Related::One(_)) => Err(RepoError::DatabaseError(format!(
                "Relation '{name}' holds a single record, not a collection"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ColumnDef, ColumnType};

    fn sample_row() -> Row {
        Row::new(
            vec!["id".into(), "title".into(), "active".into()],
            vec![Value::Int(1), Value::from("Intro"), Value::Int(1)],
        )
    }

    #[test]
    fn test_row_get() {
        let row = sample_row();
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("title").unwrap(), "Intro");
        assert!(row.get::<bool>("active").unwrap());
        assert!(row.get::<i64>("missing").is_err());
        assert!(row.get::<String>("id").is_err());
    }

    #[test]
    fn test_row_get_by_index() {
        let row = sample_row();
        assert_eq!(row.get_by_index::<String>(1).unwrap(), "Intro");
        assert!(row.get_by_index::<i64>(5).is_err());
    }

    #[test]
    fn test_row_from_pairs() {
        let row = Row::from_pairs(vec![("a".to_string(), Value::Int(1))]);
        assert_eq!(row.len(), 1);
        assert_eq!(row.columns(), ["a".to_string()]);
        assert!(!row.is_empty());
    }

    #[test]
    fn test_option_from_value() {
        assert_eq!(Option::<i64>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i64>::from_value(&Value::Int(2)).unwrap(), Some(2));
    }

    #[test]
    fn test_uuid_from_string() {
        let u = uuid::Uuid::new_v4();
        assert_eq!(uuid::Uuid::from_value(&Value::String(u.to_string())).unwrap(), u);
    }

    #[test]
    fn test_record_from_row_normalizes() {
        let desc = EntityDescriptor::builder("flag", "flags")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("active", ColumnType::Boolean))
            .build();
        let record = Record::from_row(&desc, &sample_row());
        assert_eq!(record.value("active"), Some(&Value::Bool(true)));
        assert_eq!(record.value("title"), None);
        assert_eq!(record.row().len(), 2);
    }

    #[test]
    fn test_record_related_replace() {
        let mut record = Record::new(sample_row());
        assert!(!record.is_loaded("children"));
        record.set_related("children", Related::Many(vec![]));
        record.set_related("children", Related::One(None));
        assert!(matches!(record.related("children"), Some(Related::One(None))));
    }
}
