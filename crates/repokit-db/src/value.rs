//! Backend-agnostic values.
//!
//! [`Value`] carries filter operands, statement parameters, and row cells.
//! [`ValueKey`] is its hashable projection, used wherever rows are keyed by
//! identity (`in_bulk`, join fan-out collapse).

use std::fmt;

use repokit_core::{RepoError, RepoResult};

/// A backend-agnostic representation of a database value.
///
/// # Examples
///
/// ```
/// use repokit_db::value::Value;
///
/// let v = Value::from(42_i64);
/// assert_eq!(v, Value::Int(42));
///
/// let v = Value::from("hello");
/// assert_eq!(v, Value::String("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(chrono::NaiveDate),
    /// A date and time without timezone.
    DateTime(chrono::NaiveDateTime),
    /// A date and time in UTC.
    DateTimeTz(chrono::DateTime<chrono::Utc>),
    /// A time without date.
    Time(chrono::NaiveTime),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON document.
    Json(serde_json::Value),
    /// A list of values, used as the operand of `in` and `range`.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::DateTimeTz(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<chrono::NaiveDate> for Value {
    fn from(v: chrono::NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<chrono::NaiveTime> for Value {
    fn from(v: chrono::NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl Value {
    /// Builds a [`Value::List`] from anything convertible into values.
    ///
    /// ```
    /// use repokit_db::value::Value;
    ///
    /// assert_eq!(
    ///     Value::list([1, 2]),
    ///     Value::List(vec![Value::Int(1), Value::Int(2)])
    /// );
    /// ```
    pub fn list<T: Into<Self>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if this value is `Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attempts to extract a boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Attempts to extract an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Attempts to extract the items of a list.
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// A hashable, totally ordered projection of a non-null [`Value`].
///
/// Floats, JSON documents, lists and NULL have no stable identity and are
/// rejected by the `TryFrom` conversion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    /// A boolean key.
    Bool(bool),
    /// An integer key.
    Int(i64),
    /// A string key.
    String(String),
    /// A binary key.
    Bytes(Vec<u8>),
    /// A date key.
    Date(chrono::NaiveDate),
    /// A naive date-time key.
    DateTime(chrono::NaiveDateTime),
    /// A UTC date-time key.
    DateTimeTz(chrono::DateTime<chrono::Utc>),
    /// A time key.
    Time(chrono::NaiveTime),
    /// A UUID key.
    Uuid(uuid::Uuid),
}

impl TryFrom<&Value> for ValueKey {
    type Error = RepoError;

    fn try_from(value: &Value) -> RepoResult<Self> {
        Ok(match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::String(s) => Self::String(s.clone()),
            Value::Bytes(b) => Self::Bytes(b.clone()),
            Value::Date(d) => Self::Date(*d),
            Value::DateTime(dt) => Self::DateTime(*dt),
            Value::DateTimeTz(dt) => Self::DateTimeTz(*dt),
            Value::Time(t) => Self::Time(*t),
            Value::Uuid(u) => Self::Uuid(*u),
            Value::Null | Value::Float(_) | Value::Json(_) | Value::List(_) => {
                return Err(RepoError::ConfigurationError(format!(
                    "Value {value:?} cannot be used as an identity key"
                )));
            }
        })
    }
}

impl From<ValueKey> for Value {
    fn from(key: ValueKey) -> Self {
        match key {
            ValueKey::Bool(b) => Self::Bool(b),
            ValueKey::Int(i) => Self::Int(i),
            ValueKey::String(s) => Self::String(s),
            ValueKey::Bytes(b) => Self::Bytes(b),
            ValueKey::Date(d) => Self::Date(d),
            ValueKey::DateTime(dt) => Self::DateTime(dt),
            ValueKey::DateTimeTz(dt) => Self::DateTimeTz(dt),
            ValueKey::Time(t) => Self::Time(t),
            ValueKey::Uuid(u) => Self::Uuid(u),
        }
    }
}

impl From<i64> for ValueKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ValueKey {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<uuid::Uuid> for ValueKey {
    fn from(v: uuid::Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self.clone()))
    }
}
