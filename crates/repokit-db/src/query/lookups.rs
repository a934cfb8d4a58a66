//! Lookup suffixes and the comparison operators they select.
//!
//! A filter path may end in a lookup token after the column, separated by
//! [`LOOKUP_SEP`]: `title__icontains`, `position__gte`, `status__code__in`.
//! Without a token the comparison is [`LookupOp::Exact`].
//!
//! # Examples
//!
//! ```
//! use repokit_db::query::lookups::{LookupOp, LookupRegistry};
//!
//! let mut registry = LookupRegistry::with_defaults();
//! assert_eq!(registry.get_lookup("gte"), Some(LookupOp::Gte));
//!
//! registry.register_lookup("like", LookupOp::Contains);
//! assert_eq!(registry.get_lookup("like"), Some(LookupOp::Contains));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use repokit_core::{RepoError, RepoResult};

use crate::value::Value;

/// Separator between path segments and before a lookup token.
pub const LOOKUP_SEP: &str = "__";

/// A comparison operator applied to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupOp {
    /// `column = value`, or `IS NULL` for a null operand.
    Exact,
    /// Case-insensitive equality.
    IExact,
    /// `column <> value`, or `IS NOT NULL` for a null operand.
    Ne,
    /// Substring match.
    Contains,
    /// Case-insensitive substring match.
    IContains,
    /// Membership in a list.
    In,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Prefix match.
    StartsWith,
    /// Case-insensitive prefix match.
    IStartsWith,
    /// Suffix match.
    EndsWith,
    /// Case-insensitive suffix match.
    IEndsWith,
    /// `column BETWEEN low AND high`.
    Range,
    /// `IS NULL` when the operand is true, `IS NOT NULL` when false.
    IsNull,
}

impl LookupOp {
    /// Every built-in operator.
    pub const ALL: [Self; 16] = [
        Self::Exact,
        Self::IExact,
        Self::Ne,
        Self::Contains,
        Self::IContains,
        Self::In,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::Range,
        Self::IsNull,
    ];

    /// The canonical suffix token.
    pub const fn token(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Ne => "ne",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Range => "range",
            Self::IsNull => "isnull",
        }
    }

    /// Checks the operand has the shape this operator needs.
    pub fn validate(self, column: &str, value: &Value) -> RepoResult<()> {
        let ok = match self {
            Self::In => matches!(value, Value::List(_)),
            Self::Range => matches!(value, Value::List(items) if items.len() == 2),
            Self::IsNull => matches!(value, Value::Bool(_)),
            Self::IExact
            | Self::Contains
            | Self::IContains
            | Self::StartsWith
            | Self::IStartsWith
            | Self::EndsWith
            | Self::IEndsWith => matches!(value, Value::String(_)),
            Self::Exact | Self::Ne | Self::Gt | Self::Gte | Self::Lt | Self::Lte => {
                !matches!(value, Value::List(_))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(RepoError::ConfigurationError(format!(
                "Lookup '{}' on '{column}' cannot take {value:?}",
                self.token()
            )))
        }
    }
}

impl fmt::Display for LookupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Maps lookup tokens to operators.
#[derive(Debug, Clone)]
pub struct LookupRegistry {
    lookups: HashMap<String, LookupOp>,
}

static DEFAULT_LOOKUPS: LazyLock<Arc<LookupRegistry>> =
    LazyLock::new(|| Arc::new(LookupRegistry::with_defaults()));

impl Default for LookupRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LookupRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            lookups: HashMap::new(),
        }
    }

    /// Creates a registry holding every built-in token.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for op in LookupOp::ALL {
            registry.register_lookup(op.token(), op);
        }
        registry
    }

    /// The shared built-in registry.
    pub fn shared() -> Arc<Self> {
        Arc::clone(&DEFAULT_LOOKUPS)
    }

    /// Registers `name` as a token for `op`, replacing any previous binding.
    pub fn register_lookup(&mut self, name: impl Into<String>, op: LookupOp) {
        self.lookups.insert(name.into(), op);
    }

    /// Removes a token.
    pub fn unregister_lookup(&mut self, name: &str) -> Option<LookupOp> {
        self.lookups.remove(name)
    }

    /// Resolves a token.
    pub fn get_lookup(&self, name: &str) -> Option<LookupOp> {
        self.lookups.get(name).copied()
    }

    /// Whether a token is registered.
    pub fn has_lookup(&self, name: &str) -> bool {
        self.lookups.contains_key(name)
    }

    /// All registered tokens, sorted.
    pub fn lookup_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.lookups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_token() {
        let registry = LookupRegistry::with_defaults();
        for op in LookupOp::ALL {
            assert_eq!(registry.get_lookup(op.token()), Some(op));
        }
        assert_eq!(registry.lookup_names().len(), LookupOp::ALL.len());
        assert!(!registry.has_lookup("regex"));
    }

    #[test]
    fn test_register_alias() {
        let mut registry = LookupRegistry::new();
        registry.register_lookup("neq", LookupOp::Ne);
        assert_eq!(registry.get_lookup("neq"), Some(LookupOp::Ne));
        assert_eq!(registry.unregister_lookup("neq"), Some(LookupOp::Ne));
        assert!(!registry.has_lookup("neq"));
    }

    #[test]
    fn test_shared_is_defaults() {
        let shared = LookupRegistry::shared();
        assert_eq!(shared.get_lookup("icontains"), Some(LookupOp::IContains));
    }

    #[test]
    fn test_validate_shapes() {
        assert!(LookupOp::In.validate("id", &Value::list([1, 2])).is_ok());
        assert!(LookupOp::In.validate("id", &Value::Int(1)).is_err());
        assert!(LookupOp::Range.validate("n", &Value::list([1, 5])).is_ok());
        assert!(LookupOp::Range.validate("n", &Value::list([1])).is_err());
        assert!(LookupOp::IsNull.validate("n", &Value::Bool(true)).is_ok());
        assert!(LookupOp::IsNull.validate("n", &Value::Int(1)).is_err());
        assert!(LookupOp::Contains.validate("t", &Value::from("x")).is_ok());
        assert!(LookupOp::Contains.validate("t", &Value::Int(1)).is_err());
        assert!(LookupOp::Exact.validate("t", &Value::Null).is_ok());
        assert!(LookupOp::Gt.validate("t", &Value::list([1])).is_err());
    }

    #[test]
    fn test_validate_error_message() {
        let err = LookupOp::In.validate("code", &Value::from("a")).unwrap_err();
        assert!(err.to_string().contains("Lookup 'in' on 'code'"));
    }
}
