//! Compiled statement values.
//!
//! The query builder produces these; the [`SqlCompiler`](super::compiler::SqlCompiler)
//! renders them to SQL text and parameters; sessions execute them. A select
//! that loads entities carries a [`LoadPlan`] describing how its labelled
//! columns map back onto nested records.

use std::collections::BTreeMap;

use crate::descriptor::{Cardinality, EntityDescriptor};
use crate::entity::Fields;
use crate::query::lookups::LookupOp;
use crate::value::Value;

/// Per-statement options handed through to the session.
pub type ExecutionOptions = BTreeMap<String, Value>;

/// Any statement a session can execute.
#[derive(Debug, Clone)]
pub enum Statement {
    /// A read.
    Select(SelectStatement),
    /// A key-bounded update.
    Update(UpdateStatement),
    /// A key-bounded delete.
    Delete(DeleteStatement),
    /// A single-row insert.
    Insert(InsertStatement),
}

impl Statement {
    /// The execution options attached to this statement.
    pub fn execution_options(&self) -> &ExecutionOptions {
        static EMPTY: ExecutionOptions = BTreeMap::new();
        match self {
            Self::Select(s) => &s.execution_options,
            Self::Update(s) => &s.execution_options,
            Self::Delete(s) => &s.execution_options,
            Self::Insert(_) => &EMPTY,
        }
    }

    /// The kind of statement, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Insert(_) => "insert",
        }
    }
}

/// One projected expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// `"alias"."column" AS "label"`
    Column {
        /// Source alias.
        alias: String,
        /// Column name.
        column: String,
        /// Output label.
        label: String,
    },
    /// `COUNT(DISTINCT "alias"."column") AS "label"`
    CountDistinct {
        /// Source alias.
        alias: String,
        /// Column name.
        column: String,
        /// Output label.
        label: String,
    },
}

impl SelectItem {
    /// A column projected under `label`.
    pub fn column(
        alias: impl Into<String>,
        column: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self::Column {
            alias: alias.into(),
            column: column.into(),
            label: label.into(),
        }
    }
}

/// The `FROM` source of a select.
#[derive(Debug, Clone)]
pub enum FromSource {
    /// `"table" AS "alias"`
    Table {
        /// Table name.
        table: String,
        /// Alias.
        alias: String,
    },
    /// `(SELECT ...) AS "alias"`
    Subquery {
        /// The inner select.
        query: Box<SelectStatement>,
        /// Alias.
        alias: String,
    },
}

impl FromSource {
    /// The alias the rest of the statement refers to.
    pub fn alias(&self) -> &str {
        match self {
            Self::Table { alias, .. } | Self::Subquery { alias, .. } => alias,
        }
    }
}

/// One joined relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    /// The joined table.
    pub table: String,
    /// Its alias.
    pub alias: String,
    /// `LEFT OUTER JOIN` when set, `INNER JOIN` otherwise.
    pub outer: bool,
    /// The alias on the near side of the condition.
    pub parent_alias: String,
    /// The near-side column.
    pub parent_column: String,
    /// The far-side column, on `alias`.
    pub column: String,
}

/// One `WHERE` predicate. Predicates are AND-combined.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Source alias.
    pub alias: String,
    /// Column name.
    pub column: String,
    /// Comparison operator.
    pub op: LookupOp,
    /// Operand.
    pub value: Value,
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    /// Source alias.
    pub alias: String,
    /// Column name.
    pub column: String,
    /// Descending when set.
    pub descending: bool,
}

/// A select.
#[derive(Debug, Clone)]
pub struct SelectStatement {
    /// `SELECT DISTINCT` when set.
    pub distinct: bool,
    /// Projected expressions.
    pub items: Vec<SelectItem>,
    /// The `FROM` source.
    pub from: FromSource,
    /// Joins in application order.
    pub joins: Vec<JoinClause>,
    /// AND-combined predicates.
    pub conditions: Vec<Condition>,
    /// Ordering terms.
    pub order: Vec<OrderTerm>,
    /// Row limit.
    pub limit: Option<i64>,
    /// Rows skipped.
    pub offset: Option<i64>,
    /// How labelled columns map to records; `None` for projections and counts.
    pub load_plan: Option<LoadPlan>,
    /// Options handed to the session.
    pub execution_options: ExecutionOptions,
}

impl SelectStatement {
    /// A bare select over one table.
    pub fn from_table(table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            distinct: false,
            items: Vec::new(),
            from: FromSource::Table {
                table: table.into(),
                alias: alias.into(),
            },
            joins: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            load_plan: None,
            execution_options: ExecutionOptions::new(),
        }
    }

    /// `SELECT <columns> FROM <table> WHERE <pk> = ?`, with plain column labels.
    pub fn by_primary_key(descriptor: &EntityDescriptor, pk_column: &str, pk: Value) -> Self {
        let alias = descriptor.table;
        let mut stmt = Self::from_table(descriptor.table, alias);
        stmt.items = descriptor
            .columns()
            .iter()
            .map(|c| SelectItem::column(alias, c.name, c.name))
            .collect();
        stmt.conditions.push(Condition {
            alias: alias.to_string(),
            column: pk_column.to_string(),
            op: LookupOp::Exact,
            value: pk,
        });
        stmt
    }
}

/// `UPDATE <table> SET ... WHERE <key> IN (<keys>) [RETURNING ...]`
#[derive(Debug, Clone)]
pub struct UpdateStatement {
    /// The updated table.
    pub table: String,
    /// `SET` assignments.
    pub assignments: Fields,
    /// The key column matched against `keys`.
    pub key_column: String,
    /// A select producing the matching keys.
    pub keys: SelectStatement,
    /// Columns returned per affected row.
    pub returning: Vec<String>,
    /// Options handed to the session.
    pub execution_options: ExecutionOptions,
}

/// `DELETE FROM <table> WHERE <key> IN (<keys>) [RETURNING ...]`
#[derive(Debug, Clone)]
pub struct DeleteStatement {
    /// The table rows are deleted from.
    pub table: String,
    /// The key column matched against `keys`.
    pub key_column: String,
    /// A select producing the matching keys.
    pub keys: SelectStatement,
    /// Columns returned per deleted row.
    pub returning: Vec<String>,
    /// Options handed to the session.
    pub execution_options: ExecutionOptions,
}

/// `INSERT INTO <table> (...) VALUES (...) RETURNING ...`
#[derive(Debug, Clone)]
pub struct InsertStatement {
    /// The target table.
    pub table: String,
    /// Column values; may be empty for `DEFAULT VALUES`.
    pub values: Fields,
    /// Columns returned for the inserted row.
    pub returning: Vec<String>,
}

/// How one alias of a select maps onto a record tree node.
#[derive(Debug, Clone)]
pub struct LoadNode {
    /// The alias whose `"alias.column"` labels hold this node's columns.
    pub alias: String,
    /// The entity loaded at this node.
    pub descriptor: &'static EntityDescriptor,
    /// The relation name and cardinality from the parent; `None` at the root.
    pub relation: Option<(&'static str, Cardinality)>,
    /// Nested loads.
    pub children: Vec<LoadNode>,
}

impl LoadNode {
    /// Label under which `column` of this node is projected.
    pub fn label(&self, column: &str) -> String {
        format!("{}.{column}", self.alias)
    }
}

/// The root of a select's record mapping.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    /// The root entity node.
    pub root: LoadNode,
}

impl LoadPlan {
    /// Every node in depth-first order, root first.
    pub fn nodes(&self) -> Vec<&LoadNode> {
        fn walk<'a>(node: &'a LoadNode, out: &mut Vec<&'a LoadNode>) {
            out.push(node);
            for child in &node.children {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}
