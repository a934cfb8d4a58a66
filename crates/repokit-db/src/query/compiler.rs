//! Renders [`Statement`]s to parameterised SQL.
//!
//! Every identifier is double-quoted. Parameters are collected into one
//! vector in the order their placeholders appear in the text, so nested
//! subqueries bind correctly with both `?` and `$n` placeholders.

use crate::query::lookups::LookupOp;
use crate::query::statement::{
    Condition, DeleteStatement, FromSource, InsertStatement, SelectItem, SelectStatement,
    Statement, UpdateStatement,
};
use crate::value::Value;

/// The SQL dialect a compiler targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `SQLite` (`?` placeholders).
    SQLite,
    /// PostgreSQL (`$1, $2, ...` placeholders).
    PostgreSQL,
}

/// Translates statements into SQL text plus bound parameters.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    dialect: Dialect,
}

impl SqlCompiler {
    /// Creates a compiler for the given dialect.
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The target dialect.
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Returns a parameter placeholder for the given 1-based index.
    fn placeholder(&self, index: usize) -> String {
        match self.dialect {
            Dialect::PostgreSQL => format!("${index}"),
            Dialect::SQLite => "?".to_string(),
        }
    }

    fn bind(&self, value: Value, params: &mut Vec<Value>) -> String {
        params.push(value);
        self.placeholder(params.len())
    }

    /// Compiles any statement.
    pub fn compile(&self, statement: &Statement) -> (String, Vec<Value>) {
        match statement {
            Statement::Select(s) => self.compile_select(s),
            Statement::Update(s) => self.compile_update(s),
            Statement::Delete(s) => self.compile_delete(s),
            Statement::Insert(s) => self.compile_insert(s),
        }
    }

    /// Compiles a select.
    pub fn compile_select(&self, stmt: &SelectStatement) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write_select(stmt, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles an update.
    pub fn compile_update(&self, stmt: &UpdateStatement) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("UPDATE \"{}\" SET ", stmt.table);
        let sets: Vec<String> = stmt
            .assignments
            .iter()
            .map(|(column, value)| {
                let ph = self.bind(value.clone(), &mut params);
                format!("\"{column}\" = {ph}")
            })
            .collect();
        sql.push_str(&sets.join(", "));
        sql.push_str(&format!(" WHERE \"{}\" IN (", stmt.key_column));
        self.write_select(&stmt.keys, &mut sql, &mut params);
        sql.push(')');
        Self::write_returning(&stmt.returning, &mut sql);
        (sql, params)
    }

    /// Compiles a delete.
    pub fn compile_delete(&self, stmt: &DeleteStatement) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!(
            "DELETE FROM \"{}\" WHERE \"{}\" IN (",
            stmt.table, stmt.key_column
        );
        self.write_select(&stmt.keys, &mut sql, &mut params);
        sql.push(')');
        Self::write_returning(&stmt.returning, &mut sql);
        (sql, params)
    }

    /// Compiles an insert.
    pub fn compile_insert(&self, stmt: &InsertStatement) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("INSERT INTO \"{}\"", stmt.table);
        if stmt.values.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let columns: Vec<String> = stmt
                .values
                .iter()
                .map(|(c, _)| format!("\"{c}\""))
                .collect();
            let placeholders: Vec<String> = stmt
                .values
                .iter()
                .map(|(_, v)| self.bind(v.clone(), &mut params))
                .collect();
            sql.push_str(&format!(
                " ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ));
        }
        Self::write_returning(&stmt.returning, &mut sql);
        (sql, params)
    }

    fn write_returning(columns: &[String], sql: &mut String) {
        if !columns.is_empty() {
            let cols: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
            sql.push_str(&format!(" RETURNING {}", cols.join(", ")));
        }
    }

    fn write_select(&self, stmt: &SelectStatement, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str("SELECT ");
        if stmt.distinct {
            sql.push_str("DISTINCT ");
        }

        let items: Vec<String> = stmt
            .items
            .iter()
            .map(|item| match item {
                SelectItem::Column {
                    alias,
                    column,
                    label,
                } => format!("\"{alias}\".\"{column}\" AS \"{label}\""),
                SelectItem::CountDistinct {
                    alias,
                    column,
                    label,
                } => format!("COUNT(DISTINCT \"{alias}\".\"{column}\") AS \"{label}\""),
            })
            .collect();
        if items.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&items.join(", "));
        }

        sql.push_str(" FROM ");
        match &stmt.from {
            FromSource::Table { table, alias } => {
                sql.push_str(&format!("\"{table}\" AS \"{alias}\""));
            }
            FromSource::Subquery { query, alias } => {
                sql.push('(');
                self.write_select(query, sql, params);
                sql.push_str(&format!(") AS \"{alias}\""));
            }
        }

        for join in &stmt.joins {
            let kind = if join.outer {
                "LEFT OUTER JOIN"
            } else {
                "INNER JOIN"
            };
            sql.push_str(&format!(
                " {kind} \"{}\" AS \"{}\" ON \"{}\".\"{}\" = \"{}\".\"{}\"",
                join.table,
                join.alias,
                join.parent_alias,
                join.parent_column,
                join.alias,
                join.column
            ));
        }

        if !stmt.conditions.is_empty() {
            let parts: Vec<String> = stmt
                .conditions
                .iter()
                .map(|cond| self.compile_condition(cond, params))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }

        if !stmt.order.is_empty() {
            let terms: Vec<String> = stmt
                .order
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("\"{}\".\"{}\" {dir}", o.alias, o.column)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (stmt.limit, stmt.offset, self.dialect) {
            (Some(limit), _, _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(_), Dialect::SQLite) => sql.push_str(" LIMIT -1"),
            _ => {}
        }
        if let Some(offset) = stmt.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    fn case_insensitive(&self, column: &str, ph: &str) -> String {
        match self.dialect {
            Dialect::PostgreSQL => format!("{column} ILIKE {ph} ESCAPE '\\'"),
            Dialect::SQLite => format!("LOWER({column}) LIKE LOWER({ph}) ESCAPE '\\'"),
        }
    }

    fn compile_condition(&self, cond: &Condition, params: &mut Vec<Value>) -> String {
        let column = format!("\"{}\".\"{}\"", cond.alias, cond.column);

        match cond.op {
            LookupOp::Exact if cond.value.is_null() => format!("{column} IS NULL"),
            LookupOp::Ne if cond.value.is_null() => format!("{column} IS NOT NULL"),
            LookupOp::Exact => format!("{column} = {}", self.bind(cond.value.clone(), params)),
            LookupOp::Ne => format!("{column} <> {}", self.bind(cond.value.clone(), params)),
            LookupOp::IExact => {
                let ph = self.bind(cond.value.clone(), params);
                format!("LOWER({column}) = LOWER({ph})")
            }
            LookupOp::Gt => format!("{column} > {}", self.bind(cond.value.clone(), params)),
            LookupOp::Gte => format!("{column} >= {}", self.bind(cond.value.clone(), params)),
            LookupOp::Lt => format!("{column} < {}", self.bind(cond.value.clone(), params)),
            LookupOp::Lte => format!("{column} <= {}", self.bind(cond.value.clone(), params)),
            LookupOp::Contains | LookupOp::StartsWith | LookupOp::EndsWith => {
                let ph = self.bind(like_pattern(cond.op, &cond.value), params);
                format!("{column} LIKE {ph} ESCAPE '\\'")
            }
            LookupOp::IContains | LookupOp::IStartsWith | LookupOp::IEndsWith => {
                let ph = self.bind(like_pattern(cond.op, &cond.value), params);
                self.case_insensitive(&column, &ph)
            }
            LookupOp::In => {
                let items = cond.value.as_list().unwrap_or_default();
                if items.is_empty() {
                    return "1 = 0".to_string();
                }
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|v| self.bind(v.clone(), params))
                    .collect();
                format!("{column} IN ({})", placeholders.join(", "))
            }
            LookupOp::Range => {
                let items = cond.value.as_list().unwrap_or_default();
                let low = items.first().cloned().unwrap_or(Value::Null);
                let high = items.get(1).cloned().unwrap_or(Value::Null);
                let ph_low = self.bind(low, params);
                let ph_high = self.bind(high, params);
                format!("{column} BETWEEN {ph_low} AND {ph_high}")
            }
            LookupOp::IsNull => {
                if cond.value.as_bool().unwrap_or(true) {
                    format!("{column} IS NULL")
                } else {
                    format!("{column} IS NOT NULL")
                }
            }
        }
    }
}

/// Builds the `LIKE` pattern for a pattern lookup.
///
/// Backslash, `%` and `_` in the value are escaped so they match literally.
fn like_pattern(op: LookupOp, value: &Value) -> Value {
    let text = value.as_str().unwrap_or_default();
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    let pattern = match op {
        LookupOp::StartsWith | LookupOp::IStartsWith => format!("{escaped}%"),
        LookupOp::EndsWith | LookupOp::IEndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    };
    Value::String(pattern)
}
