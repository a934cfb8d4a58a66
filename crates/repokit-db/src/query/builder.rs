//! The query builder: one query over a root entity, described as data.
//!
//! A [`QueryBuilder`] records filters, ordering, joins, eager-load paths,
//! projection and bounds, and compiles them into [`SelectStatement`]s,
//! count queries, and key-bounded updates and deletes. Every mutator takes
//! `&self` and returns a modified copy, so a partly built query can be
//! branched freely.
//!
//! Paths use `__` between segments: `subsections__status__code__in`. All
//! but the last segment name relationships; the last names a column, which
//! in a filter may be followed by one lookup token.

use std::sync::Arc;

use repokit_core::{Operation, RepoError, RepoResult};

use crate::descriptor::{ColumnDef, EntityDescriptor};
use crate::entity::Fields;
use crate::query::lookups::{LookupOp, LookupRegistry, LOOKUP_SEP};
use crate::query::path::{FilterClause, JoinTree, NodeId, OrderClause, ROOT};
use crate::query::statement::{
    Condition, DeleteStatement, ExecutionOptions, FromSource, JoinClause, LoadNode, LoadPlan,
    OrderTerm, SelectItem, SelectStatement, UpdateStatement,
};
use crate::value::Value;

/// What an update or delete hands back per affected row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Returning {
    /// Nothing; only the affected row count.
    #[default]
    None,
    /// The named root columns.
    Columns(Vec<&'static str>),
    /// Every root column, so rows can be built back into entities.
    Entity,
}

/// A copy-on-write description of a query over one root entity.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    descriptor: &'static EntityDescriptor,
    lookups: Arc<LookupRegistry>,
    joins: JoinTree,
    options: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    distinct: bool,
    projection: Vec<&'static str>,
    returning: Returning,
    execution_options: ExecutionOptions,
}

impl QueryBuilder {
    /// Creates an empty query over `descriptor` using the built-in lookups.
    pub fn new(descriptor: &'static EntityDescriptor) -> Self {
        Self {
            descriptor,
            lookups: LookupRegistry::shared(),
            joins: JoinTree::new(descriptor),
            options: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            projection: Vec::new(),
            returning: Returning::None,
            execution_options: ExecutionOptions::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// The root entity.
    pub const fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    /// The join tree built so far.
    pub const fn joins(&self) -> &JoinTree {
        &self.joins
    }

    /// Registered eager-load paths, in registration order.
    pub fn option_paths(&self) -> &[String] {
        &self.options
    }

    /// The row limit.
    pub const fn limit_value(&self) -> Option<i64> {
        self.limit
    }

    /// The number of rows skipped.
    pub const fn offset_value(&self) -> Option<i64> {
        self.offset
    }

    /// Whether the final select eliminates duplicates.
    pub const fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Columns selected by `values_list`; empty when selecting entities.
    pub fn projection(&self) -> &[&'static str] {
        &self.projection
    }

    /// The `RETURNING` configuration.
    pub const fn returning_spec(&self) -> &Returning {
        &self.returning
    }

    /// The execution options carried by compiled statements.
    pub const fn execution_options_map(&self) -> &ExecutionOptions {
        &self.execution_options
    }

    /// The lookup registry filters are resolved against.
    pub fn lookups(&self) -> &LookupRegistry {
        &self.lookups
    }

    // ── Mutators ────────────────────────────────────────────────────────

    /// Adds filters. A repeated column in the same scope replaces the
    /// earlier condition.
    pub fn filter<I, K, V>(&self, conditions: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut next = self.clone();
        for (key, value) in conditions {
            let path = key.as_ref();
            let value = value.into();
            let resolved =
                next.joins
                    .resolve_column(path, Operation::Filter, Some(&*self.lookups), false)?;
            let op = resolved.lookup.unwrap_or(LookupOp::Exact);
            op.validate(path, &value)?;
            next.joins.node_mut(resolved.node).set_filter(FilterClause {
                column: resolved.column.name,
                op,
                value,
            });
        }
        Ok(next)
    }

    /// Adds orderings. A leading `-` sorts descending; a leading `+` is
    /// ignored.
    pub fn order_by<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        for field in fields {
            let field = field.as_ref().trim_start_matches('+');
            let (descending, path) = match field.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, field),
            };
            let resolved = next
                .joins
                .resolve_column(path, Operation::OrderBy, None, false)?;
            next.joins.node_mut(resolved.node).set_order(OrderClause {
                column: resolved.column.name,
                descending,
            });
        }
        Ok(next)
    }

    /// Joins each relationship path, setting the join kind of its last node.
    pub fn join<I, S>(&self, fields: I, outer: bool) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        for field in fields {
            let id = next
                .joins
                .resolve_relation(field.as_ref(), Operation::Join, outer)?;
            next.joins.node_mut(id).outer = outer;
        }
        Ok(next)
    }

    /// Registers relationship paths to eager-load.
    pub fn options<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        for field in fields {
            let path = field.as_ref();
            next.joins.resolve_relation(path, Operation::Options, true)?;
            if !next.options.iter().any(|p| p == path) {
                next.options.push(path.to_string());
            }
        }
        Ok(next)
    }

    /// Configures `RETURNING` for updates and deletes: either named root
    /// columns or the whole entity, never both and never neither.
    pub fn returning<I, S>(&self, fields: I, return_entity: bool) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = self.root_columns(fields, Operation::Returning)?;
        let returning = match (columns.is_empty(), return_entity) {
            (false, true) => {
                return Err(RepoError::ConfigurationError(
                    "returning() takes either column names or return_entity, not both".into(),
                ))
            }
            (true, false) => {
                return Err(RepoError::ConfigurationError(
                    "returning() needs column names or return_entity".into(),
                ))
            }
            (true, true) => Returning::Entity,
            (false, false) => Returning::Columns(columns),
        };
        let mut next = self.clone();
        next.returning = returning;
        Ok(next)
    }

    /// Narrows the select to the named root columns. An empty list selects
    /// whole entities again.
    pub fn values_list<I, S>(&self, fields: I) -> RepoResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.projection = self.root_columns(fields, Operation::ValuesList)?;
        Ok(next)
    }

    /// Sets the row limit; must be at least 1.
    pub fn limit(&self, limit: i64) -> RepoResult<Self> {
        self.with_bounds(Some(limit), self.offset)
    }

    /// Sets the number of rows skipped; must not be negative.
    pub fn offset(&self, offset: i64) -> RepoResult<Self> {
        self.with_bounds(self.limit, Some(offset))
    }

    /// Replaces both bounds at once; `None` clears a bound.
    pub fn with_bounds(&self, limit: Option<i64>, offset: Option<i64>) -> RepoResult<Self> {
        if let Some(n) = limit.filter(|&n| n < 1) {
            return Err(RepoError::ConfigurationError(format!(
                "limit must be at least 1, got {n}"
            )));
        }
        if let Some(n) = offset.filter(|&n| n < 0) {
            return Err(RepoError::ConfigurationError(format!(
                "offset must not be negative, got {n}"
            )));
        }
        let mut next = self.clone();
        next.limit = limit;
        next.offset = offset;
        Ok(next)
    }

    /// Eliminates duplicate rows from the final select.
    pub fn distinct(&self) -> Self {
        let mut next = self.clone();
        next.distinct = true;
        next
    }

    /// Replaces the execution options.
    pub fn execution_options<I, K>(&self, options: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        next.execution_options = options.into_iter().map(|(k, v)| (k.into(), v)).collect();
        next
    }

    /// Resolves filter lookups against another registry.
    pub fn with_lookups(&self, lookups: Arc<LookupRegistry>) -> Self {
        let mut next = self.clone();
        next.lookups = lookups;
        next
    }

    fn root_columns<I, S>(&self, fields: I, operation: Operation) -> RepoResult<Vec<&'static str>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let descriptor = self.descriptor;
        fields
            .into_iter()
            .map(|field| {
                let name = field.as_ref();
                descriptor
                    .column(name)
                    .map(|c| c.name)
                    .ok_or_else(|| RepoError::field_resolution(operation, name, name))
            })
            .collect()
    }

    // ── Statements ──────────────────────────────────────────────────────

    /// Builds the select for this query.
    ///
    /// With eager-load paths and bounds together, the bounds are applied to
    /// a `DISTINCT` subquery over the root entity first, and the outer query
    /// joins the loaded relations onto that page. Otherwise the joins,
    /// filters, ordering and bounds apply directly.
    pub fn build_select(&self) -> RepoResult<SelectStatement> {
        if !self.options.is_empty() && !self.projection.is_empty() {
            return Err(RepoError::ConfigurationError(
                "options() and values_list() cannot be combined".into(),
            ));
        }

        let root_alias = self.joins.alias(ROOT);
        let paginated =
            !self.options.is_empty() && (self.limit.is_some() || self.offset.is_some());
        if paginated {
            return Ok(self.build_paginated_select(&root_alias));
        }

        let mut stmt = SelectStatement::from_table(self.descriptor.table, &root_alias);
        stmt.distinct = self.distinct;
        stmt.joins = self.join_clauses(&root_alias);
        stmt.conditions = self.conditions(&root_alias, true);
        stmt.order = self.order_terms(&root_alias);
        stmt.limit = self.limit;
        stmt.offset = self.offset;
        stmt.execution_options = self.execution_options.clone();

        if self.projection.is_empty() {
            let plan = self.load_plan(&root_alias);
            stmt.items = plan_items(&plan);
            stmt.load_plan = Some(plan);
        } else {
            stmt.items = self
                .projection
                .iter()
                .map(|&column| SelectItem::column(&root_alias, column, column))
                .collect();
        }
        Ok(stmt)
    }

    fn build_paginated_select(&self, root_alias: &str) -> SelectStatement {
        let page_alias = format!("{}_page", self.descriptor.table);

        let mut page = SelectStatement::from_table(self.descriptor.table, root_alias);
        page.distinct = true;
        page.items = self
            .descriptor
            .columns()
            .iter()
            .map(|c| SelectItem::column(root_alias, c.name, c.name))
            .collect();
        page.joins = self.join_clauses(root_alias);
        page.conditions = self.conditions(root_alias, true);
        page.order = self.order_terms(root_alias);
        page.limit = self.limit;
        page.offset = self.offset;

        let plan = self.load_plan(&page_alias);
        let mut stmt = SelectStatement::from_table(self.descriptor.table, &page_alias);
        stmt.from = FromSource::Subquery {
            query: Box::new(page),
            alias: page_alias.clone(),
        };
        stmt.distinct = self.distinct;
        stmt.items = plan_items(&plan);
        stmt.joins = self.join_clauses(&page_alias);
        stmt.conditions = self.conditions(&page_alias, false);
        stmt.order = self.order_terms(&page_alias);
        stmt.load_plan = Some(plan);
        stmt.execution_options = self.execution_options.clone();
        stmt
    }

    /// Builds `COUNT(DISTINCT pk)` over the root with joins and filters.
    pub fn build_count(&self) -> RepoResult<SelectStatement> {
        self.reject_options("count")?;
        let pk = self.descriptor.primary_key()?;
        let root_alias = self.joins.alias(ROOT);
        let mut stmt = SelectStatement::from_table(self.descriptor.table, &root_alias);
        stmt.items.push(SelectItem::CountDistinct {
            alias: root_alias.clone(),
            column: pk.name.to_string(),
            label: "count".to_string(),
        });
        stmt.joins = self.join_clauses(&root_alias);
        stmt.conditions = self.conditions(&root_alias, true);
        stmt.execution_options = self.execution_options.clone();
        Ok(stmt)
    }

    /// Builds an update of every row whose key the filters match.
    pub fn build_update(&self, values: &Fields) -> RepoResult<UpdateStatement> {
        self.reject_options("update")?;
        if values.is_empty() {
            return Err(RepoError::ConfigurationError(
                "update() requires at least one value".into(),
            ));
        }
        if let Some((name, _)) = values.iter().find(|(n, _)| !self.descriptor.has_column(n)) {
            return Err(RepoError::field_resolution(Operation::Update, name, name));
        }
        let pk = self.descriptor.primary_key()?;
        Ok(UpdateStatement {
            table: self.descriptor.table.to_string(),
            assignments: values.clone(),
            key_column: pk.name.to_string(),
            keys: self.key_select(pk),
            returning: self.returning_columns(),
            execution_options: self.execution_options.clone(),
        })
    }

    /// Builds a delete of every row whose key the filters match.
    pub fn build_delete(&self) -> RepoResult<DeleteStatement> {
        self.reject_options("delete")?;
        let pk = self.descriptor.primary_key()?;
        Ok(DeleteStatement {
            table: self.descriptor.table.to_string(),
            key_column: pk.name.to_string(),
            keys: self.key_select(pk),
            returning: self.returning_columns(),
            execution_options: self.execution_options.clone(),
        })
    }

    fn reject_options(&self, what: &str) -> RepoResult<()> {
        if self.options.is_empty() {
            Ok(())
        } else {
            Err(RepoError::ConfigurationError(format!(
                "Cannot {what} with eager-load options set; remove options({})",
                self.options.join(", ")
            )))
        }
    }

    /// `SELECT DISTINCT root.pk` with joins and filters applied.
    fn key_select(&self, pk: &ColumnDef) -> SelectStatement {
        let root_alias = self.joins.alias(ROOT);
        let mut keys = SelectStatement::from_table(self.descriptor.table, &root_alias);
        keys.distinct = true;
        keys.items.push(SelectItem::column(&root_alias, pk.name, pk.name));
        keys.joins = self.join_clauses(&root_alias);
        keys.conditions = self.conditions(&root_alias, true);
        keys
    }

    fn returning_columns(&self) -> Vec<String> {
        match &self.returning {
            Returning::None => Vec::new(),
            Returning::Columns(columns) => columns.iter().map(ToString::to_string).collect(),
            Returning::Entity => self
                .descriptor
                .columns()
                .iter()
                .map(|c| c.name.to_string())
                .collect(),
        }
    }

    // ── Join-tree rendering ─────────────────────────────────────────────

    fn node_alias(&self, id: NodeId, root_alias: &str) -> String {
        if id == ROOT {
            root_alias.to_string()
        } else {
            self.joins.alias(id)
        }
    }

    fn join_clauses(&self, root_alias: &str) -> Vec<JoinClause> {
        self.joins
            .walk()
            .into_iter()
            .filter_map(|id| {
                let node = self.joins.node(id);
                let relation = node.relation?;
                Some(JoinClause {
                    table: node.descriptor.table.to_string(),
                    alias: self.joins.alias(id),
                    outer: node.outer,
                    parent_alias: self.node_alias(node.parent.unwrap_or(ROOT), root_alias),
                    parent_column: relation.local_column.to_string(),
                    column: relation.remote_column.to_string(),
                })
            })
            .collect()
    }

    fn conditions(&self, root_alias: &str, include_root: bool) -> Vec<Condition> {
        let scopes = include_root
            .then_some(ROOT)
            .into_iter()
            .chain(self.joins.walk());
        scopes
            .flat_map(|id| {
                let alias = self.node_alias(id, root_alias);
                self.joins.node(id).filters.iter().map(move |f| Condition {
                    alias: alias.clone(),
                    column: f.column.to_string(),
                    op: f.op,
                    value: f.value.clone(),
                })
            })
            .collect()
    }

    fn order_terms(&self, root_alias: &str) -> Vec<OrderTerm> {
        std::iter::once(ROOT)
            .chain(self.joins.walk())
            .flat_map(|id| {
                let alias = self.node_alias(id, root_alias);
                self.joins.node(id).order.iter().map(move |o| OrderTerm {
                    alias: alias.clone(),
                    column: o.column.to_string(),
                    descending: o.descending,
                })
            })
            .collect()
    }

    /// Whether node `id` lies on some eager-load path.
    fn is_loaded(&self, id: NodeId) -> bool {
        let path = &self.joins.node(id).path;
        let prefix = format!("{path}{LOOKUP_SEP}");
        self.options
            .iter()
            .any(|option| option == path || option.starts_with(&prefix))
    }

    fn load_plan(&self, root_alias: &str) -> LoadPlan {
        LoadPlan {
            root: LoadNode {
                alias: root_alias.to_string(),
                descriptor: self.descriptor,
                relation: None,
                children: self.load_children(ROOT),
            },
        }
    }

    fn load_children(&self, parent: NodeId) -> Vec<LoadNode> {
        self.joins
            .node(parent)
            .children
            .iter()
            .copied()
            .filter(|&id| self.is_loaded(id))
            .map(|id| {
                let node = self.joins.node(id);
                LoadNode {
                    alias: self.joins.alias(id),
                    descriptor: node.descriptor,
                    relation: node.relation.map(|r| (r.name, r.cardinality)),
                    children: self.load_children(id),
                }
            })
            .collect()
    }
}

/// Every column of every loaded alias, labelled `"alias.column"`.
fn plan_items(plan: &LoadPlan) -> Vec<SelectItem> {
    plan.nodes()
        .into_iter()
        .flat_map(|node| {
            node.descriptor
                .columns()
                .iter()
                .map(move |c| SelectItem::column(&node.alias, c.name, node.label(c.name)))
        })
        .collect()
}
