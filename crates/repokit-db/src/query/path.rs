//! Join trees and dotted-path resolution.
//!
//! A [`JoinTree`] is an arena of [`JoinNode`]s. Node [`ROOT`] is the root
//! entity's own scope; every other node is one traversed relationship. A
//! relationship path always resolves to the same node, however many filter,
//! order, join, and option calls mention it, so each path gets exactly one
//! alias in the compiled statement.

use repokit_core::{Operation, RepoError, RepoResult};

use crate::descriptor::{ColumnDef, EntityDescriptor, Relationship};
use crate::query::lookups::{LookupOp, LookupRegistry, LOOKUP_SEP};
use crate::value::Value;

/// Index of a node in a [`JoinTree`].
pub type NodeId = usize;

/// The root scope.
pub const ROOT: NodeId = 0;

/// A filter stored on a scope, keyed by column.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Column name.
    pub column: &'static str,
    /// Operator.
    pub op: LookupOp,
    /// Operand.
    pub value: Value,
}

/// An ordering stored on a scope, keyed by column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    /// Column name.
    pub column: &'static str,
    /// Descending when set.
    pub descending: bool,
}

/// One scope of a query: the root entity or one traversed relationship.
#[derive(Debug, Clone)]
pub struct JoinNode {
    /// This node's index.
    pub id: NodeId,
    /// The parent scope; `None` at the root.
    pub parent: Option<NodeId>,
    /// The relationship traversed from the parent; `None` at the root.
    pub relation: Option<&'static Relationship>,
    /// The entity this scope ranges over.
    pub descriptor: &'static EntityDescriptor,
    /// Relationship names from the root joined by `__`; empty at the root.
    pub path: String,
    /// Filters, one per column, in first-insertion order.
    pub filters: Vec<FilterClause>,
    /// Orderings, one per column, in first-insertion order.
    pub order: Vec<OrderClause>,
    /// `LEFT OUTER JOIN` when set.
    pub outer: bool,
    /// Child scopes in creation order.
    pub children: Vec<NodeId>,
}

impl JoinNode {
    /// Stores a filter, replacing any earlier one on the same column.
    pub fn set_filter(&mut self, clause: FilterClause) {
        match self.filters.iter_mut().find(|f| f.column == clause.column) {
            Some(slot) => *slot = clause,
            None => self.filters.push(clause),
        }
    }

    /// Stores an ordering, replacing any earlier one on the same column.
    pub fn set_order(&mut self, clause: OrderClause) {
        match self.order.iter_mut().find(|o| o.column == clause.column) {
            Some(slot) => *slot = clause,
            None => self.order.push(clause),
        }
    }
}

/// A column reached by a dotted path.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedColumn {
    /// The scope owning the column.
    pub node: NodeId,
    /// The column.
    pub column: &'static ColumnDef,
    /// The lookup suffix, if the path carried one.
    pub lookup: Option<LookupOp>,
}

/// The arena of join nodes for one query.
#[derive(Debug, Clone)]
pub struct JoinTree {
    nodes: Vec<JoinNode>,
}

impl JoinTree {
    /// Creates a tree holding only the root scope.
    pub fn new(root: &'static EntityDescriptor) -> Self {
        Self {
            nodes: vec![JoinNode {
                id: ROOT,
                parent: None,
                relation: None,
                descriptor: root,
                path: String::new(),
                filters: Vec::new(),
                order: Vec::new(),
                outer: false,
                children: Vec::new(),
            }],
        }
    }

    /// The root scope.
    pub fn root(&self) -> &JoinNode {
        &self.nodes[ROOT]
    }

    /// A node by id.
    pub fn node(&self, id: NodeId) -> &JoinNode {
        &self.nodes[id]
    }

    /// A node by id, mutably.
    pub fn node_mut(&mut self, id: NodeId) -> &mut JoinNode {
        &mut self.nodes[id]
    }

    /// Number of relationship nodes (the root excluded).
    pub fn join_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Finds the node for a relationship path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.path == path).map(|n| n.id)
    }

    /// The SQL alias of a node.
    pub fn alias(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        if id == ROOT {
            node.descriptor.table.to_string()
        } else {
            format!("{}_{id}", node.descriptor.table)
        }
    }

    /// Relationship nodes in depth-first order, parents before children.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.nodes[ROOT].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.nodes[id].children.iter().rev().copied());
        }
        out
    }

    /// Returns the child of `parent` reached through `relation`, creating it
    /// with the given join kind if absent.
    pub fn fetch_or_create(
        &mut self,
        parent: NodeId,
        relation: &'static Relationship,
        outer: bool,
    ) -> NodeId {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].relation.is_some_and(|r| r.name == relation.name));
        if let Some(id) = existing {
            return id;
        }

        let id = self.nodes.len();
        let path = if parent == ROOT {
            relation.name.to_string()
        } else {
            format!("{}{LOOKUP_SEP}{}", self.nodes[parent].path, relation.name)
        };
        self.nodes.push(JoinNode {
            id,
            parent: Some(parent),
            relation: Some(relation),
            descriptor: relation.target(),
            path,
            filters: Vec::new(),
            order: Vec::new(),
            outer,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Resolves a path ending in a column, with an optional lookup suffix.
    ///
    /// Relationship segments are materialised as join nodes; newly created
    /// nodes get the join kind `outer`. A lookup suffix is accepted only
    /// when `lookups` is given.
    pub fn resolve_column(
        &mut self,
        path: &str,
        operation: Operation,
        lookups: Option<&LookupRegistry>,
        outer: bool,
    ) -> RepoResult<ResolvedColumn> {
        let segments: Vec<&str> = path.split(LOOKUP_SEP).collect();
        let mut node = ROOT;

        for (i, segment) in segments.iter().enumerate() {
            let descriptor = self.nodes[node].descriptor;
            let is_last = i + 1 == segments.len();

            if let Some(column) = descriptor.column(segment) {
                let rest = &segments[i + 1..];
                let lookup = match (rest, lookups) {
                    ([], _) => None,
                    ([token], Some(registry)) => Some(registry.get_lookup(token).ok_or_else(
                        || RepoError::field_resolution(operation, path, *token),
                    )?),
                    ([next, ..], _) => {
                        return Err(RepoError::field_resolution(operation, path, *next));
                    }
                };
                return Ok(ResolvedColumn {
                    node,
                    column,
                    lookup,
                });
            }

            match descriptor.relationship(segment) {
                Some(relation) if !is_last => {
                    node = self.fetch_or_create(node, relation, outer);
                }
                _ => return Err(RepoError::field_resolution(operation, path, *segment)),
            }
        }

        // Only reachable for an empty segment list, which `split` never yields.
        Err(RepoError::field_resolution(operation, path, path))
    }

    /// Resolves a path made only of relationships, returning its last node.
    pub fn resolve_relation(
        &mut self,
        path: &str,
        operation: Operation,
        outer: bool,
    ) -> RepoResult<NodeId> {
        let mut node = ROOT;
        for segment in path.split(LOOKUP_SEP) {
            let relation = self.nodes[node]
                .descriptor
                .relationship(segment)
                .ok_or_else(|| RepoError::field_resolution(operation, path, segment))?;
            node = self.fetch_or_create(node, relation, outer);
        }
        Ok(node)
    }
}
