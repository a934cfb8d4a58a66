//! Turns flat, labelled result rows into nested [`Record`]s.
//!
//! Joined one-to-many relations repeat the parent's columns on every child
//! row. Hydration collapses those repeats by primary key at every level of
//! the [`LoadPlan`], so each parent appears once, in first-seen order, with
//! its children gathered beneath it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use repokit_core::RepoResult;

use crate::descriptor::Cardinality;
use crate::query::statement::{LoadNode, LoadPlan};
use crate::row::{Record, Related, Row};
use crate::value::{Value, ValueKey};

/// Child positions for one hydrated record, keyed by relation name.
///
/// Mirrors the record tree: `nested[i]` indexes the `i`-th loaded child.
#[derive(Debug, Default)]
struct ChildIndex {
    relations: HashMap<&'static str, RelationIndex>,
}

#[derive(Debug, Default)]
struct RelationIndex {
    positions: HashMap<ValueKey, usize>,
    nested: Vec<ChildIndex>,
}

/// Hydrates `rows` according to `plan`, one record per distinct root key.
pub fn hydrate(plan: &LoadPlan, rows: &[Row]) -> RepoResult<Vec<Record>> {
    let mut records: Vec<Record> = Vec::new();
    let mut indexes: Vec<ChildIndex> = Vec::new();
    let mut seen: HashMap<ValueKey, usize> = HashMap::new();

    for row in rows {
        let Some((key, record)) = extract(&plan.root, row)? else {
            continue;
        };
        let idx = match seen.entry(key) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                records.push(record);
                indexes.push(ChildIndex::default());
                *e.insert(records.len() - 1)
            }
        };
        merge_children(&plan.root, &mut records[idx], &mut indexes[idx], row)?;
    }
    Ok(records)
}

/// Reads one node's columns out of a row. Returns `None` when the node's
/// primary key is NULL, which is how an unmatched outer join shows up.
fn extract(node: &LoadNode, row: &Row) -> RepoResult<Option<(ValueKey, Record)>> {
    let pk = node.descriptor.primary_key()?;
    let pk_value = row.get_value(&node.label(pk.name)).unwrap_or(&Value::Null);
    if pk_value.is_null() {
        return Ok(None);
    }
    let key = ValueKey::try_from(&pk.column_type.normalize(pk_value.clone()))?;

    let pairs = node.descriptor.columns().iter().map(|col| {
        let raw = row
            .get_value(&node.label(col.name))
            .cloned()
            .unwrap_or(Value::Null);
        (col.name.to_string(), col.column_type.normalize(raw))
    });
    let mut record = Record::new(Row::from_pairs(pairs));

    for child in &node.children {
        if let Some((name, cardinality)) = child.relation {
            let empty = match cardinality {
                Cardinality::OneToMany => Related::Many(Vec::new()),
                Cardinality::ManyToOne | Cardinality::OneToOne => Related::One(None),
            };
            record.set_related(name, empty);
        }
    }
    Ok(Some((key, record)))
}

fn merge_children(
    node: &LoadNode,
    record: &mut Record,
    index: &mut ChildIndex,
    row: &Row,
) -> RepoResult<()> {
    for child in &node.children {
        let Some((name, _)) = child.relation else {
            continue;
        };
        let Some((key, child_record)) = extract(child, row)? else {
            continue;
        };
        let slot = index.relations.entry(name).or_default();

        match record.related_mut(name) {
            Some(Related::Many(list)) => {
                let idx = match slot.positions.entry(key) {
                    Entry::Occupied(e) => *e.get(),
                    Entry::Vacant(e) => {
                        list.push(child_record);
                        slot.nested.push(ChildIndex::default());
                        *e.insert(list.len() - 1)
                    }
                };
                merge_children(child, &mut list[idx], &mut slot.nested[idx], row)?;
            }
            Some(Related::One(target)) => {
                let target = target.get_or_insert_with(|| Box::new(child_record));
                if slot.nested.is_empty() {
                    slot.nested.push(ChildIndex::default());
                }
                merge_children(child, target, &mut slot.nested[0], row)?;
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use super::*;
    use crate::descriptor::{ColumnDef, ColumnType, EntityDescriptor, Relationship};

    static POST: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("post", "posts")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("title", ColumnType::Text))
            .relationship(Relationship::one_to_many("comments", || &*COMMENT, "id", "post_id"))
            .build()
    });

    static COMMENT: LazyLock<EntityDescriptor> = LazyLock::new(|| {
        EntityDescriptor::builder("comment", "comments")
            .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .column(ColumnDef::new("post_id", ColumnType::Integer))
            .column(ColumnDef::new("flagged", ColumnType::Boolean))
            .relationship(Relationship::many_to_one("post", || &*POST, "post_id", "id"))
            .build()
    });

    fn plan() -> LoadPlan {
        LoadPlan {
            root: LoadNode {
                alias: "posts".into(),
                descriptor: &POST,
                relation: None,
                children: vec![LoadNode {
                    alias: "comments_1".into(),
                    descriptor: &COMMENT,
                    relation: Some(("comments", Cardinality::OneToMany)),
                    children: vec![],
                }],
            },
        }
    }

    fn row(post: i64, title: &str, comment: Option<i64>) -> Row {
        Row::new(
            vec![
                "posts.id".into(),
                "posts.title".into(),
                "comments_1.id".into(),
                "comments_1.post_id".into(),
                "comments_1.flagged".into(),
            ],
            vec![
                Value::Int(post),
                Value::from(title),
                Value::from(comment),
                comment.map_or(Value::Null, |_| Value::Int(post)),
                comment.map_or(Value::Null, |_| Value::Int(0)),
            ],
        )
    }

    #[test]
    fn test_fan_out_collapses() {
        let rows = vec![
            row(1, "a", Some(10)),
            row(1, "a", Some(11)),
            row(2, "b", Some(12)),
            row(1, "a", Some(10)),
        ];
        let records = hydrate(&plan(), &rows).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get::<i64>("id").unwrap(), 1);
        match records[0].related("comments") {
            Some(Related::Many(list)) => {
                assert_eq!(list.len(), 2);
                assert_eq!(list[0].value("flagged"), Some(&Value::Bool(false)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wide_fan_out_keeps_first_seen_order() {
        let ids: Vec<i64> = (0..500).rev().collect();
        let rows: Vec<Row> = ids
            .iter()
            .chain(ids.iter())
            .map(|&c| row(1, "a", Some(c)))
            .collect();
        let records = hydrate(&plan(), &rows).unwrap();
        assert_eq!(records.len(), 1);
        match records[0].related("comments") {
            Some(Related::Many(list)) => {
                assert_eq!(list.len(), 500);
                assert_eq!(list[0].get::<i64>("id").unwrap(), 499);
                assert_eq!(list[499].get::<i64>("id").unwrap(), 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unmatched_outer_join_is_loaded_empty() {
        let records = hydrate(&plan(), &[row(3, "c", None)]).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].related("comments"), Some(Related::Many(l)) if l.is_empty()));
    }

    #[test]
    fn test_to_one_relation() {
        let plan = LoadPlan {
            root: LoadNode {
                alias: "comments".into(),
                descriptor: &COMMENT,
                relation: None,
                children: vec![LoadNode {
                    alias: "posts_1".into(),
                    descriptor: &POST,
                    relation: Some(("post", Cardinality::ManyToOne)),
                    children: vec![],
                }],
            },
        };
        let r = Row::new(
            vec![
                "comments.id".into(),
                "comments.post_id".into(),
                "comments.flagged".into(),
                "posts_1.id".into(),
                "posts_1.title".into(),
            ],
            vec![
                Value::Int(5),
                Value::Int(1),
                Value::Int(1),
                Value::Int(1),
                Value::from("a"),
            ],
        );
        let records = hydrate(&plan, &[r]).unwrap();
        match records[0].related("post") {
            Some(Related::One(Some(post))) => {
                assert_eq!(post.get::<String>("title").unwrap(), "a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
