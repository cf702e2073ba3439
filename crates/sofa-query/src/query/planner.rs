//! Index selection
//!
//! Every group of field conditions joined by AND must be answered by a single
//! value index that holds all of the group's fields. Groups are combined by
//! set operations on document ids, never by scanning documents. When no
//! index covers a group the query is rejected with `NoSuitableIndex`.

use std::collections::{BTreeMap, BTreeSet};

use super::selector::{Condition, Selector, SortField};
use crate::error::{QueryError, QueryResult};
use crate::index::{IndexDefinition, IndexKind, DOC_ID_COLUMN, REV_ID_COLUMN};

/// A node of the execution plan; each yields a set of document ids
#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    /// AND-ed field conditions answered from one value index
    Scan {
        index: IndexDefinition,
        conditions: Vec<(String, Condition)>,
    },
    /// Full-text match against the text index
    Text { index: IndexDefinition, search: String },
    And(Vec<PlanNode>),
    Or(Vec<PlanNode>),
}

/// Compiled query: the id-set tree plus the table rows are ordered from
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub root: PlanNode,
    /// Index whose table supplies `_rev` and the sort columns
    pub order_index: IndexDefinition,
    pub sort: Vec<SortField>,
}

impl Plan {
    /// Every index the plan reads, the ordering index first
    pub fn indexes(&self) -> Vec<&IndexDefinition> {
        let mut scans = Vec::new();
        let mut texts = Vec::new();
        walk(&self.root, &mut scans, &mut texts);

        let mut indexes = vec![&self.order_index];
        for index in scans.into_iter().chain(texts) {
            if !indexes.iter().any(|seen| seen.name == index.name) {
                indexes.push(index);
            }
        }
        indexes
    }

    /// `$search` strings with the text index each one runs against
    pub fn text_searches(&self) -> Vec<(&IndexDefinition, &str)> {
        fn collect<'a>(node: &'a PlanNode, out: &mut Vec<(&'a IndexDefinition, &'a str)>) {
            match node {
                PlanNode::Text { index, search } => out.push((index, search.as_str())),
                PlanNode::Scan { .. } => {}
                PlanNode::And(children) | PlanNode::Or(children) => {
                    for child in children {
                        collect(child, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }
}

/// Choose indexes for `selector` and check `sort` against them
pub fn plan(
    selector: &Selector,
    definitions: &BTreeMap<String, IndexDefinition>,
    sort: &[SortField],
) -> QueryResult<Plan> {
    let planner = Planner { definitions, sort };
    let root = planner.node(selector)?;
    let order_index = order_index(&root, sort)?;

    Ok(Plan {
        root,
        order_index,
        sort: sort.to_vec(),
    })
}

struct Planner<'a> {
    definitions: &'a BTreeMap<String, IndexDefinition>,
    sort: &'a [SortField],
}

impl Planner<'_> {
    fn node(&self, selector: &Selector) -> QueryResult<PlanNode> {
        match selector {
            Selector::Or(children) => Ok(PlanNode::Or(
                children
                    .iter()
                    .map(|child| self.node(child))
                    .collect::<QueryResult<_>>()?,
            )),
            Selector::And(children) => self.conjunction(children),
            leaf => self.conjunction(std::slice::from_ref(leaf)),
        }
    }

    fn conjunction(&self, children: &[Selector]) -> QueryResult<PlanNode> {
        let mut group = Vec::new();
        let mut nodes = Vec::new();
        self.collect(children, &mut group, &mut nodes)?;

        // An empty conjunction still needs a table to list documents from
        if !group.is_empty() || nodes.is_empty() {
            let index = self.choose_index(&group)?;
            nodes.insert(
                0,
                PlanNode::Scan {
                    index: index.clone(),
                    conditions: group,
                },
            );
        }

        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            PlanNode::And(nodes)
        })
    }

    fn collect(
        &self,
        children: &[Selector],
        group: &mut Vec<(String, Condition)>,
        nodes: &mut Vec<PlanNode>,
    ) -> QueryResult<()> {
        for child in children {
            match child {
                Selector::And(inner) => self.collect(inner, group, nodes)?,
                Selector::Field { path, condition } => {
                    group.push((path.clone(), condition.clone()));
                }
                Selector::Text(search) => nodes.push(PlanNode::Text {
                    index: self.text_index()?.clone(),
                    search: search.clone(),
                }),
                Selector::Or(_) => nodes.push(self.node(child)?),
            }
        }
        Ok(())
    }

    /// Rank candidates: leading field constrained, covers the sort, fewest
    /// fields, then name
    fn choose_index(&self, group: &[(String, Condition)]) -> QueryResult<&IndexDefinition> {
        let paths: BTreeSet<&str> = group
            .iter()
            .map(|(path, _)| path.as_str())
            .filter(|path| *path != DOC_ID_COLUMN && *path != REV_ID_COLUMN)
            .collect();

        self.definitions
            .values()
            .filter(|d| d.kind == IndexKind::Value)
            .filter(|d| paths.iter().all(|path| d.covers(path)))
            .min_by_key(|d| {
                let leading_unused = d
                    .fields
                    .first()
                    .map_or(true, |f| !paths.contains(f.path.as_str()));
                let misses_sort = !self.sort.iter().all(|s| d.covers(&s.path));
                (leading_unused, misses_sort, d.fields.len(), d.name.clone())
            })
            .ok_or_else(|| {
                if paths.is_empty() {
                    QueryError::NoSuitableIndex("no value index exists".to_string())
                } else {
                    QueryError::NoSuitableIndex(format!(
                        "no single index covers fields [{}]",
                        paths.into_iter().collect::<Vec<_>>().join(", ")
                    ))
                }
            })
    }

    fn text_index(&self) -> QueryResult<&IndexDefinition> {
        self.definitions
            .values()
            .find(|d| d.kind == IndexKind::Text)
            .ok_or_else(|| QueryError::NoSuitableIndex("$text needs a text index".to_string()))
    }
}

/// The first index in the plan that can order the results.
///
/// Its table supplies the sort values. A document without rows there (one
/// with arrays in two of the index's fields) sorts as if the fields were
/// missing, but the renderer still reads it from the other tables.
fn order_index(root: &PlanNode, sort: &[SortField]) -> QueryResult<IndexDefinition> {
    let mut scans = Vec::new();
    let mut texts = Vec::new();
    walk(root, &mut scans, &mut texts);

    if sort.is_empty() {
        return scans
            .first()
            .or_else(|| texts.first())
            .map(|d| IndexDefinition::clone(d))
            .ok_or_else(|| QueryError::NoSuitableIndex("query uses no index".to_string()));
    }

    scans
        .into_iter()
        .find(|d| sort.iter().all(|s| d.covers(&s.path)))
        .cloned()
        .ok_or_else(|| {
            QueryError::InvalidSort(format!(
                "no index used by the query covers sort fields [{}]",
                sort.iter()
                    .map(|s| s.path.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

fn walk<'a>(
    node: &'a PlanNode,
    scans: &mut Vec<&'a IndexDefinition>,
    texts: &mut Vec<&'a IndexDefinition>,
) {
    match node {
        PlanNode::Scan { index, .. } => scans.push(index),
        PlanNode::Text { index, .. } => texts.push(index),
        PlanNode::And(children) | PlanNode::Or(children) => {
            for child in children {
                walk(child, scans, texts);
            }
        }
    }
}
