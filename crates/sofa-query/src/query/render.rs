//! SQL generation for query plans
//!
//! Each plan node renders to a statement returning a set of document ids.
//! Nodes combine with INTERSECT / UNION / EXCEPT; the outer statement then
//! reads `_id`, `_rev` and the sort columns, grouping array-expanded rows
//! back into one row per document. When the plan touches several tables the
//! outer statement reads from all of them, so a document missing from the
//! ordering table (arrays in two of its fields) is still returned when
//! another branch matched it; it then has no sort value.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::planner::{Plan, PlanNode};
use super::selector::{Condition, SortDirection};
use crate::error::{QueryError, QueryResult};
use crate::fragment::{quote_identifier, sql_value, SqlParts};
use crate::index::{FieldType, IndexDefinition, DOC_ID_COLUMN, REV_ID_COLUMN};

/// Render the complete statement, selecting `(_id, _rev)` rows
pub fn render(plan: &Plan, skip: usize, limit: Option<usize>) -> QueryResult<SqlParts> {
    let id = quote_identifier(DOC_ID_COLUMN);
    let rev = quote_identifier(REV_ID_COLUMN);

    let sort_columns = plan
        .sort
        .iter()
        .map(|s| column_of(&plan.order_index, &s.path))
        .collect::<QueryResult<Vec<_>>>()?;

    let indexes = plan.indexes();
    let (source, sort_columns) = if indexes.len() == 1 {
        (quote_identifier(&plan.order_index.table_name()), sort_columns)
    } else {
        let aliases: Vec<String> = (0..sort_columns.len())
            .map(|i| quote_identifier(&format!("_sort{}", i)))
            .collect();
        let selects: Vec<String> = indexes
            .iter()
            .map(|index| {
                let mut columns = vec![id.clone(), rev.clone()];
                for ((sort, column), alias) in plan.sort.iter().zip(&sort_columns).zip(&aliases) {
                    let builtin = sort.path == DOC_ID_COLUMN || sort.path == REV_ID_COLUMN;
                    if builtin || index.name == plan.order_index.name {
                        columns.push(format!("{} AS {}", column, alias));
                    } else {
                        columns.push(format!("NULL AS {}", alias));
                    }
                }
                format!(
                    "SELECT {} FROM {}",
                    columns.join(", "),
                    quote_identifier(&index.table_name())
                )
            })
            .collect();
        (format!("({})", selects.join(" UNION ALL ")), aliases)
    };

    let mut order: Vec<String> = plan
        .sort
        .iter()
        .zip(&sort_columns)
        .map(|(s, column)| match s.direction {
            SortDirection::Asc => format!("MIN({}) ASC", column),
            SortDirection::Desc => format!("MAX({}) DESC", column),
        })
        .collect();
    if !plan.sort.iter().any(|s| s.path == DOC_ID_COLUMN) {
        order.push(format!("{} ASC", id));
    }

    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let skip = i64::try_from(skip).unwrap_or(i64::MAX);

    let statement = SqlParts::raw(format!(
        "SELECT {id}, {rev} FROM {source} WHERE {id} IN ("
    ))?
    .concat(render_node(&plan.root)?)
    .concat(SqlParts::new(
        format!(
            ") GROUP BY {id} ORDER BY {} LIMIT ? OFFSET ?",
            order.join(", ")
        ),
        vec![SqlValue::Integer(limit), SqlValue::Integer(skip)],
    )?);
    Ok(statement)
}

/// Quoted column holding `path` in the table of `index`
fn column_of(index: &IndexDefinition, path: &str) -> QueryResult<String> {
    index
        .column_for(path)
        .map(|c| quote_identifier(&c))
        .ok_or_else(|| {
            QueryError::InvalidQuery(format!("index '{}' does not hold '{}'", index.name, path))
        })
}

fn render_node(node: &PlanNode) -> QueryResult<SqlParts> {
    match node {
        PlanNode::Scan { index, conditions } => render_scan(index, conditions),
        PlanNode::Text { index, search } => {
            let table = quote_identifier(&index.table_name());
            SqlParts::new(
                format!(
                    "SELECT {} FROM {} WHERE {} MATCH ?",
                    quote_identifier(DOC_ID_COLUMN),
                    table,
                    table
                ),
                vec![SqlValue::Text(search.clone())],
            )
        }
        PlanNode::And(children) => {
            compound(children.iter().map(render_node).collect::<QueryResult<_>>()?, "INTERSECT")
        }
        PlanNode::Or(children) => {
            compound(children.iter().map(render_node).collect::<QueryResult<_>>()?, "UNION")
        }
    }
}

/// Combine id-set statements; each operand is wrapped so the set operators
/// apply to whole statements
fn compound(parts: Vec<SqlParts>, operator: &str) -> QueryResult<SqlParts> {
    if parts.len() == 1 {
        return parts.into_iter().next().ok_or_else(|| {
            QueryError::InvalidQuery("empty compound selector".to_string())
        });
    }
    let prefix = format!("SELECT {} FROM (", quote_identifier(DOC_ID_COLUMN));
    let wrapped = parts
        .into_iter()
        .map(|part| part.wrap(&prefix, ")"))
        .collect::<QueryResult<Vec<_>>>()?;
    SqlParts::join(wrapped, &format!(" {} ", operator))
}

fn render_scan(index: &IndexDefinition, conditions: &[(String, Condition)]) -> QueryResult<SqlParts> {
    let table = quote_identifier(&index.table_name());
    let select = format!("SELECT {} FROM {}", quote_identifier(DOC_ID_COLUMN), table);

    let (negatives, positives): (Vec<_>, Vec<_>) =
        conditions.iter().partition(|(_, condition)| condition.is_negative());

    let mut parts = Vec::new();
    // Positive conditions share a WHERE, so they hold for the same row
    if !positives.is_empty() || negatives.is_empty() {
        let clauses = positives
            .iter()
            .map(|(path, condition)| predicate(index, path, condition))
            .collect::<QueryResult<Vec<_>>>()?;
        let base = SqlParts::raw(select.clone())?;
        parts.push(if clauses.is_empty() {
            base
        } else {
            base.concat(SqlParts::join(clauses, " AND ")?.wrap(" WHERE ", "")?)
        });
    }

    for (path, condition) in negatives {
        let column = column_of(index, path)?;
        let present = SqlParts::raw(format!("{} WHERE {} IS NOT NULL", select, column))?;
        let part = match condition {
            Condition::Exists(false) => SqlParts::raw(format!("{} EXCEPT ", select))?.concat(present),
            Condition::Not(inner) => present
                .concat(SqlParts::raw(format!(" EXCEPT {} WHERE ", select))?)
                .concat(predicate(index, path, inner)?),
            other => {
                return Err(QueryError::InvalidQuery(format!(
                    "unexpected negative condition {:?}",
                    other
                )))
            }
        };
        parts.push(part);
    }

    compound(parts, "INTERSECT")
}

/// A row-level predicate for a positive condition
fn predicate(index: &IndexDefinition, path: &str, condition: &Condition) -> QueryResult<SqlParts> {
    let column = column_of(index, path)?;
    let field_type = if path == DOC_ID_COLUMN || path == REV_ID_COLUMN {
        Some(FieldType::String)
    } else {
        index.field(path).and_then(|f| f.field_type)
    };

    match condition {
        Condition::Compare(operator, value) => {
            if !admits(field_type, value) {
                // The column never holds a value of this type
                return SqlParts::raw("0");
            }
            SqlParts::new(
                format!("{} {} ?", column, operator.sql()),
                vec![bind(value)?],
            )
        }
        Condition::In(values) => {
            let bound = values
                .iter()
                .filter(|v| admits(field_type, v))
                .map(bind)
                .collect::<QueryResult<Vec<_>>>()?;
            if bound.is_empty() {
                return SqlParts::raw("0");
            }
            let placeholders = vec!["?"; bound.len()].join(", ");
            SqlParts::new(format!("{} IN ({})", column, placeholders), bound)
        }
        Condition::Exists(true) => SqlParts::raw(format!("{} IS NOT NULL", column)),
        negative => Err(QueryError::InvalidQuery(format!(
            "condition {:?} on '{}' cannot be used as a row predicate",
            negative, path
        ))),
    }
}

fn admits(field_type: Option<FieldType>, value: &Value) -> bool {
    field_type.map_or(true, |expected| FieldType::of(value) == Some(expected))
}

fn bind(value: &Value) -> QueryResult<SqlValue> {
    sql_value(value)
        .ok_or_else(|| QueryError::InvalidQuery(format!("cannot bind {} as a query value", value)))
}
