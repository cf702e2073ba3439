//! Physical index tables
//!
//! Value indexes get a regular table with an untyped column per field, so
//! SQLite keeps each value's storage class; the field type recorded in the
//! metadata decides which values are admitted. Text indexes get an FTS5
//! virtual table. Both carry the `_id` / `_rev` back-reference, and field
//! columns are named by position (see [`IndexDefinition::column_for`]).

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use sofa_core::DocumentRevision;
use tracing::{debug, warn};

use super::{
    sql_index_name, FieldType, IndexDefinition, IndexKind, DOC_ID_COLUMN, REV_ID_COLUMN,
    TOKENIZE_SETTING,
};
use crate::error::{QueryError, QueryResult};
use crate::fragment::{quote_identifier, sql_value, SqlParts};

/// Tokenizer used when a text index does not name one
pub const DEFAULT_TOKENIZER: &str = "unicode61";

/// Create the table (and its SQL indexes) backing `definition`
pub fn create_index_table(conn: &Connection, definition: &IndexDefinition) -> QueryResult<()> {
    let table = quote_identifier(&definition.table_name());
    let mut columns = vec![
        quote_identifier(DOC_ID_COLUMN),
        quote_identifier(REV_ID_COLUMN),
    ];
    let field_columns: Vec<String> = definition
        .field_columns()
        .map(|(_, column)| quote_identifier(&column))
        .collect();

    match definition.kind {
        IndexKind::Value => {
            columns[0].push_str(" TEXT NOT NULL");
            columns[1].push_str(" TEXT NOT NULL");
            columns.extend(field_columns.iter().cloned());
            SqlParts::raw(format!("CREATE TABLE {} ({})", table, columns.join(", ")))?
                .execute(conn)?;

            if !field_columns.is_empty() {
                let index_name = quote_identifier(&sql_index_name(&definition.name, "fields"));
                SqlParts::raw(format!(
                    "CREATE INDEX {} ON {} ({})",
                    index_name,
                    table,
                    field_columns.join(", ")
                ))?
                .execute(conn)?;
            }

            let id_index = quote_identifier(&sql_index_name(&definition.name, "id"));
            SqlParts::raw(format!(
                "CREATE INDEX {} ON {} ({})",
                id_index,
                table,
                quote_identifier(DOC_ID_COLUMN)
            ))?
            .execute(conn)?;
        }
        IndexKind::Text => {
            columns[0].push_str(" UNINDEXED");
            columns[1].push_str(" UNINDEXED");
            columns.extend(field_columns.iter().cloned());
            let tokenizer = definition
                .settings
                .get(TOKENIZE_SETTING)
                .map(String::as_str)
                .unwrap_or(DEFAULT_TOKENIZER);
            // Tokenizer names are validated against [A-Za-z0-9_ ] before reaching here
            SqlParts::raw(format!(
                "CREATE VIRTUAL TABLE {} USING fts5({}, tokenize = '{}')",
                table,
                columns.join(", "),
                tokenizer
            ))?
            .execute(conn)?;
        }
    }

    debug!(index = %definition.name, kind = %definition.kind, "Created index table");
    Ok(())
}

/// Drop the table backing the named index (its SQL indexes go with it)
pub fn drop_index_table(conn: &Connection, index_name: &str) -> QueryResult<()> {
    let table = quote_identifier(&super::table_name_for_index(index_name));
    SqlParts::raw(format!("DROP TABLE IF EXISTS {}", table))?.execute(conn)?;
    Ok(())
}

/// Remove every row of one document
pub fn delete_document_rows(
    conn: &Connection,
    definition: &IndexDefinition,
    doc_id: &str,
) -> QueryResult<usize> {
    SqlParts::new(
        format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(&definition.table_name()),
            quote_identifier(DOC_ID_COLUMN)
        ),
        vec![SqlValue::Text(doc_id.to_string())],
    )?
    .execute(conn)
}

/// Insert prepared rows; each row holds `_id`, `_rev`, then one value per column field
pub fn insert_rows(
    conn: &Connection,
    definition: &IndexDefinition,
    rows: Vec<Vec<SqlValue>>,
) -> QueryResult<usize> {
    let mut columns = vec![
        quote_identifier(DOC_ID_COLUMN),
        quote_identifier(REV_ID_COLUMN),
    ];
    columns.extend(
        definition
            .field_columns()
            .map(|(_, column)| quote_identifier(&column)),
    );
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(&definition.table_name()),
        columns.join(", "),
        placeholders
    );

    let mut inserted = 0;
    for row in rows {
        inserted += SqlParts::new(sql.clone(), row)?.execute(conn)?;
    }
    Ok(inserted)
}

/// Reject a `$search` string FTS5 cannot parse.
///
/// FTS5 reports query syntax problems as generic SQL errors when the MATCH
/// runs (`e-mail` reads as column `e` minus `mail`), so the string is tried
/// against the index table once before the real statement is built.
pub fn check_text_search(
    conn: &Connection,
    definition: &IndexDefinition,
    search: &str,
) -> QueryResult<()> {
    let table = quote_identifier(&definition.table_name());
    let sql = format!("SELECT 1 FROM {} WHERE {} MATCH ? LIMIT 1", table, table);
    match conn.prepare(&sql).and_then(|mut stmt| stmt.exists([search])) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(failure, message))
            if failure.code == ErrorCode::Unknown =>
        {
            Err(QueryError::InvalidQuery(format!(
                "invalid text search '{}': {}",
                search,
                message.unwrap_or_else(|| failure.to_string())
            )))
        }
        Err(err) => Err(err.into()),
    }
}

/// Rows a document contributes to an index, plus field types seen for the first time
#[derive(Debug, Default, PartialEq)]
pub struct DocumentRows {
    pub rows: Vec<Vec<SqlValue>>,
    pub observed_types: Vec<(String, FieldType)>,
}

/// Compute the rows of one live document.
///
/// Field types still unset on `definition` are fixed by this document's
/// values and written back into `definition`, so later documents of the same
/// batch are checked against them.
pub fn document_rows(definition: &mut IndexDefinition, revision: &DocumentRevision) -> DocumentRows {
    match definition.kind {
        IndexKind::Value => value_rows(definition, revision),
        IndexKind::Text => DocumentRows {
            rows: vec![text_row(definition, revision)],
            observed_types: Vec::new(),
        },
    }
}

fn value_rows(definition: &mut IndexDefinition, revision: &DocumentRevision) -> DocumentRows {
    let mut observed_types = Vec::new();
    let mut columns: Vec<Vec<SqlValue>> = Vec::new();
    let mut array_columns = 0;

    let index_name = definition.name.clone();
    for field in definition.fields.iter_mut().filter(|f| !f.is_builtin()) {
        let raw = revision.field(&field.path);
        let values: Vec<Value> = match raw {
            Some(Value::Array(items)) => {
                array_columns += 1;
                items.into_iter().filter(|v| FieldType::of(v).is_some()).collect()
            }
            Some(value) if FieldType::of(&value).is_some() => vec![value],
            _ => Vec::new(),
        };

        let mut column = Vec::with_capacity(values.len().max(1));
        for value in values {
            let value_type = FieldType::of(&value);
            match (field.field_type, value_type) {
                (None, Some(observed)) => {
                    field.field_type = Some(observed);
                    observed_types.push((field.path.clone(), observed));
                    column.push(sql_value(&value).unwrap_or(SqlValue::Null));
                }
                (Some(expected), Some(actual)) if expected == actual => {
                    column.push(sql_value(&value).unwrap_or(SqlValue::Null));
                }
                (expected, actual) => {
                    warn!(
                        index = %index_name,
                        doc_id = %revision.doc_id,
                        field = %field.path,
                        expected = ?expected,
                        actual = ?actual,
                        "Indexing mismatched value as NULL"
                    );
                    column.push(SqlValue::Null);
                }
            }
        }
        if column.is_empty() {
            column.push(SqlValue::Null);
        }
        columns.push(column);
    }

    if array_columns > 1 {
        warn!(
            index = %index_name,
            doc_id = %revision.doc_id,
            "Document has arrays in more than one indexed field, not indexing it"
        );
        return DocumentRows {
            rows: Vec::new(),
            observed_types,
        };
    }

    // At most one column has more than one value, so this expands to one row per element
    let mut rows = vec![vec![
        SqlValue::Text(revision.doc_id.clone()),
        SqlValue::Text(revision.rev_id.clone()),
    ]];
    for column in columns {
        rows = rows
            .into_iter()
            .flat_map(|row| {
                column.iter().map(move |value| {
                    let mut row = row.clone();
                    row.push(value.clone());
                    row
                })
            })
            .collect();
    }

    DocumentRows {
        rows,
        observed_types,
    }
}

fn text_row(definition: &IndexDefinition, revision: &DocumentRevision) -> Vec<SqlValue> {
    let mut row = vec![
        SqlValue::Text(revision.doc_id.clone()),
        SqlValue::Text(revision.rev_id.clone()),
    ];
    for field in definition.column_fields() {
        let text = match revision.field(&field.path) {
            Some(Value::String(s)) => Some(s),
            Some(Value::Array(items)) => {
                let words: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!words.is_empty()).then(|| words.join(" "))
            }
            _ => None,
        };
        row.push(text.map(SqlValue::Text).unwrap_or(SqlValue::Null));
    }
    row
}
