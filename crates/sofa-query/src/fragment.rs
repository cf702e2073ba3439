//! Parameterized SQL fragments
//!
//! [`SqlParts`] pairs SQL text containing positional `?` placeholders with the
//! values bound to them. Index maintenance and query compilation only ever
//! produce SQL through this type: literal values travel as bound parameters,
//! identifiers go through [`quote_identifier`].

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::Value;
use tracing::trace;

use crate::error::{QueryError, QueryResult};

/// SQL text with positional placeholders and its bound values
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParts {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlParts {
    /// Build a fragment, checking that every placeholder has a value
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> QueryResult<Self> {
        let sql = sql.into();
        let placeholders = count_placeholders(&sql);
        if placeholders != params.len() {
            return Err(QueryError::MalformedFragment {
                placeholders,
                values: params.len(),
            });
        }
        Ok(Self { sql, params })
    }

    /// A fragment without bound values
    pub fn raw(sql: impl Into<String>) -> QueryResult<Self> {
        Self::new(sql, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.params)
    }

    /// Append `other`, keeping bound values in textual order
    #[must_use]
    pub fn concat(mut self, other: SqlParts) -> Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
        self
    }

    /// Join fragments with a separator that carries no placeholders
    pub fn join(parts: impl IntoIterator<Item = SqlParts>, separator: &str) -> QueryResult<Self> {
        let separator = Self::raw(separator)?;
        let mut joined: Option<SqlParts> = None;
        for part in parts {
            joined = Some(match joined {
                None => part,
                Some(acc) => acc.concat(separator.clone()).concat(part),
            });
        }
        Ok(joined.unwrap_or_else(|| Self {
            sql: String::new(),
            params: Vec::new(),
        }))
    }

    /// Surround this fragment with placeholder-free text
    pub fn wrap(self, prefix: &str, suffix: &str) -> QueryResult<Self> {
        Ok(Self::raw(prefix)?.concat(self).concat(Self::raw(suffix)?))
    }

    /// Run as a statement, returning the number of changed rows
    pub fn execute(&self, conn: &Connection) -> QueryResult<usize> {
        trace!(sql = %self.sql, params = self.params.len(), "Executing statement");
        Ok(conn.execute(&self.sql, params_from_iter(self.params.iter()))?)
    }

    /// Run as a query, mapping every row
    pub fn query_map<T, F>(&self, conn: &Connection, mut f: F) -> QueryResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        trace!(sql = %self.sql, params = self.params.len(), "Running query");
        let mut stmt = conn.prepare(&self.sql)?;
        let rows = stmt.query_map(params_from_iter(self.params.iter()), |row| f(row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Quote an identifier for use in SQL text, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a scalar JSON value to its SQLite representation.
///
/// Booleans become 0/1 integers. Arrays and objects are not scalars.
pub fn sql_value(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => Some(SqlValue::Null),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Count `?` placeholders outside quoted identifiers and string literals
fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match quote {
            // A doubled quote closes and reopens, which nets out
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '?' => count += 1,
            None => {}
        }
    }
    count
}
