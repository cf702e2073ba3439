//! Index definitions
//!
//! An index is described by its name, kind, ordered field list and settings.
//! Definitions live in the metadata table ([`store`]); each index also owns
//! one physical table ([`table`]) that the [`updater`] keeps in step with the
//! datastore's change feed.

pub mod store;
pub mod table;
pub mod updater;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sofa_core::Sequence;

use crate::error::{QueryError, QueryResult};

/// Bumped when the physical layout of index tables changes
pub const INDEX_SCHEMA_VERSION: i64 = 2;

/// Prefix of every physical index table
pub const INDEX_TABLE_PREFIX: &str = "_sofa_query_index_";

/// Prefix of the SQL indexes over index tables, disjoint from table names
pub const SQL_INDEX_PREFIX: &str = "_sofa_query_key_";

/// Field columns are named by position: `f0`, `f1`, ...
pub const FIELD_COLUMN_PREFIX: &str = "f";

/// Document id column present in every index table
pub const DOC_ID_COLUMN: &str = "_id";

/// Revision id column present in every index table
pub const REV_ID_COLUMN: &str = "_rev";

/// Settings key selecting the FTS tokenizer of a text index
pub const TOKENIZE_SETTING: &str = "tokenize";

static INDEX_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid index name regex"));

static TOKENIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+( [A-Za-z0-9_]+)*$").expect("valid tokenizer regex"));

/// Kind of index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Typed columns queried with equality and range predicates
    Value,
    /// FTS5 table queried with `$text`
    Text,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "json",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" | "value" => Ok(Self::Value),
            "text" => Ok(Self::Text),
            other => Err(QueryError::InvalidIndexSettings(format!(
                "unknown index type '{}'",
                other
            ))),
        }
    }
}

/// SQL-level type of an indexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    /// Type of a scalar JSON value, `None` for null, arrays and objects
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Number(_) => Some(Self::Number),
            Value::Bool(_) => Some(Self::Boolean),
            _ => None,
        }
    }
}

impl FromStr for FieldType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            other => Err(QueryError::InvalidIndexSettings(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }
}

/// One indexed field: a dotted path and its column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub path: String,
    /// Declared at creation or fixed by the first indexed value
    pub field_type: Option<FieldType>,
}

impl IndexField {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field_type: None,
        }
    }

    /// Declare the column type up front
    #[must_use]
    pub fn typed(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// `_id` and `_rev` map to the built-in columns
    pub fn is_builtin(&self) -> bool {
        self.path == DOC_ID_COLUMN || self.path == REV_ID_COLUMN
    }
}

/// A persisted index definition
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<IndexField>,
    pub settings: BTreeMap<String, String>,
    pub schema_version: i64,
    pub last_sequence: Sequence,
}

impl IndexDefinition {
    /// Physical table backing this index
    pub fn table_name(&self) -> String {
        table_name_for_index(&self.name)
    }

    pub fn field_paths(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.path.clone()).collect()
    }

    /// Whether `path` can be constrained through this index
    pub fn covers(&self, path: &str) -> bool {
        path == DOC_ID_COLUMN
            || path == REV_ID_COLUMN
            || self.fields.iter().any(|f| f.path == path)
    }

    pub fn field(&self, path: &str) -> Option<&IndexField> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Column holding `path` in this index's table.
    ///
    /// `_id` and `_rev` use the built-in columns; every other field is named
    /// after its position in the field list, as recorded in the metadata, so
    /// paths differing only in case or clashing with FTS5 column names such
    /// as `rank` still get distinct, legal columns.
    pub fn column_for(&self, path: &str) -> Option<String> {
        if path == DOC_ID_COLUMN || path == REV_ID_COLUMN {
            return Some(path.to_string());
        }
        self.field_columns()
            .find(|(field, _)| field.path == path)
            .map(|(_, column)| column)
    }

    /// Fields stored in their own columns, paired with their column names
    pub fn field_columns(&self) -> impl Iterator<Item = (&IndexField, String)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| !field.is_builtin())
            .map(|(position, field)| (field, format!("{}{}", FIELD_COLUMN_PREFIX, position)))
    }

    /// Fields stored in their own columns (everything except `_id`/`_rev`)
    pub fn column_fields(&self) -> impl Iterator<Item = &IndexField> {
        self.fields.iter().filter(|f| !f.is_builtin())
    }

    /// Same shape as a requested spec: kind, field order and settings.
    ///
    /// Observed field types are not part of the shape; a declared type in
    /// the request must match the stored one.
    pub fn matches_spec(&self, spec: &IndexSpec) -> bool {
        self.kind == spec.kind
            && self.settings == spec.settings
            && self.fields.len() == spec.fields.len()
            && self.fields.iter().zip(&spec.fields).all(|(stored, requested)| {
                stored.path == requested.path
                    && (requested.field_type.is_none()
                        || requested.field_type == stored.field_type)
            })
    }
}

/// Request to create an index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub kind: IndexKind,
    pub fields: Vec<IndexField>,
    pub settings: BTreeMap<String, String>,
}

impl IndexSpec {
    /// A value index over `fields`
    pub fn value<S: AsRef<str>>(name: impl Into<String>, fields: &[S]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Value,
            fields: fields.iter().map(|f| IndexField::new(f.as_ref())).collect(),
            settings: BTreeMap::new(),
        }
    }

    /// A text index over `fields`
    pub fn text<S: AsRef<str>>(name: impl Into<String>, fields: &[S]) -> Self {
        Self {
            kind: IndexKind::Text,
            ..Self::value(name, fields)
        }
    }

    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Declare the type of an already listed field
    #[must_use]
    pub fn with_field_type(mut self, path: &str, field_type: FieldType) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|f| f.path == path) {
            field.field_type = Some(field_type);
        }
        self
    }

    /// Check name, fields and settings without touching the database
    pub(crate) fn validate(&self) -> QueryResult<()> {
        validate_index_name(&self.name)?;

        if self.fields.is_empty() {
            return Err(QueryError::InvalidIndexSettings(format!(
                "index '{}' must have at least one field",
                self.name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            validate_field_path(&field.path).map_err(|_| {
                QueryError::InvalidIndexSettings(format!("invalid field path '{}'", field.path))
            })?;
            if !seen.insert(field.path.as_str()) {
                return Err(QueryError::InvalidIndexSettings(format!(
                    "field '{}' is listed more than once",
                    field.path
                )));
            }
        }

        match self.kind {
            IndexKind::Value => {
                if let Some(key) = self.settings.keys().next() {
                    return Err(QueryError::InvalidIndexSettings(format!(
                        "value indexes take no settings, got '{}'",
                        key
                    )));
                }
            }
            IndexKind::Text => {
                for (key, value) in &self.settings {
                    if key != TOKENIZE_SETTING {
                        return Err(QueryError::InvalidIndexSettings(format!(
                            "unknown text index setting '{}'",
                            key
                        )));
                    }
                    if !TOKENIZER.is_match(value) {
                        return Err(QueryError::InvalidIndexSettings(format!(
                            "invalid tokenizer '{}'",
                            value
                        )));
                    }
                }
                if let Some(field) = self.fields.iter().find(|f| f.is_builtin()) {
                    return Err(QueryError::InvalidIndexSettings(format!(
                        "text indexes cannot include '{}'",
                        field.path
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Deterministic physical table name for an index
pub fn table_name_for_index(name: &str) -> String {
    format!("{}{}", INDEX_TABLE_PREFIX, name)
}

/// Name of an SQL index over the table of `index_name`; `purpose` is a
/// fixed suffix such as `fields` or `id`
pub fn sql_index_name(index_name: &str, purpose: &str) -> String {
    format!("{}{}_{}", SQL_INDEX_PREFIX, purpose, index_name)
}

/// Index names are `[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_index_name(name: &str) -> QueryResult<()> {
    if INDEX_NAME.is_match(name) {
        Ok(())
    } else {
        Err(QueryError::InvalidIndexName(name.to_string()))
    }
}

/// Field paths are dot-separated, non-empty segments not starting with `$`
pub fn validate_field_path(path: &str) -> QueryResult<()> {
    let valid = !path.is_empty()
        && path
            .split('.')
            .all(|segment| !segment.is_empty() && !segment.starts_with('$'));
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidQuery(format!("invalid field path '{}'", path)))
    }
}
