//! Error types for indexing and querying

use sofa_core::StorageError;
use sofa_sqlite::SqliteError;
use thiserror::Error;

/// Indexing and query errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// Names can only contain letters, digits and underscores, and must not
    /// start with a digit
    #[error("Invalid index name '{0}'")]
    InvalidIndexName(String),

    /// An index with this name exists with a different definition
    #[error("Index conflict: {0}")]
    IndexConflict(String),

    #[error("Index '{0}' does not exist")]
    IndexDoesNotExist(String),

    /// The linked SQLite has no full-text support
    #[error("Text search is not available in this SQLite build")]
    TextSearchUnavailable,

    /// Index settings that cannot be applied (e.g. an unknown tokenizer)
    #[error("Invalid index settings: {0}")]
    InvalidIndexSettings(String),

    /// No declared index can answer part of the selector
    #[error("No suitable index: {0}")]
    NoSuitableIndex(String),

    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    /// Malformed selector, options or field names
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Key provided could not be used to open the index database
    #[error("Encryption key error: {0}")]
    EncryptionKeyError(String),

    /// An SQL error occurred during indexing or querying
    #[error("SQL error: {0}")]
    SqlError(String),

    /// Placeholder count does not match the bound values
    #[error("Malformed SQL fragment: {placeholders} placeholders, {values} values")]
    MalformedFragment { placeholders: usize, values: usize },

    /// The datastore failed while indexing or resolving results
    #[error("Datastore error: {0}")]
    Datastore(#[from] StorageError),
}

/// Result type for indexing and query operations
pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// Transient failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SqlError(_) => true,
            Self::Datastore(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::SqlError(err.to_string())
    }
}

impl From<SqliteError> for QueryError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::EncryptionKey(msg) => Self::EncryptionKeyError(msg),
            other => Self::SqlError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_map_to_sql_error() {
        let err: QueryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, QueryError::SqlError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_key_errors_keep_their_kind() {
        let err: QueryError = SqliteError::EncryptionKey("wrong key".to_string()).into();
        assert!(matches!(err, QueryError::EncryptionKeyError(ref m) if m == "wrong key"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        assert!(!QueryError::InvalidIndexName("1bad".to_string()).is_retryable());
        assert!(!QueryError::NoSuitableIndex("age".to_string()).is_retryable());
    }
}
