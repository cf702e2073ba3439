//! Storage error types

use thiserror::Error;

/// Error type for datastore operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The document or revision does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A write was based on a revision that is no longer current
    #[error("Revision conflict on document {doc_id}: expected {expected}, found {actual}")]
    Conflict {
        doc_id: String,
        expected: String,
        actual: String,
    },

    /// The document body or id is not acceptable
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Failure in the backing storage engine
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for datastore operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Create a generic backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
