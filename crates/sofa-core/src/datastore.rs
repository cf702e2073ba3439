//! Datastore abstraction consumed by the index engine
//!
//! The index engine is agnostic to how documents get written (local edits,
//! replication, cache fills). It only pulls from the change feed.

use crate::document::{DocumentBody, DocumentRevision};
use crate::error::StorageResult;

/// Monotonic change sequence assigned by the datastore to every mutation
pub type Sequence = i64;

/// One entry of the change feed
///
/// Reports the winning revision of a document as of the call, at the sequence
/// of that document's most recent change.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub sequence: Sequence,
    pub doc_id: String,
    pub rev_id: String,
    pub deleted: bool,
    /// Empty for deleted documents
    pub body: DocumentBody,
}

impl Change {
    /// View this change as a revision, e.g. for field extraction
    pub fn as_revision(&self) -> DocumentRevision {
        DocumentRevision {
            doc_id: self.doc_id.clone(),
            rev_id: self.rev_id.clone(),
            sequence: self.sequence,
            deleted: self.deleted,
            body: self.body.clone(),
        }
    }
}

impl From<DocumentRevision> for Change {
    fn from(rev: DocumentRevision) -> Self {
        Self {
            sequence: rev.sequence,
            doc_id: rev.doc_id,
            rev_id: rev.rev_id,
            deleted: rev.deleted,
            body: rev.body,
        }
    }
}

/// Read-side interface of a document store
pub trait Datastore: Send + Sync {
    /// The sequence of the most recent mutation, 0 for an empty store
    fn current_sequence(&self) -> StorageResult<Sequence>;

    /// Changes with sequence strictly greater than `since`, ascending by
    /// sequence, at most `limit` entries. Each document appears at most once.
    fn changes_since(&self, since: Sequence, limit: usize) -> StorageResult<Vec<Change>>;

    /// A specific revision, or `None` if it no longer exists
    fn get_revision(&self, doc_id: &str, rev_id: &str) -> StorageResult<Option<DocumentRevision>>;

    /// The current winning revision of a document, including tombstones
    fn get_winning_revision(&self, doc_id: &str) -> StorageResult<Option<DocumentRevision>>;
}
