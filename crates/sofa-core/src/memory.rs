//! In-memory datastore
//!
//! Keeps a linear revision history per document and a change feed keyed by
//! sequence. There are no conflicting branches: every write must name the
//! current revision, so the winning revision is always the latest one.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::datastore::{Change, Datastore, Sequence};
use crate::document::{DocumentBody, DocumentRevision};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Inner {
    /// Revision history per document, oldest first
    docs: HashMap<String, Vec<DocumentRevision>>,
    /// Latest change sequence -> document id
    feed: BTreeMap<Sequence, String>,
    sequence: Sequence,
}

impl Inner {
    fn next_sequence(&mut self) -> Sequence {
        self.sequence += 1;
        self.sequence
    }

    fn winning(&self, doc_id: &str) -> Option<&DocumentRevision> {
        self.docs.get(doc_id).and_then(|history| history.last())
    }

    fn push(&mut self, revision: DocumentRevision) -> DocumentRevision {
        if let Some(previous) = self.winning(&revision.doc_id) {
            let previous_seq = previous.sequence;
            self.feed.remove(&previous_seq);
        }
        self.feed.insert(revision.sequence, revision.doc_id.clone());
        self.docs
            .entry(revision.doc_id.clone())
            .or_default()
            .push(revision.clone());
        revision
    }
}

/// Thread-safe in-memory [`Datastore`]
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    inner: RwLock<Inner>,
}

impl MemoryDatastore {
    /// Create an empty datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document with a generated id
    pub fn create_document(&self, body: DocumentBody) -> StorageResult<DocumentRevision> {
        self.create(Uuid::new_v4().simple().to_string(), body)
    }

    /// Create a document. Recreating a deleted document continues its history.
    pub fn create(
        &self,
        doc_id: impl Into<String>,
        body: DocumentBody,
    ) -> StorageResult<DocumentRevision> {
        let doc_id = doc_id.into();
        validate_document(&doc_id, &body)?;

        let mut inner = self.inner.write();
        let generation = match inner.winning(&doc_id) {
            Some(current) if !current.deleted => {
                return Err(StorageError::Conflict {
                    doc_id,
                    expected: String::new(),
                    actual: current.rev_id.clone(),
                });
            }
            Some(tombstone) => tombstone.generation().unwrap_or(0) + 1,
            None => 1,
        };

        let sequence = inner.next_sequence();
        let revision = DocumentRevision::new(doc_id, new_rev_id(generation), sequence, body);
        debug!(doc_id = %revision.doc_id, rev_id = %revision.rev_id, sequence, "Created document");
        Ok(inner.push(revision))
    }

    /// Write a new revision on top of `prev_rev_id`
    pub fn update(
        &self,
        doc_id: &str,
        prev_rev_id: &str,
        body: DocumentBody,
    ) -> StorageResult<DocumentRevision> {
        validate_document(doc_id, &body)?;

        let mut inner = self.inner.write();
        let generation = current_generation(&inner, doc_id, prev_rev_id)?;
        let sequence = inner.next_sequence();
        let revision = DocumentRevision::new(doc_id, new_rev_id(generation + 1), sequence, body);
        debug!(doc_id, rev_id = %revision.rev_id, sequence, "Updated document");
        Ok(inner.push(revision))
    }

    /// Write a tombstone on top of `prev_rev_id`
    pub fn delete(&self, doc_id: &str, prev_rev_id: &str) -> StorageResult<DocumentRevision> {
        let mut inner = self.inner.write();
        let generation = current_generation(&inner, doc_id, prev_rev_id)?;
        let sequence = inner.next_sequence();
        let revision = DocumentRevision::tombstone(doc_id, new_rev_id(generation + 1), sequence);
        debug!(doc_id, rev_id = %revision.rev_id, sequence, "Deleted document");
        Ok(inner.push(revision))
    }

    /// Remove every trace of a document without recording a change.
    ///
    /// Indexes are not told about purges; rows pointing at the purged
    /// document stay until the document id is written again.
    pub fn purge(&self, doc_id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.docs.remove(doc_id) {
            Some(history) => {
                if let Some(last) = history.last() {
                    inner.feed.remove(&last.sequence);
                }
                true
            }
            None => false,
        }
    }

    /// The winning revision if the document exists and is not deleted
    pub fn get(&self, doc_id: &str) -> Option<DocumentRevision> {
        self.inner
            .read()
            .winning(doc_id)
            .filter(|rev| !rev.deleted)
            .cloned()
    }

    /// Number of live documents
    pub fn document_count(&self) -> usize {
        self.inner
            .read()
            .docs
            .values()
            .filter(|history| history.last().is_some_and(|rev| !rev.deleted))
            .count()
    }
}

impl Datastore for MemoryDatastore {
    fn current_sequence(&self) -> StorageResult<Sequence> {
        Ok(self.inner.read().sequence)
    }

    fn changes_since(&self, since: Sequence, limit: usize) -> StorageResult<Vec<Change>> {
        let inner = self.inner.read();
        let changes = inner
            .feed
            .range(since.saturating_add(1)..)
            .take(limit)
            .filter_map(|(_, doc_id)| inner.winning(doc_id))
            .map(|rev| Change::from(rev.clone()))
            .collect();
        Ok(changes)
    }

    fn get_revision(&self, doc_id: &str, rev_id: &str) -> StorageResult<Option<DocumentRevision>> {
        Ok(self
            .inner
            .read()
            .docs
            .get(doc_id)
            .and_then(|history| history.iter().find(|rev| rev.rev_id == rev_id))
            .cloned())
    }

    fn get_winning_revision(&self, doc_id: &str) -> StorageResult<Option<DocumentRevision>> {
        Ok(self.inner.read().winning(doc_id).cloned())
    }
}

fn current_generation(inner: &Inner, doc_id: &str, prev_rev_id: &str) -> StorageResult<u64> {
    let current = inner
        .winning(doc_id)
        .ok_or_else(|| StorageError::NotFound(doc_id.to_string()))?;

    if current.rev_id != prev_rev_id || current.deleted {
        return Err(StorageError::Conflict {
            doc_id: doc_id.to_string(),
            expected: prev_rev_id.to_string(),
            actual: current.rev_id.clone(),
        });
    }

    Ok(current.generation().unwrap_or(0))
}

fn new_rev_id(generation: u64) -> String {
    format!("{}-{}", generation, Uuid::new_v4().simple())
}

fn validate_document(doc_id: &str, body: &DocumentBody) -> StorageResult<()> {
    if doc_id.is_empty() {
        return Err(StorageError::InvalidDocument("document id is empty".to_string()));
    }
    if let Some(key) = body.keys().find(|k| k.starts_with('_')) {
        return Err(StorageError::InvalidDocument(format!(
            "field names starting with '_' are reserved: {}",
            key
        )));
    }
    Ok(())
}
