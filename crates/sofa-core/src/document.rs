//! Document revisions
//!
//! A document is a JSON object identified by `doc_id`. Every write produces a
//! new revision with a fresh `rev_id` of the form `<generation>-<suffix>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::datastore::Sequence;

/// The JSON body of a document revision
pub type DocumentBody = Map<String, Value>;

/// A single revision of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    /// Document identifier, stable across revisions
    pub doc_id: String,

    /// Revision identifier, unique per write
    pub rev_id: String,

    /// Change sequence at which this revision was written
    pub sequence: Sequence,

    /// Tombstone flag; deleted revisions carry an empty body
    #[serde(default)]
    pub deleted: bool,

    /// Document fields
    #[serde(default)]
    pub body: DocumentBody,
}

impl DocumentRevision {
    /// Create a live revision
    pub fn new(
        doc_id: impl Into<String>,
        rev_id: impl Into<String>,
        sequence: Sequence,
        body: DocumentBody,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            sequence,
            deleted: false,
            body,
        }
    }

    /// Create a tombstone revision
    pub fn tombstone(doc_id: impl Into<String>, rev_id: impl Into<String>, sequence: Sequence) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id: rev_id.into(),
            sequence,
            deleted: true,
            body: DocumentBody::new(),
        }
    }

    /// Revision generation, the numeric prefix of `rev_id`
    pub fn generation(&self) -> Option<u64> {
        self.rev_id.split_once('-')?.0.parse().ok()
    }

    /// Look up a field by dotted path (`"address.city"`).
    ///
    /// `_id` and `_rev` resolve to the revision's identifiers.
    pub fn field(&self, path: &str) -> Option<Value> {
        match path {
            "_id" => Some(Value::String(self.doc_id.clone())),
            "_rev" => Some(Value::String(self.rev_id.clone())),
            _ => lookup_path(&self.body, path).cloned(),
        }
    }

    /// Copy of this revision whose body only holds the given top-level fields
    #[must_use]
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> Self {
        let body = fields
            .iter()
            .filter_map(|f| {
                let key = f.as_ref();
                self.body.get(key).map(|v| (key.to_string(), v.clone()))
            })
            .collect();

        Self {
            doc_id: self.doc_id.clone(),
            rev_id: self.rev_id.clone(),
            sequence: self.sequence,
            deleted: self.deleted,
            body,
        }
    }
}

/// Resolve a dotted path against a JSON object
pub fn lookup_path<'a>(body: &'a DocumentBody, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = body.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
