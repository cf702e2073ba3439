//! Query results
//!
//! The SQL part of a query runs when the result set is built; documents are
//! fetched from the datastore as the set is iterated, and every iteration
//! starts over from the first row.

use std::fmt;
use std::sync::Arc;

use sofa_core::{Datastore, DocumentRevision};
use tracing::warn;

use crate::error::QueryResult;

/// Matching `(doc id, rev id)` pairs, resolved lazily into documents
pub struct ResultSet {
    datastore: Arc<dyn Datastore>,
    rows: Vec<(String, String)>,
    fields: Option<Vec<String>>,
}

impl ResultSet {
    pub(crate) fn new(
        datastore: Arc<dyn Datastore>,
        rows: Vec<(String, String)>,
        fields: Option<Vec<String>>,
    ) -> Self {
        Self {
            datastore,
            rows,
            fields,
        }
    }

    /// Ids of the matching documents in result order
    pub fn document_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|(doc_id, _)| doc_id.as_str()).collect()
    }

    /// Number of matching index rows.
    ///
    /// Revisions that have disappeared from the datastore since they were
    /// indexed are counted here but skipped during iteration.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over the documents, fetching each from the datastore
    pub fn iter(&self) -> ResultIter<'_> {
        ResultIter {
            set: self,
            position: 0,
        }
    }

    /// Resolve every document, stopping at the first datastore failure
    pub fn documents(&self) -> QueryResult<Vec<DocumentRevision>> {
        self.iter().collect()
    }

    fn resolve(&self, doc_id: &str, rev_id: &str) -> QueryResult<Option<DocumentRevision>> {
        match self.datastore.get_revision(doc_id, rev_id)? {
            Some(revision) if !revision.deleted => Ok(Some(match &self.fields {
                Some(fields) => revision.project(fields),
                None => revision,
            })),
            _ => {
                warn!(doc_id, rev_id, "Skipping result whose revision is no longer available");
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("rows", &self.rows)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// Iterator over a [`ResultSet`]
pub struct ResultIter<'a> {
    set: &'a ResultSet,
    position: usize,
}

impl Iterator for ResultIter<'_> {
    type Item = QueryResult<DocumentRevision>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((doc_id, rev_id)) = self.set.rows.get(self.position) {
            self.position += 1;
            match self.set.resolve(doc_id, rev_id) {
                Ok(Some(revision)) => return Some(Ok(revision)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.set.rows.len() - self.position))
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = QueryResult<DocumentRevision>;
    type IntoIter = ResultIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sofa_core::MemoryDatastore;

    fn body(value: serde_json::Value) -> sofa_core::DocumentBody {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_iteration_resolves_and_restarts() {
        let ds = Arc::new(MemoryDatastore::new());
        let a = ds.create("a", body(json!({"name": "mike", "age": 3}))).unwrap();
        let b = ds.create("b", body(json!({"name": "fred"}))).unwrap();

        let set = ResultSet::new(
            ds.clone(),
            vec![
                ("a".to_string(), a.rev_id.clone()),
                ("b".to_string(), b.rev_id.clone()),
            ],
            None,
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.document_ids(), vec!["a", "b"]);

        let first: Vec<String> = set.iter().map(|r| r.unwrap().doc_id).collect();
        let second: Vec<String> = (&set).into_iter().map(|r| r.unwrap().doc_id).collect();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stale_rows_are_skipped() {
        let ds = Arc::new(MemoryDatastore::new());
        let a = ds.create("a", body(json!({"name": "mike"}))).unwrap();
        let b = ds.create("b", body(json!({"name": "fred"}))).unwrap();
        let c = ds.create("c", body(json!({"name": "jim"}))).unwrap();
        // Indexed at its tombstone, and purged outright
        let b = ds.delete("b", &b.rev_id).unwrap();
        ds.purge("c");

        let set = ResultSet::new(
            ds.clone(),
            vec![
                ("a".to_string(), a.rev_id),
                ("b".to_string(), b.rev_id),
                ("c".to_string(), c.rev_id),
                ("zzz".to_string(), "1-x".to_string()),
            ],
            None,
        );
        let docs = set.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "a");
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_projection_keeps_requested_fields() {
        let ds = Arc::new(MemoryDatastore::new());
        let a = ds
            .create("a", body(json!({"name": "mike", "age": 3, "pet": "cat"})))
            .unwrap();

        let set = ResultSet::new(
            ds,
            vec![("a".to_string(), a.rev_id.clone())],
            Some(vec!["name".to_string(), "missing".to_string()]),
        );
        let docs = set.documents().unwrap();
        assert_eq!(docs[0].body, body(json!({"name": "mike"})));
        assert_eq!(docs[0].rev_id, a.rev_id);
    }
}
