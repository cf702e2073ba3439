//! Shared fixtures for sofa-query integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use sofa_core::{DocumentBody, DocumentRevision, MemoryDatastore};
use sofa_query::{IndexManager, IndexManagerConfig, ResultSet};
use sofa_sqlite::{SqliteConfig, SqlitePool};

/// Route library logs to the test harness output, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn body(value: Value) -> DocumentBody {
    value
        .as_object()
        .cloned()
        .expect("fixture bodies are objects")
}

pub fn manager() -> (Arc<MemoryDatastore>, IndexManager) {
    manager_with(IndexManagerConfig::default())
}

pub fn manager_with(config: IndexManagerConfig) -> (Arc<MemoryDatastore>, IndexManager) {
    let datastore = Arc::new(MemoryDatastore::new());
    let manager = IndexManager::open(datastore.clone(), SqliteConfig::memory(), config)
        .expect("open in-memory index manager");
    (datastore, manager)
}

/// Manager plus a handle on its pool for inspecting index tables
pub fn manager_with_pool() -> (Arc<MemoryDatastore>, SqlitePool, IndexManager) {
    let datastore = Arc::new(MemoryDatastore::new());
    let pool = SqlitePool::memory().expect("open in-memory pool");
    let manager =
        IndexManager::with_pool(datastore.clone(), pool.clone(), IndexManagerConfig::default())
            .expect("open index manager");
    (datastore, pool, manager)
}

/// The people fixture: ages, names and a pet field that is sometimes an array
pub fn add_people(datastore: &MemoryDatastore) -> Vec<DocumentRevision> {
    [
        ("mike", serde_json::json!({"name": "mike", "age": 12, "pet": ["cat", "dog"]})),
        ("fred", serde_json::json!({"name": "fred", "age": 34, "pet": "parrot"})),
        ("alice", serde_json::json!({"name": "alice", "age": 41, "pet": ["cat"]})),
        ("bob", serde_json::json!({"name": "bob", "age": 30})),
        ("zed", serde_json::json!({"name": "zed"})),
    ]
    .into_iter()
    .map(|(id, doc)| datastore.create(id, body(doc)).expect("create fixture document"))
    .collect()
}

/// Resolved document ids, in result order
pub fn ids(results: &ResultSet) -> Vec<String> {
    results
        .iter()
        .map(|doc| doc.expect("resolve document").doc_id)
        .collect()
}
