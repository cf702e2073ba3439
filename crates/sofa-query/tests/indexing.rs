//! Index lifecycle integration tests
//!
//! Creation, incremental updates, checkpoints and on-disk persistence.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{add_people, body, ids, manager, manager_with_pool};
use rusqlite::Connection;
use serde_json::json;
use sofa_core::{
    Change, Datastore, DocumentRevision, MemoryDatastore, Sequence, StorageError, StorageResult,
};
use sofa_query::{IndexManager, IndexManagerConfig, QueryError};
use sofa_sqlite::{EncryptionKey, SqliteConfig, SqlitePool};
use test_case::test_case;

fn row_count(pool: &SqlitePool, index: &str) -> i64 {
    pool.with_connection(|conn| {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM \"_sofa_query_index_{}\"", index),
            [],
            |row| row.get(0),
        )
    })
    .expect("count index rows")
}

#[test]
fn test_reindexing_is_idempotent() -> anyhow::Result<()> {
    let (ds, pool, manager) = manager_with_pool();
    add_people(&ds);
    manager.ensure_indexed(&["name"], "names")?;

    assert_eq!(manager.update_index("names")?, 5);
    assert_eq!(row_count(&pool, "names"), 5);

    // Nothing changed, so nothing moves
    assert_eq!(manager.update_index("names")?, 5);
    assert_eq!(row_count(&pool, "names"), 5);

    // Recreating the same definition keeps the existing table and checkpoint
    manager.ensure_indexed(&["name"], "names")?;
    assert_eq!(manager.index_sequence("names")?, Some(5));
    assert_eq!(row_count(&pool, "names"), 5);
    Ok(())
}

#[test]
fn test_array_fields_expand_to_one_row_per_element() -> anyhow::Result<()> {
    let (ds, pool, manager) = manager_with_pool();
    add_people(&ds);
    manager.ensure_indexed(&["pet"], "pets")?;
    manager.update_all_indexes()?;

    // mike 2, fred 1, alice 1, bob and zed one NULL row each
    assert_eq!(row_count(&pool, "pets"), 6);
    Ok(())
}

#[test]
fn test_updated_documents_replace_their_rows() -> anyhow::Result<()> {
    let (ds, pool, manager) = manager_with_pool();
    let people = add_people(&ds);
    manager.ensure_indexed(&["pet"], "pets")?;
    manager.update_all_indexes()?;

    ds.update("mike", &people[0].rev_id, body(json!({"name": "mike", "pet": "hamster"})))?;
    manager.update_all_indexes()?;
    assert_eq!(row_count(&pool, "pets"), 5);
    assert_eq!(ids(&manager.find_selector(json!({"pet": "hamster"}))?), vec!["mike"]);
    assert!(ids(&manager.find_selector(json!({"pet": "dog"}))?).is_empty());

    let deleted = ds.delete("fred", &people[1].rev_id)?;
    manager.update_all_indexes()?;
    assert_eq!(row_count(&pool, "pets"), 4);

    // Recreating the deleted document indexes it again
    let recreated = ds.create("fred", body(json!({"name": "fred", "pet": "cat"})))?;
    assert!(recreated.generation() > deleted.generation());
    assert_eq!(ids(&manager.find_selector(json!({"pet": "cat"}))?), vec!["alice", "fred"]);
    Ok(())
}

#[test]
fn test_index_created_without_backfill_skips_existing_documents() -> anyhow::Result<()> {
    let (ds, manager) = common::manager_with(
        IndexManagerConfig::default().with_backfill_new_indexes(false),
    );
    add_people(&ds);
    manager.ensure_indexed(&["name"], "names")?;
    assert_eq!(manager.index_sequence("names")?, Some(5));

    ds.create("newcomer", body(json!({"name": "newcomer"})))?;
    assert_eq!(ids(&manager.find_selector(json!({}))?), vec!["newcomer"]);
    Ok(())
}

#[test_case("1bad" ; "leading digit")]
#[test_case("bad-name" ; "dash")]
#[test_case("" ; "empty")]
#[test_case("has space" ; "space")]
fn test_invalid_index_names(name: &str) {
    let (_, manager) = manager();
    assert!(matches!(
        manager.ensure_indexed(&["name"], name),
        Err(QueryError::InvalidIndexName(_))
    ));
    assert!(manager.list_indexes().unwrap().is_empty());
}

#[test_case("ok_name2" ; "letters digits underscore")]
#[test_case("Names" ; "capitalised")]
fn test_valid_index_names(name: &str) {
    let (_, manager) = manager();
    assert_eq!(manager.ensure_indexed(&["name"], name).unwrap(), name);
    assert!(manager.list_indexes().unwrap().contains_key(name));
}

#[test]
fn test_names_ending_like_helper_indexes() -> anyhow::Result<()> {
    let (ds, manager) = manager();
    add_people(&ds);
    manager.ensure_indexed(&["name"], "a")?;
    manager.ensure_indexed(&["age"], "a_id")?;
    manager.ensure_indexed(&["pet"], "a_fields")?;

    assert_eq!(manager.list_indexes()?.len(), 3);
    assert_eq!(ids(&manager.find_selector(json!({"age": 30}))?), vec!["bob"]);
    assert_eq!(ids(&manager.find_selector(json!({"pet": "parrot"}))?), vec!["fred"]);
    Ok(())
}

#[test]
fn test_names_differing_only_by_case_conflict() -> anyhow::Result<()> {
    let (_, manager) = manager();
    manager.ensure_indexed(&["name"], "names")?;
    assert!(matches!(
        manager.ensure_indexed(&["age"], "Names"),
        Err(QueryError::IndexConflict(_))
    ));
    assert_eq!(manager.list_indexes()?.keys().collect::<Vec<_>>(), vec!["names"]);
    Ok(())
}

#[test]
fn test_fields_differing_only_by_case_are_separate_columns() -> anyhow::Result<()> {
    let (ds, manager) = manager();
    ds.create("lower", body(json!({"name": "x", "Name": "y"})))?;
    ds.create("upper", body(json!({"name": "y", "Name": "x"})))?;
    manager.ensure_indexed(&["name", "Name"], "both")?;

    assert_eq!(ids(&manager.find_selector(json!({"name": "x"}))?), vec!["lower"]);
    assert_eq!(ids(&manager.find_selector(json!({"Name": "x"}))?), vec!["upper"]);
    assert_eq!(
        ids(&manager.find_selector(json!({"name": "y", "Name": "x"}))?),
        vec!["upper"]
    );
    Ok(())
}

/// A datastore whose change feed can be switched off mid-update
struct SwitchableDatastore {
    inner: MemoryDatastore,
    feed_online: AtomicBool,
    fail_after_first_batch: AtomicBool,
}

impl Datastore for SwitchableDatastore {
    fn current_sequence(&self) -> StorageResult<Sequence> {
        self.inner.current_sequence()
    }

    fn changes_since(&self, since: Sequence, limit: usize) -> StorageResult<Vec<Change>> {
        if !self.feed_online.load(Ordering::SeqCst) {
            return Err(StorageError::backend("feed offline"));
        }
        if self.fail_after_first_batch.swap(false, Ordering::SeqCst) {
            self.feed_online.store(false, Ordering::SeqCst);
        }
        self.inner.changes_since(since, limit)
    }

    fn get_revision(&self, doc_id: &str, rev_id: &str) -> StorageResult<Option<DocumentRevision>> {
        self.inner.get_revision(doc_id, rev_id)
    }

    fn get_winning_revision(&self, doc_id: &str) -> StorageResult<Option<DocumentRevision>> {
        self.inner.get_winning_revision(doc_id)
    }
}

#[test]
fn test_failed_update_keeps_committed_batches() -> anyhow::Result<()> {
    let ds = Arc::new(SwitchableDatastore {
        inner: MemoryDatastore::new(),
        feed_online: AtomicBool::new(true),
        fail_after_first_batch: AtomicBool::new(false),
    });
    add_people(&ds.inner);
    let manager = IndexManager::open(
        ds.clone(),
        SqliteConfig::memory(),
        IndexManagerConfig::default()
            .with_update_batch_size(2)
            .with_update_before_find(false),
    )?;
    manager.ensure_indexed(&["name"], "names")?;

    ds.fail_after_first_batch.store(true, Ordering::SeqCst);
    assert!(matches!(
        manager.update_index("names"),
        Err(QueryError::Datastore(_))
    ));
    assert_eq!(manager.index_sequence("names")?, Some(2));
    assert_eq!(ids(&manager.find_selector(json!({}))?), vec!["fred", "mike"]);

    ds.feed_online.store(true, Ordering::SeqCst);
    assert_eq!(manager.update_index("names")?, 5);
    assert_eq!(manager.find_selector(json!({}))?.len(), 5);
    Ok(())
}

#[test]
fn test_indexes_persist_on_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("indexes.db");
    let ds = Arc::new(MemoryDatastore::new());
    add_people(&ds);

    {
        let manager =
            IndexManager::open(ds.clone(), SqliteConfig::new(&path), IndexManagerConfig::default())?;
        manager.ensure_indexed(&["age"], "ages")?;
        manager.update_all_indexes()?;
    }

    let reopened = IndexManager::open(ds.clone(), SqliteConfig::new(&path), IndexManagerConfig::default())?;
    assert_eq!(reopened.index_sequence("ages")?, Some(5));
    assert_eq!(
        reopened.list_indexes()?.get("ages"),
        Some(&vec!["age".to_string()])
    );
    let definition = reopened.index_definition("ages")?.expect("ages index");
    assert_eq!(
        definition.field("age").and_then(|f| f.field_type).map(|t| t.as_str()),
        Some("number")
    );
    assert_eq!(ids(&reopened.find_selector(json!({"age": {"$lt": 20}}))?), vec!["mike"]);
    Ok(())
}

#[test]
fn test_outdated_index_layout_is_rebuilt_on_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("indexes.db");
    let ds = Arc::new(MemoryDatastore::new());
    add_people(&ds);

    {
        let manager =
            IndexManager::open(ds.clone(), SqliteConfig::new(&path), IndexManagerConfig::default())?;
        manager.ensure_indexed(&["name"], "names")?;
        manager.update_all_indexes()?;
    }

    {
        let conn = Connection::open(&path)?;
        conn.execute("UPDATE _sofa_query_metadata SET schema_version = 0", [])?;
    }

    let pool = SqlitePool::new(SqliteConfig::new(&path))?;
    let manager = IndexManager::with_pool(
        ds.clone(),
        pool.clone(),
        IndexManagerConfig::default().with_update_before_find(false),
    )?;
    assert_eq!(manager.index_sequence("names")?, Some(0));
    assert_eq!(row_count(&pool, "names"), 0);

    manager.update_all_indexes()?;
    assert_eq!(row_count(&pool, "names"), 5);
    Ok(())
}

#[test]
fn test_encryption_key_needs_sqlcipher() {
    let dir = tempfile::tempdir().unwrap();
    let config = SqliteConfig::new(dir.path().join("secret.db"))
        .with_encryption_key(EncryptionKey::new([7u8; 32]));

    let result = IndexManager::open(
        Arc::new(MemoryDatastore::new()),
        config,
        IndexManagerConfig::default(),
    );
    assert!(matches!(result, Err(QueryError::EncryptionKeyError(_))));
}

#[test]
fn test_deleted_index_is_gone() -> anyhow::Result<()> {
    let (ds, pool, manager) = manager_with_pool();
    add_people(&ds);
    manager.ensure_indexed(&["name"], "names")?;
    manager.delete_index("names")?;

    assert!(manager.list_indexes()?.is_empty());
    let table_left: i64 = pool.with_connection(|conn| {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name GLOB '_sofa_query_*names'",
            [],
            |row| row.get(0),
        )
    })?;
    assert_eq!(table_left, 0);
    assert!(matches!(
        manager.find_selector(json!({"name": "mike"})),
        Err(QueryError::NoSuitableIndex(_))
    ));
    assert!(matches!(
        manager.delete_index("names"),
        Err(QueryError::IndexDoesNotExist(_))
    ));
    Ok(())
}
