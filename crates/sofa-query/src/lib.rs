//! Incremental secondary indexes and JSON queries for Sofa
//!
//! Indexes project document fields into SQLite tables and follow the
//! datastore's change feed from a per-index checkpoint. Queries are JSON
//! selectors compiled to parameterized SQL over those tables.
//!
//! ## Pipeline
//!
//! ```text
//! Datastore::changes_since ──► updater ──► index tables ◄── render ◄── planner ◄── selector
//!                                                   │
//!                                                   └──► ResultSet ──► Datastore::get_revision
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use sofa_core::MemoryDatastore;
//! use sofa_query::{IndexManager, IndexManagerConfig, Query};
//! use sofa_sqlite::SqliteConfig;
//!
//! let datastore = Arc::new(MemoryDatastore::new());
//! let manager = IndexManager::open(datastore, SqliteConfig::memory(), IndexManagerConfig::default())?;
//! manager.ensure_indexed(&["age"], "age_idx")?;
//!
//! let adults = manager.find(&Query::new(json!({"age": {"$gte": 18}})).limit(10))?;
//! for doc in &adults {
//!     println!("{}", doc?.doc_id);
//! }
//! ```

pub mod config;
pub mod error;
pub mod fragment;
pub mod index;
pub mod manager;
pub mod query;

pub use config::IndexManagerConfig;
pub use error::{QueryError, QueryResult};
pub use fragment::SqlParts;
pub use index::{FieldType, IndexDefinition, IndexField, IndexKind, IndexSpec};
pub use manager::IndexManager;
pub use query::{Query, ResultIter, ResultSet, SortDirection, SortField};
