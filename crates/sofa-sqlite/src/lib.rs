//! SQLite access point for Sofa
//!
//! Every physical database file is reached through one [`SqlitePool`]. The
//! pool owns a single connection behind a mutex, so DDL, index updates and
//! queries against the same file never interleave their statements.
//!
//! ## Features
//!
//! - **Serialized access**: `with_connection` / `with_transaction` closures
//! - **Migrations**: versioned schema steps recorded in `_sofa_schema_migrations`
//! - **Encryption**: an opaque [`EncryptionKey`] unlocks SQLCipher databases
//! - **Capabilities**: FTS5 availability probe for text indexes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sofa_sqlite::{SqliteConfig, SqlitePool};
//!
//! let pool = SqlitePool::new(SqliteConfig::new("./indexes.db"))?;
//! let count: i64 = pool.with_connection(|conn| {
//!     Ok(conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))?)
//! })?;
//! ```

pub mod config;
pub mod connection;
pub mod encryption;
pub mod error;
pub mod schema;

// Re-exports
pub use config::SqliteConfig;
pub use connection::SqlitePool;
pub use encryption::EncryptionKey;
pub use error::{SqliteError, SqliteResult};
pub use schema::Migration;
