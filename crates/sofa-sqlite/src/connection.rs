//! SQLite connection management
//!
//! Uses a simple Arc<Mutex<Connection>> pattern. The mutex is the single
//! serializing access point for the database file: each closure passed to
//! the pool runs as one uninterrupted batch of statements.

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thread-safe SQLite connection wrapper
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
    config: SqliteConfig,
}

impl SqlitePool {
    /// Open the database described by `config`
    pub fn new(config: SqliteConfig) -> SqliteResult<Self> {
        info!(path = ?config.path, encrypted = config.encryption_key.is_some(), "Opening SQLite database");

        let conn = if config.is_memory() {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = config.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SqliteError::Connection(format!("Failed to create directory: {}", e))
                })?;
            }
            Connection::open(&config.path)?
        };

        let sqlite_pool = Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        };

        sqlite_pool.initialize()?;

        Ok(sqlite_pool)
    }

    /// Create an in-memory pool for testing
    pub fn memory() -> SqliteResult<Self> {
        Self::new(SqliteConfig::memory())
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Execute a closure with the connection
    ///
    /// Generic over the error type so callers can propagate their own errors
    /// out of the locked section.
    pub fn with_connection<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure with mutable access to the connection
    pub fn with_connection_mut<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Run a closure inside a transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back otherwise. The error
    /// type only needs to absorb rusqlite errors, so callers can use their own.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // Dropping an uncommitted transaction rolls it back
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Whether the linked SQLite can create FTS5 tables
    pub fn fts5_available(&self) -> bool {
        let conn = self.conn.lock();
        probe_fts5(&conn)
    }

    /// Initialize the database (unlock and configure pragmas)
    fn initialize(&self) -> SqliteResult<()> {
        self.with_connection(|conn| {
            // The key must be the first statement on an encrypted connection
            self.unlock(conn)?;
            self.configure_pragmas(conn)?;

            info!("SQLite database initialized successfully");
            Ok(())
        })
    }

    /// Apply the encryption key, then prove the file is readable with it
    fn unlock(&self, conn: &Connection) -> SqliteResult<()> {
        if let Some(key) = &self.config.encryption_key {
            if !cipher_available(conn) {
                return Err(SqliteError::EncryptionKey(
                    "SQLCipher support is not available in this SQLite build".to_string(),
                ));
            }
            conn.execute_batch(&format!("PRAGMA key = {};", key.pragma_literal()))?;
        }

        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| {
            let err = SqliteError::from(e);
            if err.is_not_a_database() {
                warn!(path = ?self.config.path, "Database could not be read with the supplied credential");
                SqliteError::EncryptionKey(format!(
                    "Database could not be opened with the supplied key: {}",
                    err
                ))
            } else {
                err
            }
        })?;

        Ok(())
    }

    /// Configure SQLite PRAGMA settings
    fn configure_pragmas(&self, conn: &Connection) -> SqliteResult<()> {
        debug!("Configuring SQLite pragmas");

        // WAL mode for better concurrency
        if self.config.wal_mode && !self.config.is_memory() {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }

        // Foreign key enforcement
        if self.config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};",
            self.config.busy_timeout_ms
        ))?;

        conn.execute_batch(&format!("PRAGMA cache_size = {};", self.config.cache_size))?;

        if self.config.mmap_size > 0 {
            conn.execute_batch(&format!("PRAGMA mmap_size = {};", self.config.mmap_size))?;
        }

        // Use memory for temp tables
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;

        Ok(())
    }
}

/// SQLCipher answers `PRAGMA cipher_version`; plain SQLite returns no row
fn cipher_available(conn: &Connection) -> bool {
    conn.query_row("PRAGMA cipher_version;", [], |row| row.get::<_, String>(0))
        .optional()
        .ok()
        .flatten()
        .is_some()
}

/// Try to create a throwaway FTS5 table in the temp schema
fn probe_fts5(conn: &Connection) -> bool {
    let created = conn
        .execute_batch("CREATE VIRTUAL TABLE temp._sofa_fts5_probe USING fts5(content);")
        .is_ok();
    if created {
        if let Err(e) = conn.execute_batch("DROP TABLE temp._sofa_fts5_probe;") {
            warn!(error = %e, "Failed to drop FTS5 probe table");
        }
    }
    debug!(available = created, "Probed FTS5 support");
    created
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::{EncryptionKey, KEY_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_memory_pool() {
        let pool = SqlitePool::memory().expect("Failed to create memory pool");

        pool.with_connection(|conn| -> SqliteResult<()> {
            let result: i64 = conn.query_row("SELECT 1 + 1", [], |row| row.get(0))?;
            assert_eq!(result, 2);
            Ok(())
        })
        .expect("Query failed");
    }

    #[test]
    fn test_file_pool() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("test.db");

        let config = SqliteConfig::new(&db_path);
        let pool = SqlitePool::new(config).expect("Failed to create pool");

        // Verify WAL mode is enabled
        pool.with_connection(|conn| -> SqliteResult<()> {
            let mode: String = conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            Ok(())
        })
        .expect("Query failed");
        assert!(db_path.exists());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let pool = SqlitePool::memory().unwrap();
        pool.with_connection(|conn| -> SqliteResult<()> {
            conn.execute_batch("CREATE TABLE t (x INTEGER);")?;
            Ok(())
        })
        .unwrap();

        let result: SqliteResult<()> = pool.with_transaction(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Err(SqliteError::Query("simulated failure".to_string()))
        });
        assert!(result.is_err());

        let committed: SqliteResult<()> = pool.with_transaction(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (2)", [])?;
            Ok(())
        });
        committed.unwrap();

        let values: Vec<i64> = pool
            .with_connection(|conn| -> SqliteResult<Vec<i64>> {
                let mut stmt = conn.prepare("SELECT x FROM t")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<_, _>>()?)
            })
            .unwrap();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn test_fts5_probe_with_bundled_sqlite() {
        let pool = SqlitePool::memory().unwrap();
        assert!(pool.fts5_available());
        // Probe leaves nothing behind
        assert!(pool.fts5_available());
    }

    #[test]
    fn test_key_without_cipher_support_is_rejected() {
        let config = SqliteConfig::memory().with_encryption_key(EncryptionKey::new([3; KEY_SIZE]));
        match SqlitePool::new(config) {
            Err(SqliteError::EncryptionKey(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opening with a key must fail without SQLCipher"),
        }
    }

    #[test]
    fn test_unreadable_file_is_a_key_error() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("garbage.db");
        std::fs::write(&db_path, vec![0x5a; 8192]).unwrap();

        match SqlitePool::new(SqliteConfig::new(&db_path)) {
            Err(SqliteError::EncryptionKey(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("garbage file must not open"),
        }
    }
}
