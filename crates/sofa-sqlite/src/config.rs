//! SQLite connection configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encryption::EncryptionKey;

const MEMORY_PATH: &str = ":memory:";

/// Configuration for opening a [`SqlitePool`](crate::SqlitePool)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    /// Enable write-ahead logging (ignored for in-memory databases)
    pub wal_mode: bool,
    pub foreign_keys: bool,
    pub busy_timeout_ms: u32,
    /// Page cache size; negative values are KiB, as in `PRAGMA cache_size`
    pub cache_size: i64,
    /// Memory-mapped I/O size in bytes, 0 disables
    pub mmap_size: u64,
    /// Unlock credential for encrypted databases. Never serialized.
    #[serde(skip)]
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout_ms: 5000,
            cache_size: -8000,
            mmap_size: 0,
            encryption_key: None,
        }
    }
}

impl SqliteConfig {
    /// Configuration for a database file at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Configuration for a private in-memory database
    pub fn memory() -> Self {
        Self::default()
    }

    /// Whether this configuration targets an in-memory database
    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(MEMORY_PATH)
    }

    #[must_use]
    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    #[must_use]
    pub fn with_busy_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }
}
