//! Index manager configuration

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::index::table::DEFAULT_TOKENIZER;
use crate::index::updater::DEFAULT_BATCH_SIZE;

/// Behaviour of an [`IndexManager`](crate::IndexManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexManagerConfig {
    /// Changes applied per transaction while catching an index up
    pub update_batch_size: usize,
    /// Bring every index up to date before answering `find`
    pub update_before_find: bool,
    /// Index existing documents when an index is created. When false a new
    /// index starts at the datastore's current sequence.
    pub backfill_new_indexes: bool,
    /// Tokenizer for text indexes that do not name one
    pub default_tokenizer: String,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        Self {
            update_batch_size: DEFAULT_BATCH_SIZE,
            update_before_find: true,
            backfill_new_indexes: true,
            default_tokenizer: DEFAULT_TOKENIZER.to_string(),
        }
    }
}

impl IndexManagerConfig {
    /// Load from TOML; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> QueryResult<Self> {
        toml::from_str(s).map_err(|e| {
            QueryError::InvalidIndexSettings(format!("invalid index manager config: {}", e))
        })
    }

    #[must_use]
    pub fn with_update_batch_size(mut self, size: usize) -> Self {
        self.update_batch_size = size;
        self
    }

    #[must_use]
    pub fn with_update_before_find(mut self, enabled: bool) -> Self {
        self.update_before_find = enabled;
        self
    }

    #[must_use]
    pub fn with_backfill_new_indexes(mut self, enabled: bool) -> Self {
        self.backfill_new_indexes = enabled;
        self
    }
}
