//! Index manager
//!
//! The handle callers hold: it owns the index database and a reference to the
//! datastore, and every index and query operation goes through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use sofa_core::{Datastore, Sequence};
use sofa_sqlite::{SqliteConfig, SqlitePool};
use tracing::{debug, info};

use crate::config::IndexManagerConfig;
use crate::error::{QueryError, QueryResult};
use crate::index::{
    store, table, updater, validate_index_name, IndexDefinition, IndexKind, IndexSpec,
    INDEX_SCHEMA_VERSION, TOKENIZE_SETTING,
};
use crate::query::{planner, render, selector, Query, ResultSet};

/// Secondary indexes and queries over one datastore
pub struct IndexManager {
    datastore: Arc<dyn Datastore>,
    pool: SqlitePool,
    config: IndexManagerConfig,
    text_search_enabled: bool,
}

impl IndexManager {
    /// Open (or create) the index database described by `sqlite`.
    ///
    /// Fails with `EncryptionKeyError` when the database cannot be read with
    /// the configured key.
    pub fn open(
        datastore: Arc<dyn Datastore>,
        sqlite: SqliteConfig,
        config: IndexManagerConfig,
    ) -> QueryResult<Self> {
        let pool = SqlitePool::new(sqlite)?;
        Self::with_pool(datastore, pool, config)
    }

    /// Use an already opened pool
    pub fn with_pool(
        datastore: Arc<dyn Datastore>,
        pool: SqlitePool,
        config: IndexManagerConfig,
    ) -> QueryResult<Self> {
        pool.with_connection_mut(|conn| {
            sofa_sqlite::schema::apply_migrations(conn, store::SCHEMA_COMPONENT, store::MIGRATIONS)
        })?;
        let text_search_enabled = pool.fts5_available();

        let manager = Self {
            datastore,
            pool,
            config,
            text_search_enabled,
        };
        manager.rebuild_outdated_indexes()?;

        info!(text_search = text_search_enabled, "Index manager ready");
        Ok(manager)
    }

    pub fn config(&self) -> &IndexManagerConfig {
        &self.config
    }

    /// Whether text indexes can be created, fixed at construction
    pub fn is_text_search_enabled(&self) -> bool {
        self.text_search_enabled
    }

    /// Index names mapped to their field lists
    pub fn list_indexes(&self) -> QueryResult<BTreeMap<String, Vec<String>>> {
        let definitions = self.pool.with_connection(|conn| store::list_definitions(conn))?;
        Ok(definitions
            .into_iter()
            .map(|(name, definition)| (name, definition.field_paths()))
            .collect())
    }

    pub fn index_definition(&self, name: &str) -> QueryResult<Option<IndexDefinition>> {
        self.pool.with_connection(|conn| store::get_definition(conn, name))
    }

    /// The sequence an index has caught up to
    pub fn index_sequence(&self, name: &str) -> QueryResult<Option<Sequence>> {
        self.pool.with_connection(|conn| store::last_sequence(conn, name))
    }

    /// Ensure a value index over `fields` exists under `name`
    pub fn ensure_indexed<S: AsRef<str>>(&self, fields: &[S], name: &str) -> QueryResult<String> {
        self.ensure_indexed_with(IndexSpec::value(name, fields))
    }

    /// Ensure an index exists, creating it if needed.
    ///
    /// An identical existing definition is a no-op; a different one under the
    /// same name, or any index whose name differs only by case, is an
    /// `IndexConflict`.
    pub fn ensure_indexed_with(&self, spec: IndexSpec) -> QueryResult<String> {
        let mut spec = spec;
        if spec.kind == IndexKind::Text && !spec.settings.contains_key(TOKENIZE_SETTING) {
            spec.settings.insert(
                TOKENIZE_SETTING.to_string(),
                self.config.default_tokenizer.clone(),
            );
        }
        spec.validate()?;
        if spec.kind == IndexKind::Text && !self.text_search_enabled {
            return Err(QueryError::TextSearchUnavailable);
        }

        let start = if self.config.backfill_new_indexes {
            0
        } else {
            self.datastore.current_sequence()?
        };

        self.pool.with_transaction(|tx| {
            let existing = store::list_definitions(tx)?;
            if let Some(current) = existing.get(&spec.name) {
                if current.matches_spec(&spec) {
                    debug!(index = %spec.name, "Index already exists");
                    return Ok(spec.name.clone());
                }
                return Err(QueryError::IndexConflict(format!(
                    "index '{}' already exists with a different definition",
                    spec.name
                )));
            }
            // Table names are case-insensitive in SQLite
            if let Some(other) = existing
                .keys()
                .find(|name| name.eq_ignore_ascii_case(&spec.name))
            {
                return Err(QueryError::IndexConflict(format!(
                    "index '{}' differs from existing index '{}' only by case",
                    spec.name, other
                )));
            }
            if spec.kind == IndexKind::Text {
                if let Some(text) = existing.values().find(|d| d.kind == IndexKind::Text) {
                    return Err(QueryError::IndexConflict(format!(
                        "text index '{}' already exists",
                        text.name
                    )));
                }
            }

            let definition = IndexDefinition {
                name: spec.name.clone(),
                kind: spec.kind,
                fields: spec.fields.clone(),
                settings: spec.settings.clone(),
                schema_version: INDEX_SCHEMA_VERSION,
                last_sequence: start,
            };
            store::insert_definition(tx, &definition)?;
            table::create_index_table(tx, &definition)?;

            info!(
                index = %definition.name,
                kind = %definition.kind,
                fields = ?definition.field_paths(),
                "Created index"
            );
            Ok(definition.name)
        })
    }

    /// Remove an index definition and its table together
    pub fn delete_index(&self, name: &str) -> QueryResult<()> {
        if validate_index_name(name).is_err() {
            return Err(QueryError::IndexDoesNotExist(name.to_string()));
        }

        self.pool.with_transaction(|tx| {
            if !store::delete_definition(tx, name)? {
                return Err(QueryError::IndexDoesNotExist(name.to_string()));
            }
            table::drop_index_table(tx, name)
        })?;

        info!(index = name, "Deleted index");
        Ok(())
    }

    /// Catch every index up to the datastore's current sequence
    pub fn update_all_indexes(&self) -> QueryResult<()> {
        updater::update_all(
            &self.pool,
            self.datastore.as_ref(),
            self.config.update_batch_size,
        )
    }

    /// Catch one index up, returning the sequence it reached
    pub fn update_index(&self, name: &str) -> QueryResult<Sequence> {
        updater::update_index(
            &self.pool,
            self.datastore.as_ref(),
            name,
            self.config.update_batch_size,
        )?
        .ok_or_else(|| QueryError::IndexDoesNotExist(name.to_string()))
    }

    /// Run a query.
    ///
    /// The query is compiled before any index is updated, so a rejected
    /// query leaves every checkpoint where it was.
    pub fn find(&self, query: &Query) -> QueryResult<ResultSet> {
        let parsed = selector::parse_selector(&query.selector)?;
        query.validate_options()?;

        let definitions = self.pool.with_connection(|conn| store::list_definitions(conn))?;
        let mut plan = planner::plan(&parsed, &definitions, &query.sort)?;
        self.pool.with_connection(|conn| {
            plan.text_searches()
                .into_iter()
                .try_for_each(|(index, search)| table::check_text_search(conn, index, search))
        })?;

        if self.config.update_before_find {
            self.update_all_indexes()?;
            // Field types fixed by the update decide which constants can match
            let definitions = self.pool.with_connection(|conn| store::list_definitions(conn))?;
            plan = planner::plan(&parsed, &definitions, &query.sort)?;
        }

        let statement = render::render(&plan, query.skip, query.limit)?;
        debug!(sql = %statement.sql(), params = statement.params().len(), "Compiled query");

        let rows = self.pool.with_connection(|conn| {
            statement.query_map(conn, |row| Ok((row.get(0)?, row.get(1)?)))
        })?;
        Ok(ResultSet::new(
            Arc::clone(&self.datastore),
            rows,
            query.fields.clone(),
        ))
    }

    /// Run a selector with default options
    pub fn find_selector(&self, selector: Value) -> QueryResult<ResultSet> {
        self.find(&Query::new(selector))
    }

    /// Drop and recreate tables of indexes built under an older layout
    fn rebuild_outdated_indexes(&self) -> QueryResult<()> {
        self.pool.with_transaction(|tx| {
            let outdated = store::list_definitions(tx)?
                .into_values()
                .filter(|d| d.schema_version < INDEX_SCHEMA_VERSION);
            for definition in outdated {
                info!(
                    index = %definition.name,
                    from = definition.schema_version,
                    to = INDEX_SCHEMA_VERSION,
                    "Rebuilding index with outdated layout"
                );
                table::drop_index_table(tx, &definition.name)?;
                table::create_index_table(tx, &definition)?;
                store::reset_for_rebuild(tx, &definition.name, INDEX_SCHEMA_VERSION)?;
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("config", &self.config)
            .field("text_search_enabled", &self.text_search_enabled)
            .finish_non_exhaustive()
    }
}
