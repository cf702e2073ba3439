//! Index definition store
//!
//! One metadata row per (index, field). Kind, settings, schema version and the
//! checkpoint are repeated on every row of an index and always written
//! together, so the rows of one index never disagree.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use sofa_core::Sequence;
use sofa_sqlite::Migration;

use super::{FieldType, IndexDefinition, IndexField, IndexKind};
use crate::error::{QueryError, QueryResult};

/// Component name under which the metadata schema is migrated
pub const SCHEMA_COMPONENT: &str = "sofa-query";

pub const METADATA_TABLE: &str = "_sofa_query_metadata";

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "index metadata",
    sql: r#"
CREATE TABLE IF NOT EXISTS _sofa_query_metadata (
    index_name TEXT NOT NULL,
    index_type TEXT NOT NULL,
    index_settings TEXT NOT NULL DEFAULT '{}',
    field_name TEXT NOT NULL,
    field_type TEXT,
    position INTEGER NOT NULL,
    schema_version INTEGER NOT NULL,
    last_sequence INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (index_name, field_name)
);
"#,
}];

struct MetadataRow {
    index_name: String,
    index_type: String,
    index_settings: String,
    field_name: String,
    field_type: Option<String>,
    schema_version: i64,
    last_sequence: Sequence,
}

/// All definitions, keyed by index name
pub fn list_definitions(conn: &Connection) -> QueryResult<BTreeMap<String, IndexDefinition>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT index_name, index_type, index_settings, field_name, field_type,
               schema_version, last_sequence
        FROM _sofa_query_metadata
        ORDER BY index_name, position
        "#,
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(MetadataRow {
                index_name: row.get(0)?,
                index_type: row.get(1)?,
                index_settings: row.get(2)?,
                field_name: row.get(3)?,
                field_type: row.get(4)?,
                schema_version: row.get(5)?,
                last_sequence: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut definitions: BTreeMap<String, IndexDefinition> = BTreeMap::new();
    for row in rows {
        let field_type = row
            .field_type
            .as_deref()
            .map(str::parse::<FieldType>)
            .transpose()?;
        let field = IndexField {
            path: row.field_name,
            field_type,
        };

        match definitions.get_mut(&row.index_name) {
            Some(definition) => definition.fields.push(field),
            None => {
                let settings: BTreeMap<String, String> = serde_json::from_str(&row.index_settings)
                    .map_err(|e| {
                        QueryError::SqlError(format!(
                            "corrupt settings for index '{}': {}",
                            row.index_name, e
                        ))
                    })?;
                definitions.insert(
                    row.index_name.clone(),
                    IndexDefinition {
                        name: row.index_name,
                        kind: row.index_type.parse::<IndexKind>()?,
                        fields: vec![field],
                        settings,
                        schema_version: row.schema_version,
                        last_sequence: row.last_sequence,
                    },
                );
            }
        }
    }

    Ok(definitions)
}

/// A single definition by name
pub fn get_definition(conn: &Connection, name: &str) -> QueryResult<Option<IndexDefinition>> {
    Ok(list_definitions(conn)?.remove(name))
}

/// Persist a new definition, one row per field
pub fn insert_definition(conn: &Connection, definition: &IndexDefinition) -> QueryResult<()> {
    let settings = serde_json::to_string(&definition.settings)
        .map_err(|e| QueryError::InvalidIndexSettings(e.to_string()))?;

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO _sofa_query_metadata
            (index_name, index_type, index_settings, field_name, field_type,
             position, schema_version, last_sequence)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )?;

    for (position, field) in definition.fields.iter().enumerate() {
        stmt.execute(params![
            definition.name,
            definition.kind.as_str(),
            settings,
            field.path,
            field.field_type.map(|t| t.as_str()),
            position as i64,
            definition.schema_version,
            definition.last_sequence,
        ])?;
    }

    Ok(())
}

/// Remove a definition; returns whether it existed
pub fn delete_definition(conn: &Connection, name: &str) -> QueryResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM _sofa_query_metadata WHERE index_name = ?1",
        [name],
    )?;
    Ok(deleted > 0)
}

/// The checkpoint of an index, `None` if the index does not exist
pub fn last_sequence(conn: &Connection, name: &str) -> QueryResult<Option<Sequence>> {
    let sequence = conn
        .query_row(
            "SELECT last_sequence FROM _sofa_query_metadata WHERE index_name = ?1 LIMIT 1",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sequence)
}

pub fn set_last_sequence(conn: &Connection, name: &str, sequence: Sequence) -> QueryResult<()> {
    conn.execute(
        "UPDATE _sofa_query_metadata SET last_sequence = ?2 WHERE index_name = ?1",
        params![name, sequence],
    )?;
    Ok(())
}

/// Record the type first observed for a field
pub fn set_field_type(
    conn: &Connection,
    name: &str,
    path: &str,
    field_type: FieldType,
) -> QueryResult<()> {
    conn.execute(
        r#"
        UPDATE _sofa_query_metadata SET field_type = ?3
        WHERE index_name = ?1 AND field_name = ?2 AND field_type IS NULL
        "#,
        params![name, path, field_type.as_str()],
    )?;
    Ok(())
}

/// Mark an index for a full rebuild at the given schema version
pub fn reset_for_rebuild(conn: &Connection, name: &str, schema_version: i64) -> QueryResult<()> {
    conn.execute(
        r#"
        UPDATE _sofa_query_metadata SET last_sequence = 0, schema_version = ?2
        WHERE index_name = ?1
        "#,
        params![name, schema_version],
    )?;
    Ok(())
}
