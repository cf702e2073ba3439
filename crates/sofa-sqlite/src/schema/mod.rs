//! Schema management and migrations
//!
//! Crates that own tables in the database describe them as an ordered list of
//! [`Migration`]s. Each migration runs once, inside a transaction, and is
//! recorded under its component name so several components can share a file.

use crate::error::{SqliteError, SqliteResult};
use rusqlite::{params, Connection};
use tracing::{debug, info};

const MIGRATIONS_TABLE: &str = "_sofa_schema_migrations";

/// One versioned schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// Apply all pending migrations for `component`
pub fn apply_migrations(
    conn: &mut Connection,
    component: &str,
    migrations: &[Migration],
) -> SqliteResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
            component TEXT NOT NULL,
            version INTEGER NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (component, version)
        );"
    ))?;

    let current_version = get_current_version(conn, component)?;
    let target_version = migrations.iter().map(|m| m.version).max().unwrap_or(0);
    debug!(component, current_version, target_version, "Checking migrations");

    if current_version >= target_version {
        return Ok(());
    }

    info!(
        component,
        from = current_version,
        to = target_version,
        "Applying schema migrations"
    );

    for migration in migrations.iter().filter(|m| m.version > current_version) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            SqliteError::Schema(format!(
                "Failed to apply {} v{} ({}): {}",
                component, migration.version, migration.description, e
            ))
        })?;
        tx.execute(
            &format!("INSERT INTO {MIGRATIONS_TABLE} (component, version) VALUES (?1, ?2)"),
            params![component, migration.version],
        )?;
        tx.commit()?;
        info!(component, version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Get current schema version of a component, 0 if none applied
pub fn get_current_version(conn: &Connection, component: &str) -> SqliteResult<i32> {
    let version: Option<i32> = conn.query_row(
        &format!("SELECT MAX(version) FROM {MIGRATIONS_TABLE} WHERE component = ?1"),
        [component],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

/// Whether a table (or virtual table) with this exact name exists
pub fn table_exists(conn: &Connection, name: &str) -> SqliteResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIGRATIONS: &[Migration] = &[
        Migration {
            version: 1,
            description: "items",
            sql: "CREATE TABLE items (id TEXT PRIMARY KEY);",
        },
        Migration {
            version: 2,
            description: "items.label",
            sql: "ALTER TABLE items ADD COLUMN label TEXT;",
        },
    ];

    #[test]
    fn test_schema_applies_cleanly() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, "test", MIGRATIONS).unwrap();

        assert_eq!(get_current_version(&conn, "test").unwrap(), 2);
        assert!(table_exists(&conn, "items").unwrap());
    }

    #[test]
    fn test_schema_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Apply twice - should not error
        apply_migrations(&mut conn, "test", MIGRATIONS).unwrap();
        apply_migrations(&mut conn, "test", MIGRATIONS).unwrap();

        assert_eq!(get_current_version(&conn, "test").unwrap(), 2);
    }

    #[test]
    fn test_only_pending_steps_run() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, "test", &MIGRATIONS[..1]).unwrap();
        assert_eq!(get_current_version(&conn, "test").unwrap(), 1);

        apply_migrations(&mut conn, "test", MIGRATIONS).unwrap();
        conn.execute("INSERT INTO items (id, label) VALUES ('a', 'b')", [])
            .unwrap();
    }

    #[test]
    fn test_components_are_independent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn, "test", MIGRATIONS).unwrap();
        assert_eq!(get_current_version(&conn, "other").unwrap(), 0);
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let mut conn = Connection::open_in_memory().unwrap();
        let broken = [Migration {
            version: 1,
            description: "broken",
            sql: "CREATE TABLE ok (x); CREATE TABLE;",
        }];

        let err = apply_migrations(&mut conn, "broken", &broken).unwrap_err();
        assert!(matches!(err, SqliteError::Schema(_)));
        assert_eq!(get_current_version(&conn, "broken").unwrap(), 0);
        assert!(!table_exists(&conn, "ok").unwrap());
    }
}
