//! File-backed databases: configuration, pragmas and migrations

use sofa_sqlite::schema::{apply_migrations, get_current_version, table_exists};
use sofa_sqlite::{Migration, SqliteConfig, SqliteError, SqlitePool, SqliteResult};
use tempfile::TempDir;

const NOTES: &[Migration] = &[
    Migration {
        version: 1,
        description: "notes",
        sql: "CREATE TABLE notes (id TEXT PRIMARY KEY, text TEXT);",
    },
    Migration {
        version: 2,
        description: "note tags",
        sql: "ALTER TABLE notes ADD COLUMN tag TEXT;",
    },
];

#[test]
fn test_config_from_toml() {
    let config: SqliteConfig = toml::from_str(
        r#"
        path = "/var/lib/sofa/indexes.db"
        wal_mode = false
        busy_timeout_ms = 250
        "#,
    )
    .unwrap();

    assert!(!config.is_memory());
    assert!(!config.wal_mode);
    assert_eq!(config.busy_timeout_ms, 250);
    assert!(config.foreign_keys);
    assert!(config.encryption_key.is_none());
}

#[test]
fn test_wal_mode_on_disk() {
    let dir = TempDir::new().unwrap();
    let pool = SqlitePool::new(SqliteConfig::new(dir.path().join("wal.db"))).unwrap();

    let mode: String = pool
        .with_connection(|conn| conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0)))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let no_wal = SqlitePool::new(
        SqliteConfig::new(dir.path().join("plain.db")).with_wal_mode(false),
    )
    .unwrap();
    let mode: String = no_wal
        .with_connection(|conn| conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0)))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "delete");
}

#[test]
fn test_migrations_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("notes.db");

    {
        let pool = SqlitePool::new(SqliteConfig::new(&path)).unwrap();
        pool.with_connection_mut(|conn| apply_migrations(conn, "notes", &NOTES[..1]))
            .unwrap();
        pool.with_connection(|conn| -> SqliteResult<()> {
            conn.execute("INSERT INTO notes (id, text) VALUES ('a', 'first')", [])?;
            Ok(())
        })
        .unwrap();
    }

    let pool = SqlitePool::new(SqliteConfig::new(&path)).unwrap();
    pool.with_connection_mut(|conn| -> SqliteResult<()> {
        assert_eq!(get_current_version(conn, "notes")?, 1);
        apply_migrations(conn, "notes", NOTES)?;
        assert_eq!(get_current_version(conn, "notes")?, 2);
        // Other components are tracked separately
        assert_eq!(get_current_version(conn, "other")?, 0);
        assert!(table_exists(conn, "notes")?);

        let text: String =
            conn.query_row("SELECT text FROM notes WHERE id = 'a'", [], |row| row.get(0))?;
        assert_eq!(text, "first");
        conn.execute("UPDATE notes SET tag = 'x' WHERE id = 'a'", [])?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_failed_migration_is_rolled_back() {
    let dir = TempDir::new().unwrap();
    let pool = SqlitePool::new(SqliteConfig::new(dir.path().join("broken.db"))).unwrap();
    let broken = [
        NOTES[0],
        Migration {
            version: 2,
            description: "broken",
            sql: "CREATE TABLE half (id TEXT); NOT VALID SQL;",
        },
    ];

    let err = pool
        .with_connection_mut(|conn| apply_migrations(conn, "notes", &broken))
        .unwrap_err();
    assert!(matches!(err, SqliteError::Schema(_)));

    pool.with_connection(|conn| -> SqliteResult<()> {
        assert_eq!(get_current_version(conn, "notes")?, 1);
        assert!(!table_exists(conn, "half")?);
        Ok(())
    })
    .unwrap();
}
