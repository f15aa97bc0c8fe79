//! Schema versioning for the flyover database.
//!
//! The version lives in the `metadata` table. Opening a database created by
//! an older build runs the missing migrations in order, each in its own
//! transaction.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::SCHEMA_STATEMENTS;

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Key recording the station the database was first used with.
pub const STATION_KEY: &str = "station";

/// Create missing tables and bring the schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if schema creation or a migration fails, or if the
/// database was written by a newer build.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for next in (version + 1)..=CURRENT_VERSION {
        let tx = conn.unchecked_transaction()?;
        run_migration(&tx, next)?;
        set_schema_version(&tx, next)?;
        tx.commit()?;
        info!("database migrated to schema version {next}");
    }

    Ok(())
}

/// Schema version of the database, 0 for a fresh one.
///
/// # Errors
///
/// Returns an error if the stored version is not a number.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    match metadata(conn, VERSION_KEY)? {
        Some(value) => value.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {value}"),
        }),
        None => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    set_metadata(conn, VERSION_KEY, &version.to_string())
}

/// Read a metadata value.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

/// Insert or replace a metadata value.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (key, value),
    )?;
    Ok(())
}

fn run_migration(_conn: &Connection, version: i32) -> Result<()> {
    match version {
        // base schema, created by SCHEMA_STATEMENTS
        1 => Ok(()),
        _ => Err(Error::DatabaseMigration {
            message: format!("unknown migration version: {version}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_initialize_schema_creates_tables() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("failed to initialize schema");

        assert!(table_exists(&conn, "events"));
        assert!(table_exists(&conn, "trajectories"));
        assert!(table_exists(&conn, "metadata"));
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_initialize_schema_idempotent() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("first init failed");
        initialize_schema(&conn).expect("second init failed");
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_fresh_database_has_version_zero() {
        let conn = create_test_db();
        conn.execute(
            "CREATE TABLE metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_metadata_round_trip() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();

        assert!(metadata(&conn, STATION_KEY).unwrap().is_none());
        set_metadata(&conn, STATION_KEY, "8:50:100").unwrap();
        set_metadata(&conn, STATION_KEY, "8.2:50:100").unwrap();
        assert_eq!(
            metadata(&conn, STATION_KEY).unwrap().as_deref(),
            Some("8.2:50:100")
        );
    }

    #[test]
    fn test_garbage_version_is_migration_error() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        set_metadata(&conn, VERSION_KEY, "two").unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(matches!(err, Error::DatabaseMigration { .. }));
    }

    #[test]
    fn test_newer_database_is_refused() {
        let conn = create_test_db();
        initialize_schema(&conn).unwrap();
        set_schema_version(&conn, CURRENT_VERSION + 1).unwrap();

        let err = initialize_schema(&conn).unwrap_err();
        assert!(err.to_string().contains("newer"));
    }

    #[test]
    fn test_run_migration_unknown_version() {
        let conn = create_test_db();
        let err = run_migration(&conn, 999).unwrap_err();
        assert!(err.to_string().contains("unknown migration version"));
    }

    #[test]
    fn test_indexes_created() {
        let conn = create_test_db();
        initialize_schema(&conn).expect("failed to initialize schema");

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.iter().any(|n| n == "idx_events_timestamp"));
        assert!(indexes.iter().any(|n| n == "idx_events_correlation"));
        assert!(indexes.iter().any(|n| n == "idx_trajectories_aircraft"));
        assert!(indexes.iter().any(|n| n == "idx_trajectories_end"));
    }
}
