//! `SQLite` schema definitions for flyover.
//!
//! Timestamps are feed time in unix seconds (`REAL`). Paths and the per-point
//! series of a trajectory are stored as JSON arrays.

/// SQL statement to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL,
    aircraft_id TEXT NOT NULL,
    timestamp REAL NOT NULL,
    distance REAL NOT NULL,
    detection_distance REAL NOT NULL,
    min_distance_time REAL,
    rssi REAL NOT NULL,
    callsign TEXT,
    registration TEXT,
    aircraft_type TEXT,
    description TEXT,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the trajectories table.
pub const CREATE_TRAJECTORIES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trajectories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    correlation_id TEXT NOT NULL UNIQUE,
    aircraft_id TEXT NOT NULL,
    start_time REAL NOT NULL,
    end_time REAL NOT NULL,
    points INTEGER NOT NULL,
    path TEXT NOT NULL,
    rssi TEXT NOT NULL,
    alt_geom TEXT NOT NULL,
    min_distance REAL NOT NULL,
    min_distance_time REAL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// Index on event time for recent-first listings and pruning.
pub const CREATE_EVENTS_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp DESC)
";

/// Index on the correlation id to join events with trajectories.
pub const CREATE_EVENTS_CORRELATION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id)
";

/// Index on the aircraft id for per-aircraft lookups.
pub const CREATE_TRAJECTORIES_AIRCRAFT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trajectories_aircraft ON trajectories(aircraft_id)
";

/// Index on trajectory end time for pruning.
pub const CREATE_TRAJECTORIES_END_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trajectories_end ON trajectories(end_time)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_EVENTS_TABLE,
    CREATE_TRAJECTORIES_TABLE,
    CREATE_EVENTS_TIMESTAMP_INDEX,
    CREATE_EVENTS_CORRELATION_INDEX,
    CREATE_TRAJECTORIES_AIRCRAFT_INDEX,
    CREATE_TRAJECTORIES_END_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_events_table_columns() {
        assert!(CREATE_EVENTS_TABLE.contains("correlation_id TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("aircraft_id TEXT NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("distance REAL NOT NULL"));
        assert!(CREATE_EVENTS_TABLE.contains("text TEXT NOT NULL"));
    }

    #[test]
    fn test_trajectories_table_columns() {
        assert!(CREATE_TRAJECTORIES_TABLE.contains("correlation_id TEXT NOT NULL UNIQUE"));
        assert!(CREATE_TRAJECTORIES_TABLE.contains("path TEXT NOT NULL"));
        assert!(CREATE_TRAJECTORIES_TABLE.contains("alt_geom TEXT NOT NULL"));
        assert!(CREATE_TRAJECTORIES_TABLE.contains("min_distance_time REAL"));
    }
}
