//! Storage layer for flyover.
//!
//! This module provides `SQLite`-based persistent storage for flyover events
//! and completed trajectories. [`Storage`] is the production
//! [`FlyoverSink`]; writes are synchronous.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::Station;
use crate::report::AircraftInfo;
use crate::sink::{FlyoverEvent, FlyoverSink, TrajectoryRecord};

const EVENT_COLUMNS: &str = "correlation_id, aircraft_id, timestamp, distance, \
    detection_distance, min_distance_time, rssi, callsign, registration, aircraft_type, description";

const TRAJECTORY_COLUMNS: &str =
    "correlation_id, aircraft_id, path, rssi, alt_geom, min_distance, min_distance_time";

/// Convert feed time (unix seconds) to a UTC timestamp.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn feed_time(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

/// Persistent store of flyover events and trajectories.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember the station this database belongs to.
    ///
    /// Distances in the database are only meaningful for one station, so a
    /// different position than the recorded one is logged and then recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read or written.
    pub fn record_station(&self, station: &Station) -> Result<()> {
        let current = station.to_string();
        match migrations::metadata(&self.conn, migrations::STATION_KEY)? {
            Some(previous) if previous == current => return Ok(()),
            Some(previous) => warn!(
                "station moved from {} to {}, older distances refer to the old position",
                previous, current
            ),
            None => {}
        }
        migrations::set_metadata(&self.conn, migrations::STATION_KEY, &current)
    }

    /// The station recorded by [`record_station`](Self::record_station).
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read or does not parse.
    pub fn station(&self) -> Result<Option<Station>> {
        migrations::metadata(&self.conn, migrations::STATION_KEY)?
            .map(|s| s.parse())
            .transpose()
    }

    /// Insert a flyover event and return its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_event(&self, event: &FlyoverEvent) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO events (correlation_id, aircraft_id, timestamp, distance,
                detection_distance, min_distance_time, rssi, callsign, registration,
                aircraft_type, description, text)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ",
            params![
                event.correlation_id.to_string(),
                event.aircraft_id,
                event.timestamp,
                event.distance,
                event.detection_distance,
                event.min_distance_time,
                event.rssi,
                event.info.callsign,
                event.info.registration,
                event.info.aircraft_type,
                event.info.description,
                event.text(),
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!("Inserted event {} for {}", id, event.aircraft_id);
        Ok(id)
    }

    /// Insert a completed trajectory and return its row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no points, if its correlation id
    /// was already stored, or if the database operation fails.
    pub fn insert_trajectory(&self, record: &TrajectoryRecord) -> Result<i64> {
        let (Some(start), Some(end)) = (record.start_time(), record.end_time()) else {
            return Err(Error::internal(format!(
                "trajectory {} has no points",
                record.correlation_id
            )));
        };

        self.conn.execute(
            r"
            INSERT INTO trajectories (correlation_id, aircraft_id, start_time, end_time,
                points, path, rssi, alt_geom, min_distance, min_distance_time)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                record.correlation_id.to_string(),
                record.aircraft_id,
                start,
                end,
                i64::try_from(record.len()).unwrap_or(i64::MAX),
                serde_json::to_string(&record.path)?,
                serde_json::to_string(&record.rssi)?,
                serde_json::to_string(&record.alt_geom)?,
                record.min_distance,
                record.min_distance_time,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        debug!(
            "Inserted trajectory {} for {} ({} points)",
            id,
            record.aircraft_id,
            record.len()
        );
        Ok(id)
    }

    /// Get the most recent events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<FlyoverEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map([limit_i64], Self::row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Get the events of one aircraft, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn events_for_aircraft(&self, aircraft_id: &str, limit: usize) -> Result<Vec<FlyoverEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE aircraft_id = ?1 \
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;

        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map(
                params![aircraft_id.to_ascii_lowercase(), limit_i64],
                Self::row_to_event,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Get the trajectory with the given correlation id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored series
    /// is not valid JSON.
    pub fn trajectory(&self, correlation_id: Uuid) -> Result<Option<TrajectoryRecord>> {
        let result = self
            .conn
            .query_row(
                &format!("SELECT {TRAJECTORY_COLUMNS} FROM trajectories WHERE correlation_id = ?1"),
                [correlation_id.to_string()],
                Self::row_to_trajectory,
            )
            .optional()?;
        Ok(result)
    }

    /// Count stored events.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_events(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Count stored trajectories.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_trajectories(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM trajectories", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete events and trajectories older than `max_age`.
    ///
    /// Age is measured by feed time: event timestamp, trajectory end time.
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        self.prune_before(Utc::now() - max_age)
    }

    /// Delete events and trajectories from before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff.timestamp_millis() as f64 / 1000.0;

        let events = self
            .conn
            .execute("DELETE FROM events WHERE timestamp < ?1", [cutoff])?;
        let trajectories = self
            .conn
            .execute("DELETE FROM trajectories WHERE end_time < ?1", [cutoff])?;

        let affected = events + trajectories;
        if affected > 0 {
            info!(
                "Pruned {} old events and {} old trajectories",
                events, trajectories
            );
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (oldest, newest): (Option<f64>, Option<f64>) = self.conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let closest_event_m: Option<f64> =
            self.conn
                .query_row("SELECT MIN(distance) FROM events", [], |row| row.get(0))?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_events: self.count_events()?,
            total_trajectories: self.count_trajectories()?,
            oldest_event: oldest.and_then(feed_time),
            newest_event: newest.and_then(feed_time),
            closest_event_m,
            db_size_bytes,
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<FlyoverEvent> {
        Ok(FlyoverEvent {
            correlation_id: uuid_column(row, 0)?,
            aircraft_id: row.get(1)?,
            timestamp: row.get(2)?,
            distance: row.get(3)?,
            detection_distance: row.get(4)?,
            min_distance_time: row.get(5)?,
            rssi: row.get(6)?,
            info: AircraftInfo {
                callsign: row.get(7)?,
                registration: row.get(8)?,
                aircraft_type: row.get(9)?,
                description: row.get(10)?,
            },
        })
    }

    fn row_to_trajectory(row: &Row) -> rusqlite::Result<TrajectoryRecord> {
        Ok(TrajectoryRecord {
            correlation_id: uuid_column(row, 0)?,
            aircraft_id: row.get(1)?,
            path: json_column(row, 2)?,
            rssi: json_column(row, 3)?,
            alt_geom: json_column(row, 4)?,
            min_distance: row.get(5)?,
            min_distance_time: row.get(6)?,
        })
    }
}

fn uuid_column(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FlyoverSink for Storage {
    fn write_event(&mut self, event: &FlyoverEvent) -> Result<()> {
        self.insert_event(event).map(|_| ())
    }

    fn write_trajectory(&mut self, record: &TrajectoryRecord) -> Result<()> {
        self.insert_trajectory(record).map(|_| ())
    }

    fn prune(&mut self, max_age: Duration) -> Result<usize> {
        self.prune_older_than(max_age)
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
    /// Total number of events stored.
    pub total_events: i64,
    /// Total number of trajectories stored.
    pub total_trajectories: i64,
    /// Time of the oldest event.
    pub oldest_event: Option<DateTime<Utc>>,
    /// Time of the newest event.
    pub newest_event: Option<DateTime<Utc>>,
    /// Smallest event distance on record.
    pub closest_event_m: Option<f64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
