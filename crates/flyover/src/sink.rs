//! Persistence boundary of the detector.
//!
//! The detector produces two kinds of records: a [`FlyoverEvent`] when an
//! aircraft is found receding from its closest approach, and a
//! [`TrajectoryRecord`] when a completed track is dumped. Both are handed to a
//! [`FlyoverSink`]. Writes are fire-and-forget from the detector's point of
//! view: a failing write is logged by the caller and never rolls back state.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::report::AircraftInfo;

/// A detected flyover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlyoverEvent {
    /// Aircraft address.
    pub aircraft_id: String,
    /// Links the event to the trajectory record written later.
    pub correlation_id: Uuid,
    /// Closest slant distance of the pass in meters.
    pub distance: f64,
    /// Slant distance of the report that triggered the detection.
    pub detection_distance: f64,
    /// When the closest distance was seen (unix seconds).
    pub min_distance_time: Option<f64>,
    /// Time of the report that triggered the event (unix seconds).
    pub timestamp: f64,
    /// Signal strength of the triggering report.
    pub rssi: f64,
    /// Descriptive fields known at detection time.
    pub info: AircraftInfo,
}

impl FlyoverEvent {
    /// Short label, e.g. `"1034 m"`.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{:.0} m", self.distance)
    }
}

/// A completed trajectory.
///
/// `path`, `rssi` and `alt_geom` are parallel: index `i` of each belongs to the
/// same report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    /// Same id as the matching [`FlyoverEvent`], if one was written.
    pub correlation_id: Uuid,
    /// Aircraft address.
    pub aircraft_id: String,
    /// `[lon, lat, baro altitude (m), timestamp]` per accepted report.
    pub path: Vec<[f64; 4]>,
    /// Signal strength per accepted report.
    pub rssi: Vec<f64>,
    /// Geometric altitude (m) per accepted report.
    pub alt_geom: Vec<Option<f64>>,
    /// Smallest slant distance in meters.
    pub min_distance: f64,
    /// When the smallest distance was seen.
    pub min_distance_time: Option<f64>,
}

impl TrajectoryRecord {
    /// Number of points in the path.
    #[must_use]
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Check if the path is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Timestamp of the first point.
    #[must_use]
    pub fn start_time(&self) -> Option<f64> {
        self.path.first().map(|p| p[3])
    }

    /// Timestamp of the last point.
    #[must_use]
    pub fn end_time(&self) -> Option<f64> {
        self.path.last().map(|p| p[3])
    }
}

/// Destination for detector output.
pub trait FlyoverSink {
    /// Persist a flyover event.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    fn write_event(&mut self, event: &FlyoverEvent) -> Result<()>;

    /// Persist a completed trajectory.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be stored.
    fn write_trajectory(&mut self, record: &TrajectoryRecord) -> Result<()>;

    /// Drop records older than `max_age` and return how many were removed.
    ///
    /// Sinks without retention keep everything.
    ///
    /// # Errors
    ///
    /// Returns an error if old records could not be removed.
    fn prune(&mut self, max_age: Duration) -> Result<usize> {
        let _ = max_age;
        Ok(0)
    }
}

impl<S: FlyoverSink + ?Sized> FlyoverSink for &mut S {
    fn write_event(&mut self, event: &FlyoverEvent) -> Result<()> {
        (**self).write_event(event)
    }

    fn write_trajectory(&mut self, record: &TrajectoryRecord) -> Result<()> {
        (**self).write_trajectory(record)
    }

    fn prune(&mut self, max_age: Duration) -> Result<usize> {
        (**self).prune(max_age)
    }
}

impl<S: FlyoverSink + ?Sized> FlyoverSink for Box<S> {
    fn write_event(&mut self, event: &FlyoverEvent) -> Result<()> {
        (**self).write_event(event)
    }

    fn write_trajectory(&mut self, record: &TrajectoryRecord) -> Result<()> {
        (**self).write_trajectory(record)
    }

    fn prune(&mut self, max_age: Duration) -> Result<usize> {
        (**self).prune(max_age)
    }
}

/// Keeps all records in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Events in write order.
    pub events: Vec<FlyoverEvent>,
    /// Trajectories in write order.
    pub trajectories: Vec<TrajectoryRecord>,
    failing: bool,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that rejects every write.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            Err(Error::internal("sink unavailable"))
        } else {
            Ok(())
        }
    }
}

impl FlyoverSink for MemorySink {
    fn write_event(&mut self, event: &FlyoverEvent) -> Result<()> {
        self.check()?;
        self.events.push(event.clone());
        Ok(())
    }

    fn write_trajectory(&mut self, record: &TrajectoryRecord) -> Result<()> {
        self.check()?;
        self.trajectories.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(distance: f64) -> FlyoverEvent {
        FlyoverEvent {
            aircraft_id: "3c4594".to_string(),
            correlation_id: Uuid::new_v4(),
            distance,
            detection_distance: distance + 150.0,
            min_distance_time: Some(10.0),
            timestamp: 11.0,
            rssi: -12.5,
            info: AircraftInfo::default(),
        }
    }

    fn record() -> TrajectoryRecord {
        TrajectoryRecord {
            correlation_id: Uuid::new_v4(),
            aircraft_id: "3c4594".to_string(),
            path: vec![[8.0, 50.0, 900.0, 1.0], [8.01, 50.0, 910.0, 2.0]],
            rssi: vec![-10.0, -11.0],
            alt_geom: vec![None, Some(950.0)],
            min_distance: 1200.0,
            min_distance_time: Some(2.0),
        }
    }

    #[test]
    fn test_event_text() {
        assert_eq!(event(1034.4).text(), "1034 m");
        assert_eq!(event(999.6).text(), "1000 m");
    }

    #[test]
    fn test_record_bounds() {
        let r = record();
        assert_eq!(r.len(), 2);
        assert!(!r.is_empty());
        assert_eq!(r.start_time(), Some(1.0));
        assert_eq!(r.end_time(), Some(2.0));
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::new();
        sink.write_event(&event(500.0)).unwrap();
        sink.write_trajectory(&record()).unwrap();
        assert_eq!(sink.events.len(), 1);
        assert_eq!(sink.trajectories.len(), 1);
    }

    #[test]
    fn test_failing_sink() {
        let mut sink = MemorySink::failing();
        assert!(sink.write_event(&event(500.0)).is_err());
        assert!(sink.write_trajectory(&record()).is_err());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn test_memory_sink_keeps_everything() {
        let mut sink = MemorySink::new();
        sink.write_event(&event(500.0)).unwrap();
        assert_eq!(sink.prune(Duration::zero()).unwrap(), 0);
        assert_eq!(sink.events.len(), 1);
    }

    #[test]
    fn test_sink_through_mut_ref() {
        fn write_one<S: FlyoverSink>(mut sink: S) {
            sink.write_event(&event(100.0)).unwrap();
        }

        let mut sink = MemorySink::new();
        write_one(&mut sink);
        write_one(&mut sink);
        assert_eq!(sink.events.len(), 2);
    }
}
