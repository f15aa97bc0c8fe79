//! Per-aircraft trajectory state machine.
//!
//! A [`Trajectory`] accumulates the fixes of one aircraft while it is inside
//! the active zone around the station, keeps a running minimum of the slant
//! distance, and raises a flyover once the aircraft is receding from its
//! closest approach. When the aircraft leaves the zone the track is dumped to
//! the sink and the trajectory is reset for the next pass.
//!
//! ```text
//!   Idle --(fix inside zone)--> Tracking --(leaves zone / times out)--> dump + reset --> Idle
//! ```

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DetectionConfig;
use crate::geo::{project, Station};
use crate::report::{AircraftInfo, Fix};
use crate::sink::{FlyoverEvent, FlyoverSink, TrajectoryRecord};

/// Geometry of the observation zone around a station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    station: Station,
    home: Vector3<f64>,
    active_range: f64,
    event_range: f64,
}

impl Zone {
    /// Build the zone for `station` with the ranges from `config`.
    #[must_use]
    pub fn new(station: Station, config: &DetectionConfig) -> Self {
        Self {
            station,
            home: station.home_vec(),
            active_range: config.active_range_m,
            event_range: config.event_range_m,
        }
    }

    /// The station this zone is centered on.
    #[must_use]
    pub fn station(&self) -> Station {
        self.station
    }

    /// Vector from the station to a position.
    #[must_use]
    pub fn offset(&self, lon: f64, lat: f64, alt: f64) -> Vector3<f64> {
        project(lon, lat, alt) - self.home
    }

    /// Distance from the station ignoring the aircraft's altitude.
    #[must_use]
    pub fn horizontal_distance(&self, lon: f64, lat: f64) -> f64 {
        self.offset(lon, lat, self.station.alt).norm()
    }

    /// Radius of the tracked cylinder.
    #[must_use]
    pub fn active_range(&self) -> f64 {
        self.active_range
    }

    /// Distance up to which flyovers are written as events.
    #[must_use]
    pub fn event_range(&self) -> f64 {
        self.event_range
    }
}

/// Closest approach of the straight line through `v0` and `v1` to the origin.
///
/// Returns `(lambda, dist0)` where `v0 + lambda * (v1 - v0)` is the closest
/// point and `dist0` its distance. A negative `lambda` means the closest point
/// lies behind `v0`, i.e. the segment is moving away from the origin.
/// Identical points give no direction and yield `(inf, inf)`.
#[must_use]
pub fn closest_approach(v0: &Vector3<f64>, v1: &Vector3<f64>) -> (f64, f64) {
    let d = v1 - v0;
    let dd = d.dot(&d);
    if dd == 0.0 {
        return (f64::INFINITY, f64::INFINITY);
    }
    let lambda = -v0.dot(&d) / dd;
    (lambda, (v0 + d * lambda).norm())
}

/// One accepted fix of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Barometric altitude in meters.
    pub alt_baro: f64,
    /// Report time in unix seconds.
    pub timestamp: f64,
    /// Signal strength.
    pub rssi: f64,
    /// Geometric altitude in meters.
    pub alt_geom: Option<f64>,
}

impl From<&Fix> for TrackPoint {
    fn from(fix: &Fix) -> Self {
        Self {
            lon: fix.lon,
            lat: fix.lat,
            alt_baro: fix.alt_baro,
            timestamp: fix.timestamp,
            rssi: fix.rssi,
            alt_geom: fix.alt_geom,
        }
    }
}

/// Coarse lifecycle state of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryState {
    /// No history.
    Idle,
    /// Inside the zone or holding points that were not dumped yet.
    Tracking,
}

/// What a single [`Trajectory::update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Fix outside the zone, aircraft was not being tracked.
    OutsideZone,
    /// Fix outside the zone ended a tracked pass.
    LeftZone {
        /// Whether the track was long enough to be dumped.
        dumped: bool,
    },
    /// Fix appended to the track.
    Tracked,
    /// Fix appended and the aircraft found receding from its closest approach.
    Flyover {
        /// Whether the pass was close enough to be written as an event.
        event: bool,
    },
}

/// Tracking state of one aircraft.
#[derive(Debug, Clone)]
pub struct Trajectory {
    id: String,
    correlation_id: Uuid,
    last_active: f64,
    track: Vec<TrackPoint>,
    in_zone: bool,
    min_dist: f64,
    min_dist_time: Option<f64>,
    flyover_detected: bool,
    info: AircraftInfo,

    // most recent geometry; only last_vec feeds back into the algorithm
    last_vec: Vector3<f64>,
    last_dist_xy: f64,
    last_dist: f64,
    last_lambda: f64,
    last_dist0: f64,
}

impl Trajectory {
    /// Create an idle trajectory for `id`, first seen at `timestamp`.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            id: id.into(),
            correlation_id: Uuid::new_v4(),
            last_active: timestamp,
            track: Vec::new(),
            in_zone: false,
            min_dist: f64::INFINITY,
            min_dist_time: None,
            flyover_detected: false,
            info: AircraftInfo::default(),
            last_vec: Vector3::zeros(),
            last_dist_xy: f64::INFINITY,
            last_dist: f64::INFINITY,
            last_lambda: f64::INFINITY,
            last_dist0: f64::INFINITY,
        }
    }

    /// Aircraft address.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Correlation id of the current pass.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Time of the last fix accepted inside the zone.
    #[must_use]
    pub fn last_active(&self) -> f64 {
        self.last_active
    }

    /// Accepted fixes of the current pass, oldest first.
    #[must_use]
    pub fn track(&self) -> &[TrackPoint] {
        &self.track
    }

    /// Whether the last fix was inside the zone.
    #[must_use]
    pub fn is_in_zone(&self) -> bool {
        self.in_zone
    }

    /// Smallest slant distance of the current pass (`inf` if none).
    #[must_use]
    pub fn min_distance(&self) -> f64 {
        self.min_dist
    }

    /// When the smallest slant distance was seen.
    #[must_use]
    pub fn min_distance_time(&self) -> Option<f64> {
        self.min_dist_time
    }

    /// Whether the current pass has been judged a flyover.
    #[must_use]
    pub fn flyover_detected(&self) -> bool {
        self.flyover_detected
    }

    /// Latest descriptive fields.
    #[must_use]
    pub fn info(&self) -> &AircraftInfo {
        &self.info
    }

    /// Slant distance of the last fix inside the zone.
    #[must_use]
    pub fn last_distance(&self) -> f64 {
        self.last_dist
    }

    /// Horizontal distance of the last fix.
    #[must_use]
    pub fn last_horizontal_distance(&self) -> f64 {
        self.last_dist_xy
    }

    /// Coarse lifecycle state.
    #[must_use]
    pub fn state(&self) -> TrajectoryState {
        if self.holds_state() {
            TrajectoryState::Tracking
        } else {
            TrajectoryState::Idle
        }
    }

    /// Whether there is anything a reset would discard.
    #[must_use]
    pub fn holds_state(&self) -> bool {
        self.in_zone || !self.track.is_empty()
    }

    /// Whether the current track is long enough to be persisted.
    #[must_use]
    pub fn is_dumpable(&self) -> bool {
        self.track.len() > 1
    }

    /// Feed one validated fix into the state machine.
    ///
    /// Sink failures are logged; the in-memory state advances regardless.
    pub fn update<S>(
        &mut self,
        fix: &Fix,
        info: &AircraftInfo,
        zone: &Zone,
        sink: &mut S,
    ) -> UpdateOutcome
    where
        S: FlyoverSink + ?Sized,
    {
        let v1 = zone.offset(fix.lon, fix.lat, fix.alt_baro);
        let dist_xy = zone.horizontal_distance(fix.lon, fix.lat);
        self.last_dist_xy = dist_xy;

        if dist_xy > zone.active_range() {
            if !self.in_zone {
                return UpdateOutcome::OutsideZone;
            }
            let dumped = self.is_dumpable();
            if dumped {
                self.dump_and_reset(sink);
            }
            self.in_zone = false;
            debug!(id = %self.id, dist_xy, dumped, "left zone");
            return UpdateOutcome::LeftZone { dumped };
        }

        self.in_zone = true;
        let dist = v1.norm();

        let (lambda, dist0) = if self.track.len() > 1 {
            closest_approach(&self.last_vec, &v1)
        } else {
            (f64::INFINITY, f64::INFINITY)
        };
        self.last_vec = v1;
        self.last_dist = dist;
        self.last_lambda = lambda;
        self.last_dist0 = dist0;

        if dist < self.min_dist {
            self.min_dist = dist;
            self.min_dist_time = Some(fix.timestamp);
        }

        self.track.push(TrackPoint::from(fix));
        self.info.merge(info);

        debug!(
            "{}: dist={:6.1} dist_0={:6.1} dist_xy={:6.1} lambda={:6.1} FOD={}",
            self.id, dist, dist0, dist_xy, lambda, self.flyover_detected
        );

        let mut outcome = UpdateOutcome::Tracked;
        if dist > self.min_dist && lambda < 0.0 && !self.flyover_detected {
            self.flyover_detected = true;
            let event = dist <= zone.event_range();
            if event {
                self.emit_event(fix, dist, sink);
            } else {
                debug!(id = %self.id, min_dist = self.min_dist, "flyover outside event range");
            }
            outcome = UpdateOutcome::Flyover { event };
        }

        self.last_active = fix.timestamp;
        outcome
    }

    fn emit_event<S>(&self, fix: &Fix, dist: f64, sink: &mut S)
    where
        S: FlyoverSink + ?Sized,
    {
        let event = FlyoverEvent {
            aircraft_id: self.id.clone(),
            correlation_id: self.correlation_id,
            distance: self.min_dist,
            detection_distance: dist,
            min_distance_time: self.min_dist_time,
            timestamp: fix.timestamp,
            rssi: fix.rssi,
            info: self.info.clone(),
        };

        match sink.write_event(&event) {
            Ok(()) => info!(
                "event written: icao={}, callsign={}, dist={:.0}m",
                self.id,
                self.info.callsign.as_deref().unwrap_or("-"),
                event.distance
            ),
            Err(e) => warn!("failed to write event for {}: {}", self.id, e),
        }
    }

    /// Build the record of the current pass, if it has at least two points.
    #[must_use]
    pub fn record(&self) -> Option<TrajectoryRecord> {
        if !self.is_dumpable() {
            return None;
        }

        Some(TrajectoryRecord {
            correlation_id: self.correlation_id,
            aircraft_id: self.id.clone(),
            path: self
                .track
                .iter()
                .map(|p| [p.lon, p.lat, p.alt_baro, p.timestamp])
                .collect(),
            rssi: self.track.iter().map(|p| p.rssi).collect(),
            alt_geom: self.track.iter().map(|p| p.alt_geom).collect(),
            min_distance: self.min_dist,
            min_distance_time: self.min_dist_time,
        })
    }

    /// Hand the current pass to the sink.
    ///
    /// Returns `false` without writing if the track has fewer than two points.
    pub fn dump<S>(&self, sink: &mut S) -> bool
    where
        S: FlyoverSink + ?Sized,
    {
        let Some(record) = self.record() else {
            return false;
        };

        match sink.write_trajectory(&record) {
            Ok(()) => info!(
                "trajectory written: icao={}, points={}, min_dist={:.0}m",
                self.id,
                record.len(),
                record.min_distance
            ),
            Err(e) => warn!("failed to write trajectory for {}: {}", self.id, e),
        }
        true
    }

    /// Clear the current pass and start a new one with a fresh correlation id.
    ///
    /// Descriptive info and the activity time survive a reset.
    pub fn reset(&mut self) {
        self.track.clear();
        self.min_dist = f64::INFINITY;
        self.min_dist_time = None;
        self.flyover_detected = false;
        self.in_zone = false;
        self.correlation_id = Uuid::new_v4();
    }

    /// [`dump`](Self::dump) followed by [`reset`](Self::reset).
    pub fn dump_and_reset<S>(&mut self, sink: &mut S) -> bool
    where
        S: FlyoverSink + ?Sized,
    {
        let dumped = self.dump(sink);
        self.reset();
        dumped
    }
}
