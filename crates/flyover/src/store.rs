//! Keyed store of all tracked aircraft.
//!
//! Every report goes through [`TrajectoryStore::update`], which routes it to
//! the aircraft's [`Trajectory`] and then runs a purge pass with two timeout
//! policies: a soft one that dumps and resets stale trajectories, and a hard
//! one that forgets the aircraft entirely.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::geo::Station;
use crate::report::AircraftReport;
use crate::sink::FlyoverSink;
use crate::trajectory::{Trajectory, UpdateOutcome, Zone};

/// Counters kept by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Reports routed to a trajectory.
    pub updates: u64,
    /// Flyovers within event range.
    pub events: u64,
    /// Trajectories handed to the sink.
    pub dumps: u64,
    /// Aircraft forgotten after the cache timeout.
    pub evictions: u64,
}

/// Result of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    /// Trajectories reset after the trajectory timeout.
    pub reset: usize,
    /// Of those, how many were long enough to be dumped.
    pub dumped: usize,
    /// Aircraft removed after the cache timeout.
    pub evicted: usize,
}

/// All trajectories of one station, keyed by aircraft address.
#[derive(Debug)]
pub struct TrajectoryStore<S> {
    zone: Zone,
    config: DetectionConfig,
    trajectories: HashMap<String, Trajectory>,
    sink: S,
    stats: StoreStats,
}

impl<S: FlyoverSink> TrajectoryStore<S> {
    /// Create an empty store writing to `sink`.
    pub fn new(station: Station, config: DetectionConfig, sink: S) -> Self {
        Self {
            zone: Zone::new(station, &config),
            config,
            trajectories: HashMap::new(),
            sink,
            stats: StoreStats::default(),
        }
    }

    /// Route one report to its trajectory, then purge stale entries.
    ///
    /// The report's own timestamp is the clock of the purge pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReport`](crate::Error::InvalidReport) if the
    /// report lacks a required field. Nothing in the store changes in that case.
    pub fn update(&mut self, report: &AircraftReport) -> Result<UpdateOutcome> {
        let fix = report.fix()?;
        let info = report.info();

        let trajectory = self
            .trajectories
            .entry(fix.id.clone())
            .or_insert_with(|| {
                trace!(id = %fix.id, "new aircraft");
                Trajectory::new(fix.id.clone(), fix.timestamp)
            });
        let outcome = trajectory.update(&fix, &info, &self.zone, &mut self.sink);

        self.stats.updates += 1;
        match outcome {
            UpdateOutcome::Flyover { event: true } => self.stats.events += 1,
            UpdateOutcome::LeftZone { dumped: true } => self.stats.dumps += 1,
            _ => {}
        }

        self.purge(fix.timestamp);
        Ok(outcome)
    }

    /// Apply both timeout policies relative to `now`.
    ///
    /// Per aircraft the trajectory timeout is checked first, so an entry
    /// past both limits is dumped before it is removed.
    pub fn purge(&mut self, now: f64) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        let traj_timeout = self.config.trajectory_timeout_secs;
        let cache_timeout = self.config.cache_timeout_secs;
        let sink = &mut self.sink;

        self.trajectories.retain(|id, trajectory| {
            let idle = now - trajectory.last_active();

            if idle > traj_timeout && trajectory.holds_state() {
                if trajectory.dump_and_reset(sink) {
                    summary.dumped += 1;
                }
                summary.reset += 1;
                debug!(id = %id, idle, "trajectory timed out");
            }

            if idle > cache_timeout {
                summary.evicted += 1;
                debug!(id = %id, idle, "aircraft evicted");
                return false;
            }
            true
        });

        self.stats.dumps += summary.dumped as u64;
        self.stats.evictions += summary.evicted as u64;
        summary
    }

    /// Look up the trajectory of an aircraft.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Trajectory> {
        self.trajectories.get(id)
    }

    /// Check if an aircraft is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.trajectories.contains_key(id)
    }

    /// Number of known aircraft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    /// Check if no aircraft is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Number of aircraft currently inside the zone.
    #[must_use]
    pub fn in_zone(&self) -> usize {
        self.trajectories.values().filter(|t| t.is_in_zone()).count()
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// The observation zone.
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Detection thresholds in use.
    #[must_use]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// The sink records are written to.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable access to the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Drop all state and return the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{EARTH_RADIUS, METERS_PER_FOOT};
    use crate::sink::MemorySink;
    use crate::trajectory::TrajectoryState;

    const STATION: Station = Station::new(8.0, 50.0, 100.0);

    fn store() -> TrajectoryStore<MemorySink> {
        crate::logging::init_test_logging();
        TrajectoryStore::new(STATION, DetectionConfig::default(), MemorySink::new())
    }

    /// Report `east`/`north` meters from the station at `alt` meters.
    fn report(hex: &str, east: f64, north: f64, alt: f64, t: f64) -> AircraftReport {
        let lat = STATION.lat + (north / EARTH_RADIUS).to_degrees();
        let lon = STATION.lon
            + (east / (EARTH_RADIUS * STATION.lat.to_radians().cos())).to_degrees();
        AircraftReport {
            hex: Some(hex.to_string()),
            lon: Some(lon),
            lat: Some(lat),
            alt_baro: Some(alt / METERS_PER_FOOT),
            alt_geom: Some((alt + 40.0) / METERS_PER_FOOT),
            now: Some(t),
            rssi: Some(-18.0),
            flight: Some("BOX457  ".to_string()),
            ..AircraftReport::default()
        }
    }

    /// Straight east-bound pass at 700 m/s, closest to the station at t=9.9.
    fn pass(north: f64, t: u32) -> AircraftReport {
        let t = f64::from(t);
        report("ABC123", 700.0 * (t - 9.9), north, 600.0, t)
    }

    #[test]
    fn test_scenario_close_pass() {
        // 866 m north, 500 m above the station: closest slant distance ~1000 m
        let mut store = store();

        for t in 0..=16 {
            let outcome = store.update(&pass(866.025, t)).unwrap();
            let traj = store.get("abc123").unwrap();

            assert_eq!(traj.is_in_zone(), t >= 3, "t={t}");
            if t == 11 {
                assert_eq!(outcome, UpdateOutcome::Flyover { event: true });
            } else {
                assert!(!matches!(outcome, UpdateOutcome::Flyover { .. }), "t={t}");
            }
            assert_eq!(traj.flyover_detected(), t >= 11, "t={t}");
        }

        let traj = store.get("abc123").unwrap();
        assert_eq!(traj.min_distance_time(), Some(10.0));
        assert!((traj.min_distance() - 1000.0).abs() < 10.0);

        let event = store.sink().events[0].clone();
        assert_eq!(store.sink().events.len(), 1);
        assert_eq!(event.aircraft_id, "abc123");
        assert!((event.distance - 1000.0).abs() < 10.0, "{}", event.distance);
        assert_eq!(event.timestamp, 11.0);
        assert_eq!(event.info.callsign.as_deref(), Some("BOX457"));
        assert!(store.sink().trajectories.is_empty());

        let outcome = store.update(&pass(866.025, 17)).unwrap();
        assert_eq!(outcome, UpdateOutcome::LeftZone { dumped: true });

        let record = &store.sink().trajectories[0];
        assert_eq!(store.sink().trajectories.len(), 1);
        assert_eq!(record.len(), 14);
        assert_eq!(record.start_time(), Some(3.0));
        assert_eq!(record.end_time(), Some(16.0));
        assert_eq!(record.correlation_id, event.correlation_id);
        assert!((record.path[0][2] - 600.0).abs() < 1e-9);

        let stats = store.stats();
        assert_eq!(stats.updates, 18);
        assert_eq!(stats.events, 1);
        assert_eq!(stats.dumps, 1);
        assert_eq!(store.get("abc123").unwrap().state(), TrajectoryState::Idle);
    }

    #[test]
    fn test_pass_beyond_event_range() {
        let mut store = store();

        for t in 0..=15 {
            store.update(&pass(3400.0, t)).unwrap();
        }
        let traj = store.get("abc123").unwrap();
        assert!(traj.flyover_detected());
        assert!(traj.min_distance() > 3000.0);

        store.update(&pass(3400.0, 16)).unwrap();
        assert!(store.sink().events.is_empty());
        assert_eq!(store.sink().trajectories.len(), 1);
        assert_eq!(store.stats().events, 0);
    }

    #[test]
    fn test_rejected_report_changes_nothing() {
        let mut store = store();
        let mut bad = report("abc123", 0.0, 0.0, 500.0, 1.0);
        bad.rssi = None;

        let err = store.update(&bad).unwrap_err();
        assert!(err.is_invalid_report());
        assert!(store.is_empty());
        assert_eq!(store.stats().updates, 0);
    }

    #[test]
    fn test_far_aircraft_is_known_but_idle() {
        let mut store = store();
        let outcome = store
            .update(&report("abc123", 20_000.0, 0.0, 3000.0, 1.0))
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::OutsideZone);
        assert!(store.contains("abc123"));
        assert_eq!(store.in_zone(), 0);
    }

    #[test]
    fn test_eviction_ordering() {
        let mut store = store();
        for t in 0..3 {
            let t = f64::from(t);
            store
                .update(&report("aaaaaa", -500.0 + 500.0 * t, 800.0, 400.0, t))
                .unwrap();
        }
        assert_eq!(store.in_zone(), 1);

        // another aircraft far away drives the clock
        store
            .update(&report("bbbbbb", 30_000.0, 0.0, 3000.0, 2.0 + 600.5))
            .unwrap();

        let traj = store.get("aaaaaa").unwrap();
        assert!(traj.track().is_empty());
        assert!(!traj.is_in_zone());
        assert_eq!(store.sink().trajectories.len(), 1);
        assert_eq!(store.sink().trajectories[0].aircraft_id, "aaaaaa");

        store
            .update(&report("bbbbbb", 30_000.0, 0.0, 3000.0, 2.0 + 3600.5))
            .unwrap();

        assert!(!store.contains("aaaaaa"));
        assert!(store.contains("bbbbbb"));
        assert_eq!(store.sink().trajectories.len(), 1);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_timeout_single_point_is_reset_not_dumped() {
        let mut store = store();
        store
            .update(&report("aaaaaa", 0.0, 500.0, 400.0, 0.0))
            .unwrap();

        let summary = store.purge(601.0);
        assert_eq!(summary.reset, 1);
        assert_eq!(summary.dumped, 0);
        assert!(store.sink().trajectories.is_empty());
        assert_eq!(store.get("aaaaaa").unwrap().state(), TrajectoryState::Idle);

        // nothing left to reset on later passes
        assert_eq!(store.purge(602.0).reset, 0);
    }

    #[test]
    fn test_purge_dumps_then_evicts_in_one_pass() {
        let mut store = store();
        store
            .update(&report("aaaaaa", 0.0, 500.0, 400.0, 0.0))
            .unwrap();
        store
            .update(&report("aaaaaa", 100.0, 500.0, 400.0, 1.0))
            .unwrap();

        let summary = store.purge(5000.0);
        assert_eq!(
            summary,
            PurgeSummary {
                reset: 1,
                dumped: 1,
                evicted: 1
            }
        );
        assert!(store.is_empty());
        assert_eq!(store.into_sink().trajectories.len(), 1);
    }

    #[test]
    fn test_failing_sink_does_not_block() {
        let mut store =
            TrajectoryStore::new(STATION, DetectionConfig::default(), MemorySink::failing());

        for t in 0..=17 {
            store.update(&pass(866.025, t)).unwrap();
        }

        let traj = store.get("abc123").unwrap();
        assert!(traj.track().is_empty());
        assert!(!traj.flyover_detected());
    }

    #[test]
    fn test_custom_ranges() {
        let config = DetectionConfig {
            active_range_m: 1000.0,
            ..DetectionConfig::default()
        };
        let mut store = TrajectoryStore::new(STATION, config, MemorySink::new());

        let outcome = store
            .update(&report("abc123", 2000.0, 0.0, 500.0, 1.0))
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::OutsideZone);
        assert_eq!(store.zone().active_range(), 1000.0);
    }
}
