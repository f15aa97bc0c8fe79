//! `flyover` - Detect aircraft flying over a ground station
//!
//! This library turns a stream of ADS-B position reports into flyover events:
//! every aircraft near the station is tracked, its closest approach is
//! estimated, and both the event and the full trajectory are persisted.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod geo;
pub mod logging;
pub mod report;
pub mod sink;
pub mod storage;
pub mod store;
pub mod trajectory;

pub use config::{Config, DetectionConfig};
pub use error::{Error, Result};
pub use feed::{IngestLoop, IngestStats, LineSource, StopHandle};
pub use geo::Station;
pub use logging::init_logging;
pub use report::{AircraftInfo, AircraftReport, Fix};
pub use sink::{FlyoverEvent, FlyoverSink, MemorySink, TrajectoryRecord};
pub use storage::{Storage, StorageStats};
pub use store::TrajectoryStore;
pub use trajectory::{Trajectory, UpdateOutcome};
