//! Geodetic to Cartesian projection.
//!
//! Positions are placed on a sphere of radius `EARTH_RADIUS + alt`. This is not
//! WGS84, but within the few kilometers around a station the error is far below
//! the resolution of the reported positions.

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean earth radius in meters.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Meters per foot, for the barometric and geometric altitudes of the feed.
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Project a geodetic position (degrees, degrees, meters) into Cartesian space.
#[must_use]
pub fn project(lon: f64, lat: f64, alt: f64) -> Vector3<f64> {
    let lon = lon.to_radians();
    let lat = lat.to_radians();
    let r = EARTH_RADIUS + alt;

    Vector3::new(
        r * lat.cos() * lon.cos(),
        r * lat.cos() * lon.sin(),
        r * lat.sin(),
    )
}

/// The fixed ground station that flyovers are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Altitude in meters.
    pub alt: f64,
}

impl Station {
    /// Create a station reference.
    #[must_use]
    pub const fn new(lon: f64, lat: f64, alt: f64) -> Self {
        Self { lon, lat, alt }
    }

    /// The station's own projected position.
    #[must_use]
    pub fn home_vec(&self) -> Vector3<f64> {
        project(self.lon, self.lat, self.alt)
    }

    /// Check that all coordinates are usable.
    ///
    /// # Errors
    ///
    /// Returns an error for non-finite values or a latitude outside ±90°.
    pub fn validate(&self) -> Result<()> {
        if !(self.lon.is_finite() && self.lat.is_finite() && self.alt.is_finite()) {
            return Err(Error::config_validation(format!(
                "station position must be finite, got {self}"
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::config_validation(format!(
                "station latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lon, self.lat, self.alt)
    }
}

/// Parses the compact `lon:lat:alt` form used in station deployments.
impl FromStr for Station {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(Error::config_validation(format!(
                "station position must be lon:lat:alt, got '{s}'"
            )));
        }

        let mut values = [0.0_f64; 3];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part.parse().map_err(|_| {
                Error::config_validation(format!("invalid number '{part}' in station position"))
            })?;
        }

        let station = Self::new(values[0], values[1], values[2]);
        station.validate()?;
        Ok(station)
    }
}
