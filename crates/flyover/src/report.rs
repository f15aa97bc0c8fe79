//! Aircraft position reports as delivered by the feed.
//!
//! One feed line is one JSON object in the readsb/dump1090 aircraft format.
//! [`AircraftReport`] mirrors that object loosely; [`AircraftReport::fix`]
//! turns it into a validated [`Fix`] or rejects it.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::geo::METERS_PER_FOOT;

/// One aircraft report as parsed from a feed line.
///
/// Numeric fields that are present but not numbers (the feed reports
/// `"alt_baro": "ground"` for aircraft on the ground) are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftReport {
    /// 24-bit ICAO address as hex string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,

    /// Longitude in degrees.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub lon: Option<f64>,

    /// Latitude in degrees.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub lat: Option<f64>,

    /// Barometric altitude in feet.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub alt_baro: Option<f64>,

    /// Geometric altitude in feet.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub alt_geom: Option<f64>,

    /// Report time in unix seconds.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub now: Option<f64>,

    /// Signal strength in dBFS.
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub rssi: Option<f64>,

    /// Callsign, space padded by the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,

    /// Registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,

    /// ICAO type designator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Long type description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| v.as_f64())
        .filter(|x| x.is_finite()))
}

fn icao_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // `~` prefixes non-ICAO (TIS-B, anonymous) addresses
    PATTERN.get_or_init(|| Regex::new(r"^~?[0-9a-f]{6}$").expect("static regex is valid"))
}

/// A validated position fix with altitudes converted to meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Normalised (lowercase) aircraft address.
    pub id: String,
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Barometric altitude in meters.
    pub alt_baro: f64,
    /// Geometric altitude in meters, if reported.
    pub alt_geom: Option<f64>,
    /// Report time in unix seconds.
    pub timestamp: f64,
    /// Signal strength in dBFS.
    pub rssi: f64,
}

/// Descriptive fields of an aircraft, merged as better data arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AircraftInfo {
    /// Callsign without padding.
    pub callsign: Option<String>,
    /// Registration.
    pub registration: Option<String>,
    /// ICAO type designator.
    pub aircraft_type: Option<String>,
    /// Long type description.
    pub description: Option<String>,
}

impl AircraftInfo {
    /// Overwrite every field for which `other` has a value.
    pub fn merge(&mut self, other: &AircraftInfo) {
        fn take(dst: &mut Option<String>, src: &Option<String>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        take(&mut self.callsign, &other.callsign);
        take(&mut self.registration, &other.registration);
        take(&mut self.aircraft_type, &other.aircraft_type);
        take(&mut self.description, &other.description);
    }

    /// Check if nothing is known about the aircraft.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callsign.is_none()
            && self.registration.is_none()
            && self.aircraft_type.is_none()
            && self.description.is_none()
    }
}

fn clean(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl AircraftReport {
    /// Parse a single feed line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the line is not a JSON object of the expected shape.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Validate the required fields and build a [`Fix`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReport`] naming the first missing or unusable field.
    pub fn fix(&self) -> Result<Fix> {
        let id = self
            .hex
            .as_deref()
            .map(|h| h.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::invalid_report("missing hex"))?;
        if !icao_pattern().is_match(&id) {
            return Err(Error::invalid_report(format!("bad aircraft address '{id}'")));
        }

        let require = |value: Option<f64>, name: &str| {
            value.ok_or_else(|| Error::invalid_report(format!("{id}: missing {name}")))
        };

        let lon = require(self.lon, "lon")?;
        let lat = require(self.lat, "lat")?;
        let alt_baro = require(self.alt_baro, "alt_baro")?;
        let timestamp = require(self.now, "now")?;
        let rssi = require(self.rssi, "rssi")?;

        Ok(Fix {
            id,
            lon,
            lat,
            alt_baro: alt_baro * METERS_PER_FOOT,
            alt_geom: self.alt_geom.map(|a| a * METERS_PER_FOOT),
            timestamp,
            rssi,
        })
    }

    /// The descriptive fields carried by this report.
    #[must_use]
    pub fn info(&self) -> AircraftInfo {
        AircraftInfo {
            callsign: clean(&self.flight),
            registration: clean(&self.r),
            aircraft_type: clean(&self.t),
            description: clean(&self.desc),
        }
    }
}
