//! Configuration management for flyover.
//!
//! Configuration is layered with figment: built-in defaults, then a TOML
//! file, then `FLYOVER_` environment variables. Nested keys use a double
//! underscore, e.g. `FLYOVER_DETECTION__EVENT_RANGE_M=2500`.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::Station;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flyover";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "flyover.db";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Position of the ground station. Required to process a feed.
    pub station: Option<Station>,
    /// Flyover detection thresholds.
    pub detection: DetectionConfig,
    /// Position feed connection.
    pub feed: FeedConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
}

/// Thresholds of the flyover detector.
///
/// Handed to the trajectory store at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Horizontal radius of the tracked cylinder around the station.
    pub active_range_m: f64,
    /// Flyovers closer than this are written as events.
    pub event_range_m: f64,
    /// Silence after which a trajectory is dumped and reset.
    pub trajectory_timeout_secs: f64,
    /// Silence after which an aircraft is forgotten entirely.
    pub cache_timeout_secs: f64,
}

/// Transport of the position feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedTransport {
    /// Newline delimited JSON over a TCP connection.
    #[default]
    Tcp,
    /// JSON lines in UDP datagrams.
    Udp,
}

impl std::fmt::Display for FeedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Position feed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// `host:port` of the feed (TCP) or the local bind address (UDP).
    pub address: String,
    /// Transport used to read the feed.
    pub transport: FeedTransport,
    /// Fixed delay before reconnecting after a feed failure.
    pub retry_delay_secs: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/flyover/flyover.db`
    pub database_path: Option<PathBuf>,
    /// Maximum age of stored events and trajectories in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
    /// Prune interval in hours.
    pub prune_interval_hours: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            active_range_m: 5000.0,
            event_range_m: 3000.0,
            trajectory_timeout_secs: 600.0,
            cache_timeout_secs: 3600.0,
        }
    }
}

impl DetectionConfig {
    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if a range or timeout is not positive, if the event
    /// range exceeds the active range, or if the trajectory timeout is not
    /// shorter than the cache timeout.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("active_range_m", self.active_range_m),
            ("event_range_m", self.event_range_m),
            ("trajectory_timeout_secs", self.trajectory_timeout_secs),
            ("cache_timeout_secs", self.cache_timeout_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::config_validation(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }

        if self.event_range_m > self.active_range_m {
            return Err(Error::config_validation(format!(
                "event_range_m ({}) cannot be greater than active_range_m ({})",
                self.event_range_m, self.active_range_m
            )));
        }

        if self.trajectory_timeout_secs >= self.cache_timeout_secs {
            return Err(Error::config_validation(format!(
                "trajectory_timeout_secs ({}) must be less than cache_timeout_secs ({})",
                self.trajectory_timeout_secs, self.cache_timeout_secs
            )));
        }

        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:30047".to_string(),
            transport: FeedTransport::Tcp,
            retry_delay_secs: 1,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // resolved at runtime
            max_age_days: 365,
            prune_interval_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FLYOVER_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(station) = &self.station {
            station.validate()?;
        }
        self.detection.validate()?;

        if self.feed.address.trim().is_empty() {
            return Err(Error::config_validation("feed address must not be empty"));
        }

        if self.feed.retry_delay_secs == 0 {
            return Err(Error::config_validation(
                "retry_delay_secs must be greater than 0",
            ));
        }

        if self.storage.prune_interval_hours == 0 {
            return Err(Error::config_validation(
                "prune_interval_hours must be greater than 0",
            ));
        }

        Ok(())
    }

    /// The configured station position.
    ///
    /// # Errors
    ///
    /// Returns an error if no station is configured.
    pub fn station(&self) -> Result<Station> {
        self.station.ok_or_else(|| {
            Error::config_validation(
                "station position is not set; add a [station] section or pass --position lon:lat:alt",
            )
        })
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the prune interval as a Duration.
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.storage.prune_interval_hours) * 60 * 60)
    }

    /// Get the feed retry delay as a Duration.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.feed.retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detection_config() {
        let detection = DetectionConfig::default();

        assert_eq!(detection.active_range_m, 5000.0);
        assert_eq!(detection.event_range_m, 3000.0);
        assert_eq!(detection.trajectory_timeout_secs, 600.0);
        assert_eq!(detection.cache_timeout_secs, 3600.0);
        assert!(detection.validate().is_ok());
    }

    #[test]
    fn test_default_feed_config() {
        let feed = FeedConfig::default();

        assert_eq!(feed.address, "127.0.0.1:30047");
        assert_eq!(feed.transport, FeedTransport::Tcp);
        assert_eq!(feed.retry_delay_secs, 1);
    }

    #[test]
    fn test_default_storage_config() {
        let storage = StorageConfig::default();

        assert!(storage.database_path.is_none());
        assert_eq!(storage.max_age_days, 365);
        assert_eq!(storage.prune_interval_hours, 24);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_event_range_exceeds_active_range() {
        let mut config = Config::default();
        config.detection.event_range_m = 6000.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("event_range_m"));
    }

    #[test]
    fn test_validate_timeout_order() {
        let mut config = Config::default();
        config.detection.trajectory_timeout_secs = 3600.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("trajectory_timeout_secs"));
    }

    #[test]
    fn test_validate_non_positive_range() {
        let mut config = Config::default();
        config.detection.active_range_m = 0.0;
        assert!(config.validate().is_err());

        config.detection.active_range_m = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_station() {
        let mut config = Config::default();
        config.station = Some(Station::new(8.0, 91.0, 100.0));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("latitude"));
    }

    #[test]
    fn test_station_is_required() {
        let config = Config::default();
        assert!(config.station.is_none());

        let err = config.station().unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
        assert!(err.to_string().contains("--position"));
    }

    #[test]
    fn test_load_partial_station_fails() {
        let path = std::env::temp_dir().join(format!(
            "flyover_partial_station_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[station]
lon = 8.0
lat = 50.0
").unwrap();

        let result = Config::load_from(Some(path.clone()));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(Error::ConfigLoad(_))));
    }

    #[test]
    fn test_validate_zero_retry_delay() {
        let mut config = Config::default();
        config.feed.retry_delay_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retry_delay_secs"));
    }

    #[test]
    fn test_validate_empty_feed_address() {
        let mut config = Config::default();
        config.feed.address = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("flyover.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/var/lib/flyover/events.db"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/flyover/events.db")
        );
    }

    #[test]
    fn test_max_age() {
        let mut config = Config::default();
        assert_eq!(
            config.max_age(),
            Some(Duration::from_secs(365 * 24 * 60 * 60))
        );

        config.storage.max_age_days = 0;
        assert!(config.max_age().is_none());
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.prune_interval(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("flyover"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml_file() {
        let path = std::env::temp_dir().join(format!("flyover_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[station]
lon = 8.269
lat = 49.982
alt = 95.0

[detection]
event_range_m = 2500.0

[feed]
address = "10.0.0.7:30047"
transport = "udp"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.station().unwrap(), Station::new(8.269, 49.982, 95.0));
        assert_eq!(config.detection.event_range_m, 2500.0);
        assert_eq!(config.detection.active_range_m, 5000.0);
        assert_eq!(config.feed.address, "10.0.0.7:30047");
        assert_eq!(config.feed.transport, FeedTransport::Udp);
    }

    #[test]
    fn test_load_invalid_toml_values() {
        let path = std::env::temp_dir().join(format!(
            "flyover_bad_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[detection]\nevent_range_m = 9000.0\n").unwrap();

        let result = Config::load_from(Some(path.clone()));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_feed_transport_serde() {
        let json = serde_json::to_string(&FeedTransport::Udp).unwrap();
        assert_eq!(json, "\"udp\"");
        assert_eq!(FeedTransport::Tcp.to_string(), "tcp");
    }
}
