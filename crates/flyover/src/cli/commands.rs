//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::config::{Config, FeedTransport};
use crate::error::Result;
use crate::geo::Station;

fn parse_station(s: &str) -> std::result::Result<Station, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

/// Options shared by the commands that process reports.
#[derive(Debug, Clone, Default, Args)]
pub struct DetectOptions {
    /// Station position, overriding the configuration
    #[arg(short, long, value_name = "LON:LAT:ALT", value_parser = parse_station)]
    pub position: Option<Station>,

    /// Detect without writing to the database
    #[arg(long)]
    pub dry_run: bool,
}

/// Run command arguments.
#[derive(Debug, Clone, Default, Args)]
pub struct RunCommand {
    /// Feed address (host:port), overriding the configuration
    #[arg(short, long, value_name = "ADDR")]
    pub feed: Option<String>,

    /// Receive datagrams on the feed address instead of connecting over TCP
    #[arg(long)]
    pub udp: bool,

    #[command(flatten)]
    pub options: DetectOptions,
}

impl RunCommand {
    /// Apply the command line overrides to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(feed) = &self.feed {
            config.feed.address.clone_from(feed);
        }
        if self.udp {
            config.feed.transport = FeedTransport::Udp;
        }
        self.options.apply(config)
    }
}

impl DetectOptions {
    /// Apply the station override to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid or names no
    /// station.
    pub fn apply(&self, mut config: Config) -> Result<Config> {
        if let Some(position) = self.position {
            config.station = Some(position);
        }
        config.validate()?;
        config.station()?;
        Ok(config)
    }
}

/// Replay command arguments.
#[derive(Debug, Clone, Args)]
pub struct ReplayCommand {
    /// Recorded feed, one JSON report per line (`-` for stdin)
    pub file: PathBuf,

    #[command(flatten)]
    pub options: DetectOptions,
}

/// Events command arguments.
#[derive(Debug, Clone, Args)]
pub struct EventsCommand {
    /// Show the last N events
    #[arg(short, long, default_value = "20")]
    pub last: usize,

    /// Only events of this aircraft (hex address)
    #[arg(short, long)]
    pub aircraft: Option<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
