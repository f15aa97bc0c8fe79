//! Command-line interface for flyover.
//!
//! This module provides the CLI structure for the `flyover` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, DetectOptions, EventsCommand, ReplayCommand, RunCommand, StatusCommand,
};

use crate::logging::Verbosity;

/// flyover - Detect aircraft flying over a ground station
///
/// Reads ADS-B position reports, tracks every aircraft near the station and
/// records an event with the closest approach of each overflight.
#[derive(Debug, Parser)]
#[command(name = "flyover")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process the live feed until interrupted
    Run(RunCommand),

    /// Process a recorded feed
    Replay(ReplayCommand),

    /// List recorded flyover events
    Events(EventsCommand),

    /// Show database status
    Status(StatusCommand),

    /// View or check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Station;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_name(), "flyover");
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["flyover", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(parse(&["flyover", "-q", "status"]).verbosity(), Verbosity::Quiet);
        assert_eq!(parse(&["flyover", "-v", "status"]).verbosity(), Verbosity::Verbose);
        assert_eq!(parse(&["flyover", "-vv", "status"]).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&[
            "flyover",
            "run",
            "--feed",
            "192.168.1.20:30047",
            "--udp",
            "--position",
            "8.26929:49.9823:95",
        ]);
        let Command::Run(cmd) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.feed.as_deref(), Some("192.168.1.20:30047"));
        assert!(cmd.udp);
        assert_eq!(cmd.options.position, Some(Station::new(8.26929, 49.9823, 95.0)));
        assert!(!cmd.options.dry_run);
    }

    #[test]
    fn test_parse_run_bad_position() {
        assert!(Cli::try_parse_from(["flyover", "run", "--position", "8:50"]).is_err());
    }

    #[test]
    fn test_parse_replay() {
        let cli = parse(&["flyover", "replay", "feed.ndjson", "--dry-run"]);
        let Command::Replay(cmd) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(cmd.file, PathBuf::from("feed.ndjson"));
        assert!(cmd.options.dry_run);
    }

    #[test]
    fn test_parse_events() {
        let cli = parse(&["flyover", "events", "--last", "5", "--json"]);
        let Command::Events(cmd) = cli.command else {
            panic!("expected events");
        };
        assert_eq!(cmd.last, 5);
        assert!(cmd.json);
        assert!(cmd.aircraft.is_none());

        let cli = parse(&["flyover", "events"]);
        let Command::Events(cmd) = cli.command else {
            panic!("expected events");
        };
        assert_eq!(cmd.last, 20);
    }

    #[test]
    fn test_parse_config_subcommands() {
        assert!(matches!(
            parse(&["flyover", "config", "show", "--json"]).command,
            Command::Config(ConfigCommand::Show { json: true })
        ));
        assert!(matches!(
            parse(&["flyover", "config", "path"]).command,
            Command::Config(ConfigCommand::Path)
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["flyover", "-c", "/custom/config.toml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }
}
