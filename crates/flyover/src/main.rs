//! `flyover` - CLI for the flyover detector
//!
//! This binary runs the detector against a live or recorded feed and
//! inspects the recorded events.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use clap::Parser;
use tracing::info;

use flyover::cli::{
    Cli, Command, ConfigCommand, DetectOptions, EventsCommand, ReplayCommand, RunCommand,
};
use flyover::feed::{self, FileLineSource};
use flyover::storage::feed_time;
use flyover::{
    init_logging, Config, FlyoverEvent, FlyoverSink, IngestLoop, IngestStats, LineSource,
    MemorySink, StopHandle, Storage, TrajectoryStore,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Run(cmd) => handle_run(config, &cmd),
        Command::Replay(cmd) => handle_replay(config, &cmd),
        Command::Events(cmd) => handle_events(&config, &cmd),
        Command::Status(cmd) => handle_status(&config, cmd.json),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn handle_run(config: Config, cmd: &RunCommand) -> Result<(), Box<dyn std::error::Error>> {
    let config = cmd.apply(config)?;
    let mut source = feed::source_from_config(&config);
    let stats = detect(&config, &cmd.options, source.as_mut(), true)?;
    info!("stopped: {}", stats);
    Ok(())
}

fn handle_replay(config: Config, cmd: &ReplayCommand) -> Result<(), Box<dyn std::error::Error>> {
    let config = cmd.options.apply(config)?;
    let mut source = FileLineSource::new(&cmd.file);
    let stats = detect(&config, &cmd.options, &mut source, false)?;

    println!("Replayed {}", source.describe());
    println!("  Lines:         {}", stats.lines);
    println!("  Malformed:     {}", stats.malformed);
    println!("  Rejected:      {}", stats.rejected);
    println!("  Events:        {}", stats.store.events);
    println!("  Trajectories:  {}", stats.store.dumps);
    Ok(())
}

/// Run the ingest loop on a single-threaded runtime until the source ends or
/// Ctrl-C is pressed.
fn detect(
    config: &Config,
    options: &DetectOptions,
    source: &mut dyn LineSource,
    retention: bool,
) -> Result<IngestStats, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let stop = StopHandle::new();
        let ctrl_c = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
                ctrl_c.stop();
            }
        });

        if options.dry_run {
            info!("dry run, nothing is written to the database");
            return ingest(config, MemorySink::new(), source, stop, false).await;
        }

        let storage = Storage::open(config.database_path())?;
        storage.record_station(&config.station()?)?;
        ingest(config, storage, source, stop, retention).await
    })
}

async fn ingest<S: FlyoverSink>(
    config: &Config,
    sink: S,
    source: &mut dyn LineSource,
    stop: StopHandle,
    retention: bool,
) -> Result<IngestStats, Box<dyn std::error::Error>> {
    let station = config.station()?;
    info!(
        "station {}, active range {} m, event range {} m",
        station, config.detection.active_range_m, config.detection.event_range_m
    );

    let store = TrajectoryStore::new(station, config.detection, sink);
    let mut ingest = IngestLoop::new(store, stop).with_retry_delay(config.retry_delay());
    if retention {
        if let Some(max_age) = config.max_age() {
            ingest = ingest.with_retention(config.prune_interval(), max_age)?;
        }
    }

    Ok(ingest.run(source).await?)
}

fn open_existing_storage(config: &Config) -> Result<Option<Storage>, Box<dyn std::error::Error>> {
    let path = config.database_path();
    if !path.exists() {
        println!("No database at {}", path.display());
        return Ok(None);
    }
    Ok(Some(Storage::open(path)?))
}

fn format_time(secs: f64) -> String {
    feed_time(secs).map_or_else(
        || "-".to_string(),
        |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

fn station_text(config: &Config) -> String {
    config
        .station
        .map_or_else(|| "(not set)".to_string(), |s| s.to_string())
}

fn print_event_table(events: &[FlyoverEvent]) {
    println!(
        "{:<19}  {:<7}  {:<8}  {:<8}  {:<5}  {:>8}",
        "time (UTC)", "hex", "callsign", "reg", "type", "distance"
    );
    for event in events {
        let info = &event.info;
        println!(
            "{:<19}  {:<7}  {:<8}  {:<8}  {:<5}  {:>8}",
            format_time(event.timestamp),
            event.aircraft_id,
            info.callsign.as_deref().unwrap_or("-"),
            info.registration.as_deref().unwrap_or("-"),
            info.aircraft_type.as_deref().unwrap_or("-"),
            event.text()
        );
    }
}

fn handle_events(config: &Config, cmd: &EventsCommand) -> Result<(), Box<dyn std::error::Error>> {
    let Some(storage) = open_existing_storage(config)? else {
        return Ok(());
    };

    let events = match &cmd.aircraft {
        Some(aircraft) => storage.events_for_aircraft(aircraft, cmd.last)?,
        None => storage.recent_events(cmd.last)?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
    } else if events.is_empty() {
        println!("No flyover events recorded.");
    } else {
        print_event_table(&events);
    }
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let Some(storage) = open_existing_storage(config)? else {
        return Ok(());
    };
    let stats = storage.stats()?;
    let recorded_station = storage.station()?;

    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "station": config.station,
            "recorded_station": recorded_station,
            "events": stats.total_events,
            "trajectories": stats.total_trajectories,
            "oldest_event": stats.oldest_event,
            "newest_event": stats.newest_event,
            "closest_event_m": stats.closest_event_m,
            "db_size_bytes": stats.db_size_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let format_dt = |dt: Option<chrono::DateTime<chrono::Utc>>| {
            dt.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        };

        println!("flyover status");
        println!("--------------");
        println!("Database:      {}", storage.path().display());
        println!("Station:       {}", station_text(config));
        if let Some(recorded) = recorded_station.filter(|s| Some(*s) != config.station) {
            println!("  (database was recorded at {recorded})");
        }
        println!("Events:        {}", stats.total_events);
        println!("Trajectories:  {}", stats.total_trajectories);
        println!("Oldest event:  {}", format_dt(stats.oldest_event));
        println!("Newest event:  {}", format_dt(stats.newest_event));
        if let Some(closest) = stats.closest_event_m {
            println!("Closest pass:  {closest:.0} m");
        }
        println!("Size:          {} KiB", stats.db_size_bytes / 1024);
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Station]");
                println!("  Position:           {}", station_text(config));
                println!();
                println!("[Detection]");
                println!("  Active range (m):   {}", config.detection.active_range_m);
                println!("  Event range (m):    {}", config.detection.event_range_m);
                println!(
                    "  Trajectory timeout: {} s",
                    config.detection.trajectory_timeout_secs
                );
                println!("  Cache timeout:      {} s", config.detection.cache_timeout_secs);
                println!();
                println!("[Feed]");
                println!("  Address:            {}", config.feed.address);
                println!("  Transport:          {}", config.feed.transport);
                println!("  Retry delay:        {} s", config.feed.retry_delay_secs);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max age (days):     {}", config.storage.max_age_days);
                println!(
                    "  Prune interval:     {} h",
                    config.storage.prune_interval_hours
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
