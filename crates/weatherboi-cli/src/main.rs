//! Operator command line for the weatherboi store.
//!
//! Records manual rain readings, lists and rates stored increments, clears
//! the rain store and dumps any series.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use serde_json::json;
use weatherboi::config::DEFAULT_CACHE_SIZE;
use weatherboi::window::HOUR_SECS;
use weatherboi::{DeviceId, FixedPoint4, Metric, Timestamp, WeatherStore};

/// Capture, store and inspect data from an on-premises weather station.
#[derive(Parser)]
#[command(name = "weatherboi", version, about)]
struct Cli {
    /// Directory holding the database file. Defaults to the home directory.
    #[arg(long, env = "WEATHERBOI_DATABASE_PATH", global = true)]
    database_path: Option<PathBuf>,

    /// Engine page cache size in bytes.
    #[arg(long, default_value_t = DEFAULT_CACHE_SIZE, global = true)]
    cache_size: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Rain counter and increment operations.
    #[command(subcommand)]
    Rain(RainCommand),

    /// Inspect stored series.
    #[command(subcommand)]
    Series(SeriesCommand),

    /// Show the pinned identity, rain counter, battery state and series sizes.
    Info,
}

#[derive(Subcommand)]
enum RainCommand {
    /// Record a cumulative rain reading (inches) by hand.
    Record {
        /// Cumulative counter value, e.g. "1.2500".
        value: FixedPoint4,

        /// Device the reading belongs to. Defaults to the pinned identity.
        #[arg(long)]
        device: Option<String>,

        /// Reading time, as Unix seconds or RFC 3339. Defaults to now.
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<Timestamp>,
    },

    /// List every stored increment with a running total.
    List {
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Rain fallen over a trailing window, and the hourly rate.
    Rate {
        /// Window length in seconds.
        #[arg(long, default_value_t = HOUR_SECS)]
        window: u64,

        /// End of the window, as Unix seconds or RFC 3339. Defaults to now.
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<Timestamp>,
    },

    /// Delete every rain increment and the device's cumulative counter.
    Clear {
        /// Device whose counter is cleared. Defaults to the pinned identity.
        #[arg(long)]
        device: Option<String>,
    },
}

#[derive(Subcommand)]
enum SeriesCommand {
    /// Dump every sample of one metric.
    List {
        /// Metric name, e.g. "temp_outdoor_f".
        metric: Metric,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

/// Output format for listings.
#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum OutputFormat {
    /// One line per entry.
    Text,
    /// A JSON array.
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let stdout = io::stdout();
    if let Err(e) = run(cli, &mut stdout.lock()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// The store directory: `--database-path` if given, else the user's home
/// directory.
fn database_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => dirs::home_dir()
            .context("no home directory found; pass --database-path or set WEATHERBOI_DATABASE_PATH"),
    }
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let dir = database_dir(cli.database_path)?;
    let store = WeatherStore::builder()
        .cache_size(cli.cache_size)
        .open(&dir)
        .with_context(|| format!("failed to open store in '{}'", dir.display()))?;

    match cli.command {
        Commands::Rain(RainCommand::Record { value, device, at }) => {
            cmd_rain_record(&store, value, device, at, out)
        }
        Commands::Rain(RainCommand::List { format }) => cmd_rain_list(&store, format, out),
        Commands::Rain(RainCommand::Rate { window, at }) => cmd_rain_rate(&store, window, at, out),
        Commands::Rain(RainCommand::Clear { device }) => cmd_rain_clear(&store, device, out),
        Commands::Series(SeriesCommand::List { metric, format }) => {
            cmd_series_list(&store, metric, format, out)
        }
        Commands::Info => cmd_info(&store, out),
    }?;

    store.close();
    Ok(())
}

/// Implements `weatherboi rain record <value>`.
fn cmd_rain_record(
    store: &WeatherStore,
    value: FixedPoint4,
    device: Option<String>,
    at: Option<Timestamp>,
    out: &mut impl Write,
) -> Result<()> {
    let device = resolve_device(store, device)?;
    let timestamp = at.unwrap_or_else(Timestamp::now);
    let exchange = store
        .record_rain(&device, timestamp, value)
        .context("failed to record rain reading")?;

    writeln!(
        out,
        "recorded {value} in for '{device}' at {}",
        format_timestamp(timestamp)
    )?;
    writeln!(
        out,
        "  previous counter: {}, increment: {} ({:?})",
        exchange.previous, exchange.delta, exchange.outcome
    )?;
    Ok(())
}

/// Implements `weatherboi rain list`.
fn cmd_rain_list(store: &WeatherStore, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    let entries = store.rain_increments()?;
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &entries)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            if entries.is_empty() {
                writeln!(out, "no rain increments stored")?;
            }
            for entry in &entries {
                writeln!(
                    out,
                    "{}  +{}  total {}",
                    format_timestamp(entry.timestamp),
                    entry.increment,
                    entry.running_total
                )?;
            }
        }
    }
    Ok(())
}

/// Implements `weatherboi rain rate`.
fn cmd_rain_rate(
    store: &WeatherStore,
    window: u64,
    at: Option<Timestamp>,
    out: &mut impl Write,
) -> Result<()> {
    let as_of = at.unwrap_or_else(Timestamp::now);
    let rate = store.rain_rate(as_of, window)?;
    writeln!(
        out,
        "{} in over the {window}s ending {} ({:.4} in/h)",
        rate.total,
        format_timestamp(as_of),
        rate.per_hour
    )?;
    Ok(())
}

/// Implements `weatherboi rain clear`.
fn cmd_rain_clear(
    store: &WeatherStore,
    device: Option<String>,
    out: &mut impl Write,
) -> Result<()> {
    let device = resolve_device(store, device)?;
    let cleared = store.clear_rain(&device)?;
    writeln!(
        out,
        "removed {} rain increments; cumulative counter for '{device}' {}",
        cleared.increments_removed,
        if cleared.counter_cleared {
            "cleared"
        } else {
            "was not set"
        }
    )?;
    Ok(())
}

/// Implements `weatherboi series list <metric>`.
fn cmd_series_list(
    store: &WeatherStore,
    metric: Metric,
    format: OutputFormat,
    out: &mut impl Write,
) -> Result<()> {
    let samples = store.list_all(metric)?;
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = samples
                .iter()
                .map(|(timestamp, value)| json!({ "timestamp": timestamp, "value": value }))
                .collect();
            serde_json::to_writer_pretty(&mut *out, &rows)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for (timestamp, value) in &samples {
                writeln!(out, "{}  {value}", format_timestamp(*timestamp))?;
            }
        }
    }
    Ok(())
}

/// Implements `weatherboi info`.
fn cmd_info(store: &WeatherStore, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Store: {}", store.path().display())?;
    match store.pinned_identity()? {
        Some(device) => {
            writeln!(out, "Device: {device}")?;
            writeln!(
                out,
                "Cumulative rain counter: {}",
                store.last_cumulative(&device)?
            )?;
            if let Some(battery) = store.battery_state(&device)? {
                writeln!(out, "Battery:")?;
                for (sensor, value) in battery.iter() {
                    writeln!(out, "  {sensor}: {value}")?;
                }
            }
        }
        None => writeln!(out, "Device: none pinned")?,
    }
    writeln!(out)?;
    writeln!(out, "Series:")?;
    for metric in Metric::ALL {
        let len = store.series_len(metric)?;
        let latest = store
            .latest(metric)?
            .map_or_else(|| String::from("-"), format_timestamp);
        writeln!(out, "  {:<24} {len:>8} entries, latest {latest}", metric.name())?;
    }
    Ok(())
}

fn resolve_device(store: &WeatherStore, device: Option<String>) -> Result<DeviceId> {
    if let Some(device) = device {
        return Ok(DeviceId::new(device));
    }
    match store.pinned_identity()? {
        Some(pinned) => Ok(pinned),
        None => bail!("no device identity is pinned yet; pass --device"),
    }
}

fn parse_timestamp(s: &str) -> Result<Timestamp, String> {
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Timestamp::from_secs(secs));
    }
    let parsed = DateTime::parse_from_rfc3339(s)
        .map_err(|e| format!("expected Unix seconds or an RFC 3339 time: {e}"))?;
    u64::try_from(parsed.timestamp())
        .map(Timestamp::from_secs)
        .map_err(|_| format!("{s} is before the Unix epoch"))
}

fn format_timestamp(timestamp: Timestamp) -> String {
    i64::try_from(timestamp.as_secs())
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map_or_else(|| timestamp.to_string(), |dt| dt.to_rfc3339())
}
