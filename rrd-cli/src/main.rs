//! CLI for the rrd round-robin time-series store.
//!
//! Provides commands for saving samples to, querying, and inspecting a store.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use rrd::{Aggregation, Backing, EngineKind, RingKind, Sample, Store, Summary};
use tracing_subscriber::EnvFilter;

/// rrd: two-resolution round-robin time-series store CLI.
#[derive(Parser)]
#[command(name = "rrd", version, about)]
struct Cli {
    /// Storage engine: sqlite, kv, or redis.
    #[arg(long, global = true, env = "RRD_ENGINE", default_value = "sqlite")]
    engine: EngineKind,

    /// Store location: a file path, `:memory:`, or a redis URL.
    #[arg(long, global = true, env = "RRD_DATABASE", default_value = "./rrd-data.db")]
    database: String,

    /// Rule for folding a sample into an existing slot: min, max, or last.
    #[arg(long, global = true, env = "RRD_AGGREGATION", default_value = "min")]
    aggregation: Aggregation,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Save one sample.
    #[command(allow_negative_numbers = true)]
    Save {
        /// Save at the current time with this value.
        #[arg(long, value_name = "VALUE", conflicts_with_all = ["timestamp", "value"])]
        now: Option<f64>,

        /// Sample time in seconds since the Unix epoch.
        #[arg(required_unless_present = "now")]
        timestamp: Option<i64>,

        /// Sample value.
        #[arg(required_unless_present = "now")]
        value: Option<f64>,
    },

    /// Print one ring, oldest first.
    Query {
        /// Ring to print: minutes or hours.
        ring: RingKind,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Display the backing, last timestamps, and ring usage.
    Info,
}

/// Output format for query results.
#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One line per slot followed by a summary.
    Text,
    /// Comma-separated values.
    Csv,
    /// JSON document with samples and summary.
    Json,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let backing = Backing::new(cli.engine, cli.database);

    let result = match cli.command {
        Commands::Save {
            now,
            timestamp,
            value,
        } => cmd_save(&backing, cli.aggregation, now, timestamp, value),
        Commands::Query { ring, format } => cmd_query(&backing, ring, format),
        Commands::Info => cmd_info(&backing),
    };

    if let Err(e) = result {
        tracing::debug!(%backing, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `rrd save <timestamp> <value>` and `rrd save --now <value>`.
fn cmd_save(
    backing: &Backing,
    aggregation: Aggregation,
    now: Option<f64>,
    timestamp: Option<i64>,
    value: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (timestamp, value) = match (now, timestamp, value) {
        (Some(value), _, _) => (unix_now()?, value),
        (None, Some(timestamp), Some(value)) => (timestamp, value),
        _ => return Err("expected <TIMESTAMP> <VALUE> or --now <VALUE>".into()),
    };

    let mut store = Store::open(backing)?.with_aggregation(aggregation);
    let outcome = store.save(timestamp, value)?;
    tracing::info!(timestamp, value, ?outcome, "saved sample");
    store.close()?;
    Ok(())
}

/// Implements `rrd query <ring>`.
fn cmd_query(
    backing: &Backing,
    ring: RingKind,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(backing)?;
    let samples = store.query(ring)?;
    store.close()?;

    let stdout = io::stdout();
    render_query(&mut stdout.lock(), ring, &samples, format)
}

/// Implements `rrd info`.
fn cmd_info(backing: &Backing) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(backing)?;
    let stdout = io::stdout();
    render_info(&mut stdout.lock(), backing, &store)?;
    store.close()?;
    Ok(())
}

/// Writes a queried ring in the requested format.
fn render_query(
    out: &mut impl Write,
    ring: RingKind,
    samples: &[Sample],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = Summary::from_samples(samples);

    match format {
        OutputFormat::Text => {
            for sample in samples {
                let Some(ts) = sample.timestamp else {
                    continue;
                };
                match sample.value {
                    Some(value) => writeln!(out, "{ts}\t{value}")?,
                    None => writeln!(out, "{ts}\t-")?,
                }
            }
            writeln!(out, "# {ring}: {summary}")?;
        }
        OutputFormat::Csv => {
            writeln!(out, "# ring={ring}, slots={}, values={}", samples.len(), summary.count)?;
            writeln!(out, "timestamp,value")?;
            for sample in samples {
                writeln!(
                    out,
                    "{},{}",
                    sample.timestamp.map(|ts| ts.to_string()).unwrap_or_default(),
                    sample.value.map(|v| v.to_string()).unwrap_or_default()
                )?;
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "ring": ring,
                "samples": samples,
                "summary": summary,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&output)?)?;
        }
    }

    Ok(())
}

/// Writes store metadata and per-ring slot usage.
fn render_info(
    out: &mut impl Write,
    backing: &Backing,
    store: &Store,
) -> Result<(), Box<dyn std::error::Error>> {
    let show = |ts: Option<i64>| ts.map_or_else(|| "none".to_string(), |ts| ts.to_string());

    writeln!(out, "Backing: {backing}")?;
    writeln!(out, "Last minute: {}", show(store.last_timestamp()))?;
    writeln!(out, "Last hour: {}", show(store.last_hour_timestamp()))?;
    writeln!(out)?;

    for ring in RingKind::ALL {
        let samples = store.query(ring)?;
        let written = samples.iter().filter(|s| !s.is_empty()).count();
        let placeholders = samples.iter().filter(|s| s.is_placeholder()).count();
        writeln!(
            out,
            "{ring}: {written}/{} slots written, {placeholders} placeholders",
            ring.capacity()
        )?;
    }

    Ok(())
}

/// Returns the current wall-clock time in seconds since the Unix epoch.
fn unix_now() -> Result<i64, Box<dyn std::error::Error>> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(i64::try_from(secs)?)
}
