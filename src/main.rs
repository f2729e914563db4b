use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wpup_stats::config::{Config, DatabaseBackend};
use wpup_stats::date_range::{day_start_timestamp, parse_day};
use wpup_stats::ingest::{IngestError, IngestionEngine, StopReason};
use wpup_stats::storage;

#[derive(Parser)]
#[command(name = "wpup-stats")]
#[command(about = "Aggregate WP Update Server request logs into daily statistics", long_about = None)]
struct Cli {
    /// Parse this log file
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    log: Option<PathBuf>,
    /// Parse every .log file in this directory
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Database URL, overrides the configuration
    #[arg(long)]
    database: Option<String>,
    /// Configuration file (default: ./wpup-stats.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Start parsing from this date (YYYY-MM-DD, UTC)
    #[arg(long)]
    from: Option<String>,
    /// Stop before this date (YYYY-MM-DD, UTC)
    #[arg(long)]
    to: Option<String>,
    /// Restart from the last processed date; no effect on an empty database
    #[arg(long)]
    from_last_date: bool,
    /// Keep going through long runs of malformed lines
    #[arg(long)]
    ignore_bad_lines: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.database {
        config.database.backend = backend_for_url(&url);
        config.database.url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();
    info!("Loaded configuration");

    let files = match (cli.log, cli.dir) {
        (Some(log), _) => {
            if !log.is_file() {
                return Err(IngestError::Configuration(format!(
                    "log file not found: {}",
                    log.display()
                ))
                .into());
            }
            vec![log]
        }
        (None, Some(dir)) => log_files_in(&dir)?,
        (None, None) => {
            return Err(IngestError::Configuration("specify --log or --dir".to_string()).into())
        }
    };

    let mut from = day_timestamp(cli.from.as_deref())?;
    let to = day_timestamp(cli.to.as_deref())?;
    let settings = config.ingest_settings()?;

    let store = storage::connect(&config.database).await?;
    let mut engine = IngestionEngine::new(store, files.as_slice(), settings).await?;

    if cli.from_last_date {
        if from.is_some() {
            info!("Ignoring --from-last-date because --from is specified");
        } else {
            match engine.last_processed_date().await? {
                Some(last) => {
                    info!("Resuming from the last processed date {}", last);
                    from = Some(day_start_timestamp(last));
                }
                None => info!("Ignoring --from-last-date because the database is empty"),
            }
        }
    }

    let outcome = engine.parse(from, to, cli.ignore_bad_lines).await?;
    if outcome.stop == StopReason::NoMatchingEntries {
        warn!("Nothing to do: no log entries in the requested range");
    }
    info!(
        "Read {} lines ({} malformed), stored {} day(s)",
        outcome.lines_read, outcome.malformed_lines, outcome.days_flushed
    );
    info!("Done.");

    if let Some(peak) = peak_memory_kib() {
        info!("Peak memory usage: {:.2} MiB", peak as f64 / 1024.0);
    }

    Ok(())
}

fn backend_for_url(url: &str) -> DatabaseBackend {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        DatabaseBackend::Postgres
    } else {
        DatabaseBackend::Sqlite
    }
}

fn log_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(IngestError::Configuration(format!(
            "directory not found: {}",
            dir.display()
        ))
        .into());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "log") {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(IngestError::Configuration(format!(
            "{} contains no .log files",
            dir.display()
        ))
        .into());
    }
    Ok(files)
}

fn day_timestamp(raw: Option<&str>) -> Result<Option<i64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let day = parse_day(raw).map_err(|err| IngestError::Configuration(err.to_string()))?;
    Ok(Some(day_start_timestamp(day)))
}

/// Peak resident set size from `/proc/self/status`, Linux only
fn peak_memory_kib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
}
