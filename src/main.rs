//! CLI entry point for the transit recorder.
//!
//! `record` polls the vehicle-location feed for a set of routes until the
//! process is interrupted; `export` turns a stored time window into one JSON
//! timeline per route.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use transit_recorder::{
    config::Config,
    export::{Exporter, TimeWindow},
    fetch::BasicClient,
    nextbus::NextbusClient,
    output::{export_path, write_records},
    recorder::CursorPolicy,
    scheduler::Scheduler,
    shutdown,
    storage::SqliteStore,
};

#[derive(Parser)]
#[command(name = "transit_recorder")]
#[command(about = "Record transit vehicle locations and export replayable windows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the vehicle feed for each route until interrupted
    Record {
        /// Comma-separated list of routes to record
        #[arg(long, value_delimiter = ',', required = true)]
        routes: Vec<String>,

        /// SQLite database to write to (overrides DATABASE_PATH)
        #[arg(long)]
        database: Option<PathBuf>,

        /// require-decode or advance-on-decode-error (overrides CURSOR_POLICY)
        #[arg(long)]
        cursor_policy: Option<CursorPolicy>,
    },
    /// Export recorded locations in a time window to records-<route>.json
    Export {
        /// Comma-separated list of routes to export
        #[arg(long, value_delimiter = ',', required = true)]
        routes: Vec<String>,

        /// Window start, RFC 3339 (e.g. 2023-04-30T12:00:00Z)
        #[arg(long, value_parser = parse_rfc3339)]
        start: DateTime<Utc>,

        /// Window end, RFC 3339, inclusive
        #[arg(long, value_parser = parse_rfc3339)]
        end: DateTime<Utc>,

        /// Directory to write export files to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// SQLite database to read from (overrides DATABASE_PATH)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time such as 2023-04-30T12:00:00Z: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/transit_recorder.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("transit_recorder.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("RUST_LOG")
                .from_env_lossy(),
        );

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::DEBUG.into())
                .with_env_var("RUST_LOG_JSON")
                .from_env_lossy(),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Record {
            routes,
            database,
            cursor_policy,
        } => {
            if let Some(database) = database {
                config.database_path = database;
            }
            if let Some(policy) = cursor_policy {
                config.cursor_policy = policy;
            }
            record(&config, normalize_routes(routes)?).await?;
        }
        Commands::Export {
            routes,
            start,
            end,
            output_dir,
            database,
        } => {
            if let Some(database) = database {
                config.database_path = database;
            }
            let window = TimeWindow::new(start, end)?;
            export(&config, &normalize_routes(routes)?, &window, &output_dir)?;
        }
    }

    Ok(())
}

fn normalize_routes(routes: Vec<String>) -> Result<Vec<String>> {
    let routes: Vec<String> = routes
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if routes.is_empty() {
        bail!("at least one route must be specified");
    }
    Ok(routes)
}

/// Records every route until SIGINT/SIGTERM, then waits for all recorders
/// to wind down.
#[tracing::instrument(skip(config), fields(database = %config.database_path.display()))]
async fn record(config: &Config, routes: Vec<String>) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let http = BasicClient::with_timeout(config.request_timeout)?;
    let feed = NextbusClient::new(http, &config.feed_url, &config.agency);
    info!(
        update_url = %feed.update_url(),
        cursor_policy = %config.cursor_policy,
        poll_secs = config.poll_interval.as_secs(),
        "Starting recorders"
    );

    let scheduler = Scheduler::new(Arc::new(feed), Arc::new(store), config.recorder_settings());
    let (trigger, listener) = shutdown::channel();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => info!(signal, "Received signal, stopping ongoing recordings"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signals, stopping"),
        }
        trigger.fire();
    });

    let reports = scheduler.run(&routes, listener).await;
    for report in reports.iter().filter(|r| !r.is_cancelled()) {
        warn!(route_tag = %report.route_tag, "Route was not recorded to the end");
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

/// Writes one export file per route; the first failing route aborts.
#[tracing::instrument(
    skip(config, window),
    fields(start = %window.start(), end = %window.end(), output_dir = %output_dir.display())
)]
fn export(config: &Config, routes: &[String], window: &TimeWindow, output_dir: &Path) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    let exporter = Exporter::new(Arc::new(store));

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    for route in routes {
        let records = exporter
            .export(route, window)
            .with_context(|| format!("exporting route {route}"))?;
        info!(route_tag = %route, records = records.len(), "records");

        write_records(&export_path(output_dir, route), &records)?;
    }

    info!("done");
    Ok(())
}
