//! Port call engine - batch run over a window of zone events
//!
//! Module structure:
//! - `domain/` - Core types (ZoneEvent, PortCallSession, PortCall, Label)
//! - `io/` - Event and catalog readers, upsert store, metrics textfile
//! - `services/` - Normalizer, sessions, roles, finalizer, labels, pipeline
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use port_calls::domain::types::PortCode;
use port_calls::infra::config::MAX_LOOKBACK_DAYS;
use port_calls::infra::{Config, Metrics};
use port_calls::io::{read_catalog, read_events, RunRecord, Store};
use port_calls::services::{Pipeline, RunParams, ZoneRoleRegistry};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Port call engine - sessions, port calls and TTB labels from zone events
#[derive(Parser, Debug)]
#[command(name = "port-calls", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Events JSONL file (overrides [input].events_file)
    #[arg(long)]
    events: Option<String>,

    /// Comma-separated port codes; all catalog ports when omitted
    #[arg(long, value_delimiter = ',')]
    ports: Vec<String>,

    /// Window start (RFC 3339); defaults to the last checkpoint
    #[arg(long, value_parser = parse_timestamp)]
    since: Option<DateTime<Utc>>,

    /// Window end (RFC 3339); defaults to now
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<DateTime<Utc>>,

    /// Evaluation snapshot for censoring; defaults to --until
    #[arg(long, value_parser = parse_timestamp)]
    snapshot: Option<DateTime<Utc>>,

    /// Days of context read before --since
    #[arg(long)]
    lookback_days: Option<u32>,

    /// Run the pipeline without writing any output
    #[arg(long)]
    dry_run: bool,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp {raw:?}: {e}"))
}

fn load_registry(config: &Config) -> Result<ZoneRoleRegistry> {
    let mut zones = config.zones().to_vec();
    if let Some(catalog) = config.catalog_file() {
        zones.extend(read_catalog(Path::new(catalog))?);
    }
    ZoneRoleRegistry::from_configs(zones).context("Zone role registry unavailable")
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides, default INFO
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        default_gap_h = %(config.default_gap().num_minutes() as f64 / 60.0),
        port_overrides = %config.port_gaps().len(),
        workers = %config.worker_count(),
        features = %config.features_enabled(),
        egress_dir = %config.egress_dir(),
        "config_loaded"
    );

    let registry = Arc::new(load_registry(&config)?);
    let store = Store::new(config.egress_dir());

    let until = args.until.unwrap_or_else(Utc::now);
    let since = match args.since {
        Some(since) => since,
        None => match store.load_checkpoint()? {
            Some(checkpoint) => checkpoint.last_until,
            None => until
                .checked_sub_signed(Duration::days(i64::from(config.since_days())))
                .context("window.since_days reaches before the representable time range")?,
        },
    };
    if since > until {
        bail!("Window start {since} is after window end {until}");
    }
    let lookback_days = args.lookback_days.unwrap_or(config.lookback_days());
    if lookback_days > MAX_LOOKBACK_DAYS {
        bail!("--lookback-days must be at most {MAX_LOOKBACK_DAYS}");
    }
    let params = RunParams {
        since,
        until,
        snapshot: args.snapshot.unwrap_or(until),
        lookback: Duration::days(i64::from(lookback_days)),
        ports: args
            .ports
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| PortCode::new(p))
            .collect::<BTreeSet<_>>(),
    };

    let metrics = Arc::new(Metrics::new());
    let events_file = args.events.as_deref().unwrap_or(config.events_file());
    let events = read_events(Path::new(events_file), &metrics)?;

    info!(
        since = %params.since,
        until = %params.until,
        snapshot = %params.snapshot,
        ports = ?params.ports,
        events = %events.len(),
        dry_run = %args.dry_run,
        "run_started"
    );

    let pipeline = Pipeline::new(&config, registry, metrics);
    let output = tokio::select! {
        result = pipeline.run(events, &params) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("run_cancelled");
            bail!("Run cancelled before commit");
        }
    };

    output.summary.log();

    if args.dry_run {
        info!(port_calls = %output.port_calls.len(), labels = %output.labels.len(), "dry_run_done");
        return Ok(());
    }

    let record = RunRecord {
        site_id: config.site_id().to_string(),
        since: params.since,
        until: params.until,
        snapshot: params.snapshot,
        summary: output.summary.clone(),
    };
    let stats = store.commit(&output, &record).context("Failed to commit run output")?;

    if let Some(textfile) = config.metrics_textfile() {
        port_calls::io::prometheus::write_textfile(
            Path::new(textfile),
            &output.summary,
            config.site_id(),
        )?;
    }

    info!(
        port_calls_total = %stats.port_calls_total,
        port_calls_upserted = %stats.port_calls_upserted,
        port_calls_removed = %stats.port_calls_removed,
        labels_total = %stats.labels_total,
        configuration_errors = %output.configuration_errors.len(),
        "port-calls run complete"
    );
    Ok(())
}
