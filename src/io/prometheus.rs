//! Prometheus textfile export
//!
//! Renders a run summary in Prometheus text exposition format for the node
//! exporter textfile collector. The file is written to a temp sibling and
//! renamed so the collector never reads a partial file.

use crate::infra::metrics::{
    RunSummary, METRICS_LATENCY_BOUNDS, METRICS_NUM_BUCKETS, METRICS_TTB_BOUNDS,
};
use anyhow::{Context, Result};
use std::fmt::{Display, Write};
use std::path::Path;
use tracing::info;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a counter broken down by one label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    label: &str,
    values: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value, count) in values {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram<B: Display>(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[B],
    sum: impl Display,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format a run summary in Prometheus text exposition format
pub fn format_run_metrics(summary: &RunSummary, site_id: &str) -> String {
    let mut output = String::with_capacity(8192);

    write_event_metrics(&mut output, site_id, summary);
    write_session_metrics(&mut output, site_id, summary);
    write_call_metrics(&mut output, site_id, summary);
    write_label_metrics(&mut output, site_id, summary);
    write_vessel_metrics(&mut output, site_id, summary);

    output
}

fn write_event_metrics(output: &mut String, site: &str, summary: &RunSummary) {
    write_metric(
        output,
        "port_calls_events_read_total",
        "Zone events read from input",
        MetricType::Counter,
        site,
        summary.events_read,
    );
    write_metric(
        output,
        "port_calls_events_malformed_total",
        "Input lines that failed to parse",
        MetricType::Counter,
        site,
        summary.events_malformed,
    );
    write_metric(
        output,
        "port_calls_events_kept_total",
        "Zone events kept after normalization",
        MetricType::Counter,
        site,
        summary.events_kept,
    );
    write_labeled_counter(
        output,
        "port_calls_events_dropped_total",
        "Zone events dropped during normalization",
        site,
        "reason",
        &[
            ("out_of_window", summary.dropped_out_of_window),
            ("port_filtered", summary.dropped_port_filtered),
            ("invalid_vessel", summary.dropped_invalid_vessel),
            ("inactive_zone", summary.dropped_inactive_zone),
            ("duplicate", summary.dropped_duplicate),
        ],
    );
    write_metric(
        output,
        "port_calls_unknown_zone_events_total",
        "Events in zones missing from the catalog",
        MetricType::Counter,
        site,
        summary.unknown_zone_events,
    );
    write_metric(
        output,
        "port_calls_configuration_errors_total",
        "Zone catalog conflicts reported during the run",
        MetricType::Counter,
        site,
        summary.configuration_errors,
    );
}

fn write_session_metrics(output: &mut String, site: &str, summary: &RunSummary) {
    write_metric(
        output,
        "port_calls_sessions_total",
        "Sessions built",
        MetricType::Counter,
        site,
        summary.sessions_created,
    );
    write_metric(
        output,
        "port_calls_sessions_open",
        "Sessions still open at window end",
        MetricType::Gauge,
        site,
        summary.sessions_open,
    );
    write_metric(
        output,
        "port_calls_sessions_incomplete_total",
        "Sessions dropped without role timestamps",
        MetricType::Counter,
        site,
        summary.sessions_incomplete,
    );
}

fn write_call_metrics(output: &mut String, site: &str, summary: &RunSummary) {
    write_labeled_counter(
        output,
        "port_calls_finalized_total",
        "Finalized port calls",
        site,
        "outcome",
        &[("completed", summary.calls_completed), ("censored", summary.calls_censored)],
    );
    write_metric(
        output,
        "port_calls_zone_order_anomaly_total",
        "Calls whose role stamps needed clamping",
        MetricType::Counter,
        site,
        summary.calls_anomaly,
    );
    write_histogram(
        output,
        "port_calls_time_to_berth_hours",
        "Observed time to berth in hours",
        site,
        &summary.ttb_buckets,
        &METRICS_TTB_BOUNDS,
        summary.ttb_hours_sum,
    );
}

fn write_label_metrics(output: &mut String, site: &str, summary: &RunSummary) {
    write_metric(
        output,
        "port_calls_labels_emitted_total",
        "Training labels emitted",
        MetricType::Counter,
        site,
        summary.labels_emitted,
    );
    write_labeled_counter(
        output,
        "port_calls_labels_skipped_total",
        "Calls without an emitted label",
        site,
        "reason",
        &[
            ("leakage", summary.labels_skipped_leakage),
            ("no_basin", summary.labels_skipped_no_basin),
        ],
    );
    write_metric(
        output,
        "port_calls_features_rejected_total",
        "Features rejected at the horizon cutoff",
        MetricType::Counter,
        site,
        summary.features_rejected,
    );
}

fn write_vessel_metrics(output: &mut String, site: &str, summary: &RunSummary) {
    write_metric(
        output,
        "port_calls_vessels_processed_total",
        "Vessel partitions processed",
        MetricType::Counter,
        site,
        summary.vessels_processed,
    );
    write_metric(
        output,
        "port_calls_vessels_failed_total",
        "Vessel partitions that failed",
        MetricType::Counter,
        site,
        summary.vessels_failed,
    );

    let latency_count: u64 = summary.vessel_latency_buckets.iter().sum();
    write_histogram(
        output,
        "port_calls_vessel_latency_us",
        "Per-vessel processing latency in microseconds",
        site,
        &summary.vessel_latency_buckets,
        &METRICS_LATENCY_BOUNDS,
        summary.vessel_latency_avg_us * latency_count,
    );
    write_metric(
        output,
        "port_calls_vessel_latency_p99_us",
        "99th percentile per-vessel latency",
        MetricType::Gauge,
        site,
        summary.vessel_latency_p99_us,
    );
    write_metric(
        output,
        "port_calls_run_elapsed_ms",
        "Wall time of the last run",
        MetricType::Gauge,
        site,
        summary.elapsed_ms,
    );
}

/// Render and atomically replace the textfile at `path`
pub fn write_textfile(path: &Path, summary: &RunSummary, site_id: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let body = format_run_metrics(summary, site_id);
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, &body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;

    info!(file = %path.display(), bytes = %body.len(), "metrics_textfile_written");
    Ok(())
}
