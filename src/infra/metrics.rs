//! Lock-free run metrics
//!
//! Shard workers record into a shared `Arc<Metrics>`; `report()` takes one
//! consistent snapshot at the end of the run.
//!
//! NOTE: Counters use Relaxed ordering. They feed the run summary only and
//! must not drive pipeline decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Per-vessel processing latency bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const LATENCY_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

/// Time-to-berth bucket boundaries (hours)
/// Buckets: ≤1, ≤2, ≤4, ≤8, ≤16, ≤32, ≤64, ≤128, ≤256, ≤512, >512
const TTB_BOUNDS: [f64; 10] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0];
const NUM_BUCKETS: usize = 11;

#[inline]
fn latency_bucket_index(latency_us: u64) -> usize {
    LATENCY_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn ttb_bucket_index(hours: f64) -> usize {
    TTB_BOUNDS.partition_point(|&bound| bound < hours)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from latency buckets
/// Returns the upper bound of the bucket containing the percentile
fn latency_percentile(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return UPPER_BOUNDS[i];
        }
    }
    UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Why the normalizer dropped an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    OutOfWindow,
    PortFiltered,
    InvalidVessel,
    InactiveZone,
    Duplicate,
}

/// Lock-free metrics collector
pub struct Metrics {
    events_read: AtomicU64,
    events_malformed: AtomicU64,
    events_kept: AtomicU64,
    dropped_out_of_window: AtomicU64,
    dropped_port_filtered: AtomicU64,
    dropped_invalid_vessel: AtomicU64,
    dropped_inactive_zone: AtomicU64,
    dropped_duplicate: AtomicU64,
    /// Events whose zone had no registry entry (treated as OTHER)
    unknown_zone_events: AtomicU64,
    configuration_errors: AtomicU64,
    sessions_created: AtomicU64,
    sessions_open: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_incomplete: AtomicU64,
    calls_completed: AtomicU64,
    calls_censored: AtomicU64,
    calls_anomaly: AtomicU64,
    labels_emitted: AtomicU64,
    labels_skipped_leakage: AtomicU64,
    labels_skipped_no_basin: AtomicU64,
    features_rejected: AtomicU64,
    vessels_processed: AtomicU64,
    vessels_failed: AtomicU64,
    ttb_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of non-negative TTB values in thousandths of an hour
    ttb_sum_millihours: AtomicU64,
    vessel_latency_buckets: [AtomicU64; NUM_BUCKETS],
    vessel_latency_sum_us: AtomicU64,
    vessel_latency_max_us: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_read: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            events_kept: AtomicU64::new(0),
            dropped_out_of_window: AtomicU64::new(0),
            dropped_port_filtered: AtomicU64::new(0),
            dropped_invalid_vessel: AtomicU64::new(0),
            dropped_inactive_zone: AtomicU64::new(0),
            dropped_duplicate: AtomicU64::new(0),
            unknown_zone_events: AtomicU64::new(0),
            configuration_errors: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_open: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_incomplete: AtomicU64::new(0),
            calls_completed: AtomicU64::new(0),
            calls_censored: AtomicU64::new(0),
            calls_anomaly: AtomicU64::new(0),
            labels_emitted: AtomicU64::new(0),
            labels_skipped_leakage: AtomicU64::new(0),
            labels_skipped_no_basin: AtomicU64::new(0),
            features_rejected: AtomicU64::new(0),
            vessels_processed: AtomicU64::new(0),
            vessels_failed: AtomicU64::new(0),
            ttb_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ttb_sum_millihours: AtomicU64::new(0),
            vessel_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            vessel_latency_sum_us: AtomicU64::new(0),
            vessel_latency_max_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_events_read(&self, count: u64) {
        self.events_read.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_malformed(&self) {
        self.events_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_events_kept(&self, count: u64) {
        self.events_kept.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, reason: DropReason, count: u64) {
        let counter = match reason {
            DropReason::OutOfWindow => &self.dropped_out_of_window,
            DropReason::PortFiltered => &self.dropped_port_filtered,
            DropReason::InvalidVessel => &self.dropped_invalid_vessel,
            DropReason::InactiveZone => &self.dropped_inactive_zone,
            DropReason::Duplicate => &self.dropped_duplicate,
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_zone_events(&self, count: u64) {
        self.unknown_zone_events.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_configuration_errors(&self, count: u64) {
        self.configuration_errors.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session(&self, closed: bool) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        if closed {
            self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sessions_open.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_session_incomplete(&self) {
        self.sessions_incomplete.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finalized call and its time-to-berth, if any
    #[inline]
    pub fn record_call(&self, censored: bool, anomaly: bool, ttb_hours: Option<f64>) {
        if censored {
            self.calls_censored.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_completed.fetch_add(1, Ordering::Relaxed);
        }
        if anomaly {
            self.calls_anomaly.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(hours) = ttb_hours.filter(|h| h.is_finite() && *h >= 0.0) {
            self.ttb_buckets[ttb_bucket_index(hours)].fetch_add(1, Ordering::Relaxed);
            self.ttb_sum_millihours.fetch_add((hours * 1000.0).round() as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_label_emitted(&self) {
        self.labels_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_label_leakage(&self) {
        self.labels_skipped_leakage.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_label_no_basin(&self) {
        self.labels_skipped_no_basin.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_feature_rejected(&self) {
        self.features_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one vessel partition processed with given latency
    #[inline]
    pub fn record_vessel_processed(&self, latency_us: u64) {
        self.vessels_processed.fetch_add(1, Ordering::Relaxed);
        self.vessel_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.vessel_latency_buckets[latency_bucket_index(latency_us)]
            .fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.vessel_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_vessel_failed(&self) {
        self.vessels_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn vessels_failed(&self) -> u64 {
        self.vessels_failed.load(Ordering::Relaxed)
    }

    /// Take a snapshot of every counter
    pub fn report(&self) -> RunSummary {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);

        let latency_buckets = load_buckets(&self.vessel_latency_buckets);
        let vessels_processed = load(&self.vessels_processed);
        let latency_sum = load(&self.vessel_latency_sum_us);

        RunSummary {
            events_read: load(&self.events_read),
            events_malformed: load(&self.events_malformed),
            events_kept: load(&self.events_kept),
            dropped_out_of_window: load(&self.dropped_out_of_window),
            dropped_port_filtered: load(&self.dropped_port_filtered),
            dropped_invalid_vessel: load(&self.dropped_invalid_vessel),
            dropped_inactive_zone: load(&self.dropped_inactive_zone),
            dropped_duplicate: load(&self.dropped_duplicate),
            unknown_zone_events: load(&self.unknown_zone_events),
            configuration_errors: load(&self.configuration_errors),
            sessions_created: load(&self.sessions_created),
            sessions_open: load(&self.sessions_open),
            sessions_closed: load(&self.sessions_closed),
            sessions_incomplete: load(&self.sessions_incomplete),
            calls_completed: load(&self.calls_completed),
            calls_censored: load(&self.calls_censored),
            calls_anomaly: load(&self.calls_anomaly),
            labels_emitted: load(&self.labels_emitted),
            labels_skipped_leakage: load(&self.labels_skipped_leakage),
            labels_skipped_no_basin: load(&self.labels_skipped_no_basin),
            features_rejected: load(&self.features_rejected),
            vessels_processed,
            vessels_failed: load(&self.vessels_failed),
            ttb_buckets: load_buckets(&self.ttb_buckets),
            ttb_hours_sum: load(&self.ttb_sum_millihours) as f64 / 1000.0,
            vessel_latency_buckets: latency_buckets,
            vessel_latency_avg_us: if vessels_processed > 0 {
                latency_sum / vessels_processed
            } else {
                0
            },
            vessel_latency_max_us: load(&self.vessel_latency_max_us),
            vessel_latency_p99_us: latency_percentile(&latency_buckets, 0.99),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for the Prometheus renderer)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_LATENCY_BOUNDS: [u64; 10] = LATENCY_BOUNDS;
pub const METRICS_TTB_BOUNDS: [f64; 10] = TTB_BOUNDS;

/// Counters for one processing run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub events_read: u64,
    pub events_malformed: u64,
    pub events_kept: u64,
    pub dropped_out_of_window: u64,
    pub dropped_port_filtered: u64,
    pub dropped_invalid_vessel: u64,
    pub dropped_inactive_zone: u64,
    pub dropped_duplicate: u64,
    pub unknown_zone_events: u64,
    pub configuration_errors: u64,
    pub sessions_created: u64,
    pub sessions_open: u64,
    pub sessions_closed: u64,
    pub sessions_incomplete: u64,
    pub calls_completed: u64,
    pub calls_censored: u64,
    pub calls_anomaly: u64,
    pub labels_emitted: u64,
    pub labels_skipped_leakage: u64,
    pub labels_skipped_no_basin: u64,
    pub features_rejected: u64,
    pub vessels_processed: u64,
    pub vessels_failed: u64,
    /// Time-to-berth histogram (hours)
    /// Bounds: ≤1, ≤2, ≤4, ≤8, ≤16, ≤32, ≤64, ≤128, ≤256, ≤512, >512
    pub ttb_buckets: [u64; NUM_BUCKETS],
    pub ttb_hours_sum: f64,
    pub vessel_latency_buckets: [u64; NUM_BUCKETS],
    pub vessel_latency_avg_us: u64,
    pub vessel_latency_max_us: u64,
    pub vessel_latency_p99_us: u64,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            events_read = %self.events_read,
            events_kept = %self.events_kept,
            events_malformed = %self.events_malformed,
            configuration_errors = %self.configuration_errors,
            sessions = %self.sessions_created,
            sessions_open = %self.sessions_open,
            incomplete = %self.sessions_incomplete,
            completed = %self.calls_completed,
            censored = %self.calls_censored,
            anomalies = %self.calls_anomaly,
            labels = %self.labels_emitted,
            leakage_skipped = %self.labels_skipped_leakage,
            vessels_failed = %self.vessels_failed,
            p99_us = %self.vessel_latency_p99_us,
            elapsed_ms = %self.elapsed_ms,
            "run_summary"
        );
    }
}
