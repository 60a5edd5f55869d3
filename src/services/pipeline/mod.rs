//! Run orchestration
//!
//! Normalizes the batch once, then shards vessels by hash across blocking
//! workers. Each vessel is processed sequentially by exactly one worker and
//! results are merged into ordered maps, so output does not depend on shard
//! scheduling. A failing vessel is logged and counted without affecting the
//! rest of the run.
//!
//! Every call of a covered port is recomputed from `since - lookback`, so the
//! output carries a `ReplaceScope` telling the store which stored calls it
//! supersedes.

mod vessel;

pub use vessel::VesselOutcome;

use crate::domain::error::PortCallError;
use crate::domain::port_call::{CallKey, Label, PortCall, ResolvedEvent};
use crate::domain::types::{PortCode, VesselId, ZoneEvent};
use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, RunSummary};
use crate::services::features::{FeatureSnapshotBuilder, PresenceIndex};
use crate::services::normalizer::{normalize, NormalizeParams, NormalizedBatch};
use crate::services::registry::ZoneRoleRegistry;
use crate::services::session_builder::SessionBuilder;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{info, warn};

/// Window and snapshot for one run
#[derive(Debug, Clone)]
pub struct RunParams {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Evaluation snapshot used for censoring; normally equal to `until`
    pub snapshot: DateTime<Utc>,
    pub lookback: Duration,
    /// Empty means every port in the registry
    pub ports: BTreeSet<PortCode>,
}

/// Stored calls superseded by a run: sessions starting at or after `from`
/// in one of `ports`. The default scope covers nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaceScope {
    pub from: DateTime<Utc>,
    pub ports: BTreeSet<PortCode>,
}

impl ReplaceScope {
    pub fn covers(&self, call: &PortCall) -> bool {
        call.session_start_utc >= self.from && self.ports.contains(&call.port_code)
    }
}

#[derive(Debug, Default)]
pub struct RunOutput {
    pub port_calls: BTreeMap<CallKey, PortCall>,
    /// Keyed by port_call_ref
    pub labels: BTreeMap<String, Label>,
    pub replace: ReplaceScope,
    /// Catalog repairs, unknown zones and ambiguous tie-breaks
    pub configuration_errors: Vec<PortCallError>,
    pub vessel_failures: Vec<PortCallError>,
    pub summary: RunSummary,
}

/// Everything a shard worker needs, cheap to clone into each task
#[derive(Clone)]
pub(crate) struct ShardContext {
    session_builder: SessionBuilder,
    until: DateTime<Utc>,
    snapshot: DateTime<Utc>,
    features: Option<Arc<FeatureSnapshotBuilder>>,
    metrics: Arc<Metrics>,
}

type ShardResults = Vec<(VesselId, Result<VesselOutcome, PortCallError>)>;

pub struct Pipeline {
    registry: Arc<ZoneRoleRegistry>,
    session_builder: SessionBuilder,
    metrics: Arc<Metrics>,
    validate_mmsi: bool,
    features_enabled: bool,
    feature_windows_min: Vec<u32>,
    worker_count: usize,
}

/// Stable shard index for a vessel
fn shard_of(vessel_id: &VesselId, shards: usize) -> usize {
    let mut hasher = FxHasher::default();
    vessel_id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

impl Pipeline {
    pub fn new(config: &Config, registry: Arc<ZoneRoleRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            registry,
            session_builder: SessionBuilder::from_config(config),
            metrics,
            validate_mmsi: config.validate_mmsi(),
            features_enabled: config.features_enabled(),
            feature_windows_min: config.feature_windows_min().to_vec(),
            worker_count: config.worker_count().max(1),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn prepare(
        &self,
        events: Vec<ZoneEvent>,
        params: &RunParams,
    ) -> (NormalizedBatch, ShardContext, RunOutput) {
        let normalize_params = NormalizeParams {
            since: params.since,
            until: params.until,
            lookback: params.lookback,
            ports: params.ports.clone(),
            validate_mmsi: self.validate_mmsi,
        };
        let mut batch = normalize(events, &self.registry, &normalize_params);
        batch.stats.record(&self.metrics);

        let mut configuration_errors = self.registry.repairs().to_vec();
        configuration_errors.append(&mut batch.configuration_errors);
        self.metrics.record_configuration_errors(configuration_errors.len() as u64);

        let ports =
            if params.ports.is_empty() { self.registry.ports().clone() } else { params.ports.clone() };
        let output = RunOutput {
            replace: ReplaceScope { from: normalize_params.window_start(), ports },
            configuration_errors,
            ..RunOutput::default()
        };

        let features = self.features_enabled.then(|| {
            let index = PresenceIndex::from_events(&batch.vessels);
            Arc::new(FeatureSnapshotBuilder::new(index, &self.feature_windows_min))
        });

        let ctx = ShardContext {
            session_builder: self.session_builder.clone(),
            until: params.until,
            snapshot: params.snapshot,
            features,
            metrics: self.metrics.clone(),
        };
        (batch, ctx, output)
    }

    /// Process the batch on the current thread
    pub fn run_sequential(&self, events: Vec<ZoneEvent>, params: &RunParams) -> RunOutput {
        let (batch, ctx, mut output) = self.prepare(events, params);
        let vessels = batch.vessels.len();

        let results: ShardResults = batch
            .vessels
            .into_iter()
            .map(|(vessel_id, events)| {
                let result = ctx.process_vessel(&vessel_id, events);
                (vessel_id, result)
            })
            .collect();

        self.merge(&mut output, results);
        self.finish(output, vessels)
    }

    /// Process the batch sharded across blocking worker tasks
    pub async fn run(
        &self,
        events: Vec<ZoneEvent>,
        params: &RunParams,
    ) -> anyhow::Result<RunOutput> {
        let (batch, ctx, mut output) = self.prepare(events, params);
        let vessels = batch.vessels.len();

        let mut shards: Vec<Vec<(VesselId, Vec<ResolvedEvent>)>> =
            (0..self.worker_count).map(|_| Vec::new()).collect();
        for (vessel_id, events) in batch.vessels {
            shards[shard_of(&vessel_id, self.worker_count)].push((vessel_id, events));
        }

        let handles: Vec<_> = shards
            .into_iter()
            .filter(|shard| !shard.is_empty())
            .map(|shard| {
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || -> ShardResults {
                    shard
                        .into_iter()
                        .map(|(vessel_id, events)| {
                            let result = ctx.process_vessel(&vessel_id, events);
                            (vessel_id, result)
                        })
                        .collect()
                })
            })
            .collect();

        for handle in handles {
            let results = handle.await.context("shard worker failed")?;
            self.merge(&mut output, results);
        }
        Ok(self.finish(output, vessels))
    }

    fn merge(&self, output: &mut RunOutput, results: ShardResults) {
        for (vessel_id, result) in results {
            match result {
                Ok(mut outcome) => {
                    self.metrics
                        .record_configuration_errors(outcome.configuration_errors.len() as u64);
                    output.configuration_errors.append(&mut outcome.configuration_errors);
                    for call in outcome.calls {
                        output.port_calls.insert(call.key(), call);
                    }
                    for label in outcome.labels {
                        output.labels.insert(label.port_call_ref.clone(), label);
                    }
                }
                Err(err) => {
                    warn!(vessel_id = %vessel_id, error = %err, "vessel_failed");
                    self.metrics.record_vessel_failed();
                    output.vessel_failures.push(err);
                }
            }
        }
    }

    fn finish(&self, mut output: RunOutput, vessels: usize) -> RunOutput {
        output.summary = self.metrics.report();
        info!(
            vessels = %vessels,
            port_calls = %output.port_calls.len(),
            labels = %output.labels.len(),
            configuration_errors = %output.configuration_errors.len(),
            failed = %output.vessel_failures.len(),
            "pipeline_complete"
        );
        output
    }
}
