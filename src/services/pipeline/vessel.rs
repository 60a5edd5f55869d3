//! Per-vessel processing
//!
//! One vessel partition runs start to finish on a single worker: sessions,
//! role stamps, finalized calls, labels and their feature snapshots.

use super::ShardContext;
use crate::domain::error::PortCallError;
use crate::domain::port_call::{Label, PortCall, ResolvedEvent};
use crate::domain::types::VesselId;
use crate::services::finalizer::finalize;
use crate::services::label_emitter::emit_label;
use crate::services::role_assigner::assign_roles;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct VesselOutcome {
    pub calls: Vec<PortCall>,
    pub labels: Vec<Label>,
    pub configuration_errors: Vec<PortCallError>,
}

impl ShardContext {
    pub(crate) fn process_vessel(
        &self,
        vessel_id: &VesselId,
        events: Vec<ResolvedEvent>,
    ) -> Result<VesselOutcome, PortCallError> {
        let started = Instant::now();
        let metrics = &self.metrics;
        let sessions = self.session_builder.build(events, self.until)?;
        let mut outcome = VesselOutcome::default();

        for mut session in sessions {
            metrics.record_session(session.is_closed());
            outcome.configuration_errors.extend(assign_roles(&mut session));

            let call = match finalize(&mut session, self.snapshot) {
                Ok(call) => call,
                Err(err) => {
                    debug!(vessel_id = %vessel_id, error = %err, "session_dropped");
                    metrics.record_session_incomplete();
                    continue;
                }
            };
            metrics.record_call(call.censored, call.zone_order_anomaly, call.time_to_berth_hours);

            match emit_label(&call) {
                Ok(Some(mut label)) => {
                    if let Some(features) = &self.features {
                        for _ in features.attach(&mut label) {
                            metrics.record_feature_rejected();
                        }
                    }
                    metrics.record_label_emitted();
                    outcome.labels.push(label);
                }
                Ok(None) => metrics.record_label_no_basin(),
                Err(err) => {
                    warn!(vessel_id = %vessel_id, error = %err, "label_skipped");
                    metrics.record_label_leakage();
                }
            }
            outcome.calls.push(call);
        }

        metrics.record_vessel_processed(started.elapsed().as_micros() as u64);
        debug!(
            vessel_id = %vessel_id,
            calls = %outcome.calls.len(),
            labels = %outcome.labels.len(),
            "vessel_processed"
        );
        Ok(outcome)
    }
}
