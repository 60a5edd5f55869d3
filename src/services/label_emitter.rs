//! Leakage-safe training labels
//!
//! A completed call is labeled at its basin entry, a censored one at the
//! evaluation snapshot. The horizon cutoff always equals the label timestamp,
//! so nothing observed after basin entry can reach a completed call's label.

use crate::domain::error::PortCallError;
use crate::domain::port_call::{Label, PortCall, LABEL_TYPE_TTB};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

/// A candidate feature with the time its information became observable
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub name: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl Feature {
    pub fn new(name: impl Into<String>, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self { name: name.into(), value, observed_at }
    }
}

/// Admits features into a label only if they were observable by its cutoff
#[derive(Debug, Clone)]
pub struct HorizonGuard {
    port_call_ref: String,
    cutoff: DateTime<Utc>,
}

impl HorizonGuard {
    pub fn for_label(label: &Label) -> Self {
        Self { port_call_ref: label.port_call_ref.clone(), cutoff: label.horizon_cutoff_ts_utc }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    pub fn check(&self, feature: &Feature) -> Result<(), PortCallError> {
        if feature.observed_at > self.cutoff {
            return Err(PortCallError::LeakageViolation {
                port_call_ref: self.port_call_ref.clone(),
                reason: format!(
                    "feature {} observed at {} after cutoff {}",
                    feature.name, feature.observed_at, self.cutoff
                ),
            });
        }
        if !feature.value.is_finite() {
            return Err(PortCallError::LeakageViolation {
                port_call_ref: self.port_call_ref.clone(),
                reason: format!("feature {} is not finite", feature.name),
            });
        }
        Ok(())
    }

    /// Check every feature, inserting the admitted ones
    ///
    /// Returns the rejections; admitted features are kept even if others fail.
    pub fn admit(
        &self,
        features: &mut BTreeMap<String, f64>,
        candidates: Vec<Feature>,
    ) -> Vec<PortCallError> {
        let mut rejected = Vec::new();
        for feature in candidates {
            match self.check(&feature) {
                Ok(()) => {
                    features.insert(feature.name, feature.value);
                }
                Err(err) => {
                    warn!(error = %err, "feature_rejected");
                    rejected.push(err);
                }
            }
        }
        rejected
    }
}

fn violation(call: &PortCall, reason: String) -> PortCallError {
    PortCallError::LeakageViolation { port_call_ref: call.port_call_ref.clone(), reason }
}

/// Validate horizon consistency of a label against its call
pub fn validate(label: &Label, call: &PortCall) -> Result<(), PortCallError> {
    if label.horizon_cutoff_ts_utc != label.label_ts_utc {
        return Err(violation(call, "horizon cutoff differs from label timestamp".to_string()));
    }
    if let Some(basin) = call.basin_start_utc {
        if !call.censored && label.horizon_cutoff_ts_utc > basin {
            return Err(violation(
                call,
                format!("cutoff {} after basin entry {basin}", label.horizon_cutoff_ts_utc),
            ));
        }
        if call.censored && call.snapshot_utc < basin {
            return Err(violation(
                call,
                format!("snapshot {} before basin entry {basin}", call.snapshot_utc),
            ));
        }
    }
    if !label.observed_wait_hours.is_finite() || label.observed_wait_hours < 0.0 {
        return Err(violation(
            call,
            format!("observed wait {} is not a valid duration", label.observed_wait_hours),
        ));
    }
    Ok(())
}

/// Emit the label for a call
///
/// `Ok(None)` when the call never reached a basin (no observable horizon).
pub fn emit_label(call: &PortCall) -> Result<Option<Label>, PortCallError> {
    let Some(basin) = call.basin_start_utc else {
        return Ok(None);
    };
    let Some(wait) = call.time_to_berth_hours else {
        return Ok(None);
    };

    let label_ts = if call.censored { call.snapshot_utc } else { basin };
    let label = Label {
        port_call_ref: call.port_call_ref.clone(),
        vessel_id: call.vessel_id.clone(),
        port_code: call.port_code.clone(),
        label_type: LABEL_TYPE_TTB.to_string(),
        label_ts_utc: label_ts,
        observed_wait_hours: wait,
        censored: call.censored,
        horizon_cutoff_ts_utc: label_ts,
        zone_order_anomaly: call.zone_order_anomaly,
        features: BTreeMap::new(),
    };

    validate(&label, call)?;
    Ok(Some(label))
}
