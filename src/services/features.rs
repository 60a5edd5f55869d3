//! Feature snapshots at a label's horizon cutoff
//!
//! Calendar features plus congestion counts: distinct vessels present in the
//! port's QUEUE and BASIN zones during `(t - w, t]` for each configured
//! window, and the number of distinct vessels that arrived in the queue over
//! the last 24h. Presence comes from normalized ENTER/EXIT pairs, and an exit
//! later than `t` counts as still present because it was not yet observable
//! at `t`.

use crate::domain::error::PortCallError;
use crate::domain::port_call::{Label, ResolvedEvent};
use crate::domain::types::{EventKind, PortCode, VesselId, ZoneId, ZoneRole};
use crate::services::label_emitter::{Feature, HorizonGuard};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

const ARRIVALS_WINDOW_MIN: i64 = 24 * 60;

/// Feature name suffix for a window: whole hours as `6h`, otherwise `45m`
fn window_suffix(minutes: u32) -> String {
    if minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{minutes}m")
    }
}

fn window_start(t: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    t.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
struct Presence {
    vessel_id: VesselId,
    role: ZoneRole,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

/// Presence intervals per port, sorted by start
#[derive(Debug, Default)]
pub struct PresenceIndex {
    ports: FxHashMap<PortCode, Vec<Presence>>,
}

impl PresenceIndex {
    pub fn from_events(vessels: &BTreeMap<VesselId, Vec<ResolvedEvent>>) -> Self {
        let mut ports: FxHashMap<PortCode, Vec<Presence>> = FxHashMap::default();

        for events in vessels.values() {
            let mut open: FxHashMap<(&PortCode, &ZoneId), usize> = FxHashMap::default();
            let mut intervals: Vec<(PortCode, Presence)> = Vec::new();

            let staged =
                events.iter().filter(|e| matches!(e.role, ZoneRole::Queue | ZoneRole::Basin));
            for e in staged {
                let key = (&e.event.port_code, &e.event.zone_id);
                match e.event.event_type {
                    EventKind::Enter => {
                        if open.contains_key(&key) {
                            continue;
                        }
                        open.insert(key, intervals.len());
                        intervals.push((
                            e.event.port_code.clone(),
                            Presence {
                                vessel_id: e.event.vessel_id.clone(),
                                role: e.role,
                                start: e.event.timestamp,
                                end: None,
                            },
                        ));
                    }
                    EventKind::Exit => {
                        if let Some(idx) = open.remove(&key) {
                            intervals[idx].1.end = Some(e.event.timestamp);
                        }
                    }
                }
            }

            for (port, presence) in intervals {
                ports.entry(port).or_default().push(presence);
            }
        }

        for list in ports.values_mut() {
            list.sort_by(|a, b| {
                a.start.cmp(&b.start).then_with(|| a.vessel_id.cmp(&b.vessel_id))
            });
        }
        Self { ports }
    }

    /// Distinct vessels of `role` present in `(t - window, t]`, with the
    /// latest event time that contributed
    fn present(
        &self,
        port: &PortCode,
        role: ZoneRole,
        t: DateTime<Utc>,
        window: Duration,
    ) -> (usize, Option<DateTime<Utc>>) {
        let Some(list) = self.ports.get(port) else {
            return (0, None);
        };
        let from = window_start(t, window);
        let upto = list.partition_point(|p| p.start <= t);

        let mut vessels = FxHashSet::default();
        let mut latest: Option<DateTime<Utc>> = None;
        for p in list[..upto].iter().filter(|p| p.role == role) {
            let visible_end = p.end.filter(|end| *end <= t);
            if visible_end.is_some_and(|end| end <= from) {
                continue;
            }
            vessels.insert(&p.vessel_id);
            let seen = visible_end.unwrap_or(p.start).max(p.start);
            latest = Some(latest.map_or(seen, |l| l.max(seen)));
        }
        (vessels.len(), latest)
    }

    /// Distinct vessels whose `role` presence started in `(t - window, t]`
    fn arrivals(
        &self,
        port: &PortCode,
        role: ZoneRole,
        t: DateTime<Utc>,
        window: Duration,
    ) -> (usize, Option<DateTime<Utc>>) {
        let Some(list) = self.ports.get(port) else {
            return (0, None);
        };
        let from = window_start(t, window);
        let lo = list.partition_point(|p| p.start <= from);
        let hi = list.partition_point(|p| p.start <= t);

        let mut vessels = FxHashSet::default();
        let mut latest: Option<DateTime<Utc>> = None;
        for p in list[lo..hi].iter().filter(|p| p.role == role) {
            vessels.insert(&p.vessel_id);
            latest = Some(latest.map_or(p.start, |l| l.max(p.start)));
        }
        (vessels.len(), latest)
    }
}

pub struct FeatureSnapshotBuilder {
    index: PresenceIndex,
    /// (feature suffix, length), ascending and deduplicated
    windows: Vec<(String, Duration)>,
}

impl FeatureSnapshotBuilder {
    pub fn new(index: PresenceIndex, windows_min: &[u32]) -> Self {
        let mut minutes = windows_min.to_vec();
        minutes.sort_unstable();
        minutes.dedup();
        let windows = minutes
            .into_iter()
            .map(|m| (window_suffix(m), Duration::minutes(i64::from(m))))
            .collect();
        Self { index, windows }
    }

    /// Candidate features for a label, each stamped with its observation time
    pub fn candidates(&self, label: &Label) -> Vec<Feature> {
        let t = label.horizon_cutoff_ts_utc;
        let dow = t.weekday().num_days_from_sunday();

        let mut features = vec![
            Feature::new("hour_utc", f64::from(t.hour()), t),
            Feature::new("dow_utc", f64::from(dow), t),
            Feature::new("month_utc", f64::from(t.month()), t),
            Feature::new("is_weekend", if dow == 0 || dow == 6 { 1.0 } else { 0.0 }, t),
        ];

        for (suffix, window) in &self.windows {
            for (role, prefix) in [(ZoneRole::Queue, "queue"), (ZoneRole::Basin, "basin")] {
                let (count, latest) = self.index.present(&label.port_code, role, t, *window);
                features.push(Feature::new(
                    format!("{prefix}_vessels_{suffix}"),
                    count as f64,
                    latest.unwrap_or(t),
                ));
            }
        }

        let (arrivals, latest) = self.index.arrivals(
            &label.port_code,
            ZoneRole::Queue,
            t,
            Duration::minutes(ARRIVALS_WINDOW_MIN),
        );
        features.push(Feature::new("queue_arrivals_24h", arrivals as f64, latest.unwrap_or(t)));
        features
    }

    /// Attach every admissible feature to the label
    pub fn attach(&self, label: &mut Label) -> Vec<PortCallError> {
        let guard = HorizonGuard::for_label(label);
        let candidates = self.candidates(label);
        guard.admit(&mut label.features, candidates)
    }
}
