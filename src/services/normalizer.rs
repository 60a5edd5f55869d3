//! Event normalizer
//!
//! Filters a raw event batch to the run window and port set, resolves each
//! zone against the registry, and groups the survivors per vessel in a total
//! chronological order with exact duplicates removed.

use crate::domain::error::PortCallError;
use crate::domain::port_call::{ResolvedEvent, TieBreakRank};
use crate::domain::types::{PortCode, VesselId, ZoneEvent, ZoneId, ZoneRole};
use crate::infra::metrics::{DropReason, Metrics};
use crate::services::registry::{Resolution, ZoneRoleRegistry};
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Run window and filters applied by the normalizer
#[derive(Debug, Clone)]
pub struct NormalizeParams {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    /// Read this far before `since` to pick up sessions already in progress
    pub lookback: Duration,
    /// Ports to keep; empty means every port known to the registry
    pub ports: BTreeSet<PortCode>,
    pub validate_mmsi: bool,
}

impl NormalizeParams {
    /// `since - lookback`, saturating at the earliest representable instant
    pub fn window_start(&self) -> DateTime<Utc> {
        self.since.checked_sub_signed(self.lookback).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn in_window(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.window_start() && ts <= self.until
    }

    fn keeps_port(&self, port: &PortCode, registry: &ZoneRoleRegistry) -> bool {
        if self.ports.is_empty() {
            registry.knows_port(port)
        } else {
            self.ports.contains(port)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub read: u64,
    pub kept: u64,
    pub out_of_window: u64,
    pub port_filtered: u64,
    pub invalid_vessel: u64,
    pub inactive_zone: u64,
    pub duplicate: u64,
    /// Kept events whose zone had no registry entry
    pub unknown_zone: u64,
}

impl NormalizeStats {
    pub fn record(&self, metrics: &Metrics) {
        metrics.record_events_read(self.read);
        metrics.record_events_kept(self.kept);
        metrics.record_dropped(DropReason::OutOfWindow, self.out_of_window);
        metrics.record_dropped(DropReason::PortFiltered, self.port_filtered);
        metrics.record_dropped(DropReason::InvalidVessel, self.invalid_vessel);
        metrics.record_dropped(DropReason::InactiveZone, self.inactive_zone);
        metrics.record_dropped(DropReason::Duplicate, self.duplicate);
        metrics.record_unknown_zone_events(self.unknown_zone);
    }
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    /// Per-vessel sorted, deduplicated events
    pub vessels: BTreeMap<VesselId, Vec<ResolvedEvent>>,
    pub stats: NormalizeStats,
    /// One entry per unknown (port, zone) pair
    pub configuration_errors: Vec<PortCallError>,
}

impl NormalizedBatch {
    pub fn event_count(&self) -> usize {
        self.vessels.values().map(Vec::len).sum()
    }
}

pub fn normalize(
    events: Vec<ZoneEvent>,
    registry: &ZoneRoleRegistry,
    params: &NormalizeParams,
) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut unknown_seen: FxHashSet<(PortCode, ZoneId)> = FxHashSet::default();

    for event in events {
        batch.stats.read += 1;

        if !params.in_window(event.timestamp) {
            batch.stats.out_of_window += 1;
            continue;
        }
        if !params.keeps_port(&event.port_code, registry) {
            batch.stats.port_filtered += 1;
            continue;
        }
        if params.validate_mmsi && !event.vessel_id.is_mmsi() {
            batch.stats.invalid_vessel += 1;
            continue;
        }

        let (role, rank) = match registry.resolve(&event.port_code, &event.zone_id) {
            Resolution::Active { role, rank } => (role, rank),
            Resolution::Inactive => {
                batch.stats.inactive_zone += 1;
                continue;
            }
            Resolution::Unknown => {
                batch.stats.unknown_zone += 1;
                let key = (event.port_code.clone(), event.zone_id.clone());
                if unknown_seen.insert(key) {
                    let err = PortCallError::Configuration {
                        port_code: event.port_code.clone(),
                        zone_id: event.zone_id.clone(),
                        reason: "zone has no role entry, treated as OTHER".to_string(),
                    };
                    warn!(error = %err, "unknown_zone");
                    batch.configuration_errors.push(err);
                }
                (ZoneRole::Other, TieBreakRank(None))
            }
        };

        batch
            .vessels
            .entry(event.vessel_id.clone())
            .or_default()
            .push(ResolvedEvent { event, role, rank });
    }

    for events in batch.vessels.values_mut() {
        events.sort_by(|a, b| {
            a.sort_key().cmp(&b.sort_key()).then_with(|| a.event.port_code.cmp(&b.event.port_code))
        });
        let before = events.len();
        // Duplicates are adjacent after the sort
        events.dedup_by(|a, b| a.event == b.event);
        batch.stats.duplicate += (before - events.len()) as u64;
    }

    batch.stats.kept = batch.event_count() as u64;
    debug!(
        read = %batch.stats.read,
        kept = %batch.stats.kept,
        vessels = %batch.vessels.len(),
        "events_normalized"
    );
    batch
}
