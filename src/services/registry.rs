//! Zone role registry
//!
//! Immutable snapshot of the zone catalog for one run, shared across shard
//! workers behind an `Arc`.

use crate::domain::error::{PortCallError, RegistryError};
use crate::domain::port_call::TieBreakRank;
use crate::domain::types::{PortCode, ZoneId, ZoneRole, ZoneRoleConfig};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ZoneEntry {
    role: ZoneRole,
    active: bool,
    rank: TieBreakRank,
}

/// Outcome of a registry lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Active { role: ZoneRole, rank: TieBreakRank },
    Inactive,
    /// No entry for this (port, zone)
    Unknown,
}

#[derive(Debug, Default)]
pub struct ZoneRoleRegistry {
    ports: FxHashMap<PortCode, FxHashMap<ZoneId, ZoneEntry>>,
    port_codes: BTreeSet<PortCode>,
    /// Conflicts repaired while building the snapshot
    repairs: Vec<PortCallError>,
}

impl ZoneRoleRegistry {
    /// Build a snapshot from catalog entries
    ///
    /// Duplicate (port, zone) entries abort. Several active BERTH zones on the
    /// same berth slot are repaired: the lowest-ranked zone (then lowest
    /// zone id) stays active and the rest are deactivated.
    pub fn from_configs(configs: Vec<ZoneRoleConfig>) -> Result<Self, RegistryError> {
        let mut ports: FxHashMap<PortCode, FxHashMap<ZoneId, ZoneEntry>> = FxHashMap::default();
        let mut slots: BTreeMap<(PortCode, String), Vec<(TieBreakRank, ZoneId)>> = BTreeMap::new();

        for cfg in configs {
            let rank = TieBreakRank(cfg.priority);
            if cfg.active && cfg.role == ZoneRole::Berth {
                if let Some(slot) = &cfg.berth_slot {
                    slots
                        .entry((cfg.port_code.clone(), slot.clone()))
                        .or_default()
                        .push((rank, cfg.zone_id.clone()));
                }
            }

            let zones = ports.entry(cfg.port_code.clone()).or_default();
            if zones.contains_key(&cfg.zone_id) {
                return Err(RegistryError::DuplicateZone {
                    port_code: cfg.port_code,
                    zone_id: cfg.zone_id,
                });
            }
            zones.insert(cfg.zone_id, ZoneEntry { role: cfg.role, active: cfg.active, rank });
        }

        let mut repairs = Vec::new();
        for ((port_code, slot), mut claimants) in slots {
            if claimants.len() < 2 {
                continue;
            }
            claimants.sort();
            let keeper = claimants[0].1.clone();
            for (_, zone_id) in claimants.into_iter().skip(1) {
                if let Some(entry) = ports.get_mut(&port_code).and_then(|z| z.get_mut(&zone_id)) {
                    entry.active = false;
                }
                let err = PortCallError::Configuration {
                    port_code: port_code.clone(),
                    zone_id: zone_id.clone(),
                    reason: format!("berth slot {slot} already served by active zone {keeper}"),
                };
                warn!(error = %err, "berth_slot_conflict");
                repairs.push(err);
            }
        }

        let active = ports.values().flat_map(|z| z.values()).filter(|e| e.active).count();
        if active == 0 {
            return Err(RegistryError::Empty);
        }

        let port_codes: BTreeSet<PortCode> = ports.keys().cloned().collect();
        info!(
            ports = %port_codes.len(),
            active_zones = %active,
            repaired = %repairs.len(),
            "zone_registry_loaded"
        );

        Ok(Self { ports, port_codes, repairs })
    }

    pub fn resolve(&self, port_code: &PortCode, zone_id: &ZoneId) -> Resolution {
        match self.ports.get(port_code).and_then(|zones| zones.get(zone_id)) {
            Some(entry) if entry.active => Resolution::Active { role: entry.role, rank: entry.rank },
            Some(_) => Resolution::Inactive,
            None => Resolution::Unknown,
        }
    }

    /// Ports that have at least one catalog entry
    pub fn ports(&self) -> &BTreeSet<PortCode> {
        &self.port_codes
    }

    pub fn knows_port(&self, port_code: &PortCode) -> bool {
        self.ports.contains_key(port_code)
    }

    pub fn repairs(&self) -> &[PortCallError] {
        &self.repairs
    }
}
