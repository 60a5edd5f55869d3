//! Error taxonomy for port call construction
//!
//! Only run-level failures abort a run. Everything in `PortCallError` is
//! recovered or isolated to a single vessel, session or label.

use crate::domain::types::{PortCode, VesselId, ZoneId};
use chrono::{DateTime, Utc};

/// Recoverable, per-item failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortCallError {
    /// Zone without a registry entry, or a tie-break with no total order
    #[error("configuration error at {port_code}/{zone_id}: {reason}")]
    Configuration { port_code: PortCode, zone_id: ZoneId, reason: String },

    /// Session whose events never touched a QUEUE, BASIN or BERTH zone
    #[error("session {vessel_id}@{port_code} starting {session_start} has no role timestamps")]
    IncompleteSession { vessel_id: VesselId, port_code: PortCode, session_start: DateTime<Utc> },

    /// A label failed its horizon consistency check
    #[error("leakage violation for {port_call_ref}: {reason}")]
    LeakageViolation { port_call_ref: String, reason: String },

    /// A vessel partition was not in non-decreasing timestamp order
    #[error("events for {vessel_id} out of order: {current} after {previous}")]
    UnorderedEvents { vessel_id: VesselId, previous: DateTime<Utc>, current: DateTime<Utc> },
}

/// Run-level registry failures
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no active zone roles configured")]
    Empty,

    #[error("duplicate zone role entry for {port_code}/{zone_id}")]
    DuplicateZone { port_code: PortCode, zone_id: ZoneId },
}
