//! Port call data model: sessions, finalized calls and training labels

use crate::domain::types::{EventKind, PortCode, VesselId, ZoneEvent, ZoneId, ZoneRole};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Deterministic tie-break rank for zones of the same role
///
/// A configured priority always beats a missing one; lower priority wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TieBreakRank(pub Option<u32>);

impl Ord for TieBreakRank {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialOrd for TieBreakRank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A zone event after registry resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub event: ZoneEvent,
    pub role: ZoneRole,
    pub rank: TieBreakRank,
}

impl ResolvedEvent {
    /// Total order used for chronological sorting and deduplication
    pub fn sort_key(&self) -> (DateTime<Utc>, TieBreakRank, &ZoneId, EventKind) {
        (self.event.timestamp, self.rank, &self.event.zone_id, self.event.event_type)
    }
}

/// Canonical first-reached timestamp for one role within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStamp {
    pub role: ZoneRole,
    pub at: DateTime<Utc>,
    pub zone_id: ZoneId,
    /// Original first-entry time when monotonic clamping moved this stamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamped_from: Option<DateTime<Utc>>,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Completed,
    Censored,
}

/// One continuous, gap-bounded visit of a vessel to a port
#[derive(Debug, Clone)]
pub struct PortCallSession {
    pub vessel_id: VesselId,
    pub port_code: PortCode,
    pub session_start: DateTime<Utc>,
    /// Set once the session is closed by a gap or a departure
    pub session_end: Option<DateTime<Utc>>,
    pub last_event_at: DateTime<Utc>,
    pub events: Vec<ResolvedEvent>,
    /// Zones entered but not exited when the session ended
    pub occupied_at_end: BTreeMap<ZoneId, ZoneRole>,
    /// Role stamps in stage order (filled by the role assigner)
    pub transitions: SmallVec<[RoleStamp; 3]>,
    /// EXIT that last emptied berth occupancy
    pub berth_end: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub zone_order_anomaly: bool,
}

impl PortCallSession {
    pub fn start(first: ResolvedEvent) -> Self {
        let at = first.event.timestamp;
        Self {
            vessel_id: first.event.vessel_id.clone(),
            port_code: first.event.port_code.clone(),
            session_start: at,
            session_end: None,
            last_event_at: at,
            events: vec![first],
            occupied_at_end: BTreeMap::new(),
            transitions: SmallVec::new(),
            berth_end: None,
            status: SessionStatus::Open,
            zone_order_anomaly: false,
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.session_end.is_some()
    }

    pub fn stamp(&self, role: ZoneRole) -> Option<&RoleStamp> {
        self.transitions.iter().find(|s| s.role == role)
    }

    pub fn stamp_at(&self, role: ZoneRole) -> Option<DateTime<Utc>> {
        self.stamp(role).map(|s| s.at)
    }

    pub fn has_role_timestamps(&self) -> bool {
        !self.transitions.is_empty()
    }

    /// True if any BERTH zone was still occupied at session end
    pub fn berth_occupied_at_end(&self) -> bool {
        self.occupied_at_end.values().any(|r| *r == ZoneRole::Berth)
    }

    pub fn key(&self) -> CallKey {
        CallKey {
            vessel_id: self.vessel_id.clone(),
            port_code: self.port_code.clone(),
            session_start: self.session_start,
        }
    }
}

/// Natural identity of a port call, used as the upsert key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallKey {
    pub vessel_id: VesselId,
    pub port_code: PortCode,
    pub session_start: DateTime<Utc>,
}

impl CallKey {
    /// Stable reference derived from the natural key (UUID v5)
    pub fn port_call_ref(&self) -> String {
        let name = format!(
            "port-call:{}:{}:{}",
            self.vessel_id,
            self.port_code,
            self.session_start.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }
}

/// Finalizer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    AwaitingQueue,
    AwaitingBasin,
    AwaitingBerth,
    Berthed,
    Departed,
    Censored,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::AwaitingQueue => "awaiting_queue",
            CallState::AwaitingBasin => "awaiting_basin",
            CallState::AwaitingBerth => "awaiting_berth",
            CallState::Berthed => "berthed",
            CallState::Departed => "departed",
            CallState::Censored => "censored",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Departed | CallState::Censored)
    }
}

/// Why a call was right-censored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CensorReason {
    /// Session still open at window end
    WindowOpen,
    /// Session closed before any berth was reached
    ClosedBeforeBerth,
    /// Session closed while a berth zone was still occupied
    ClosedAtBerth,
}

/// Finalized port call record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCall {
    pub port_call_ref: String,
    pub vessel_id: VesselId,
    pub port_code: PortCode,
    pub session_start_utc: DateTime<Utc>,
    pub session_end_utc: Option<DateTime<Utc>>,
    pub queue_start_utc: Option<DateTime<Utc>>,
    pub basin_start_utc: Option<DateTime<Utc>>,
    pub berth_start_utc: Option<DateTime<Utc>>,
    pub berth_end_utc: Option<DateTime<Utc>>,
    pub berth_zone_id: Option<ZoneId>,
    pub censored: bool,
    pub censor_reason: Option<CensorReason>,
    pub terminal_state: CallState,
    pub time_to_berth_hours: Option<f64>,
    pub queue_wait_hours: Option<f64>,
    pub alongside_hours: Option<f64>,
    pub zone_order_anomaly: bool,
    pub snapshot_utc: DateTime<Utc>,
}

impl PortCall {
    pub fn key(&self) -> CallKey {
        CallKey {
            vessel_id: self.vessel_id.clone(),
            port_code: self.port_code.clone(),
            session_start: self.session_start_utc,
        }
    }
}

/// Label type for time-to-berth targets
pub const LABEL_TYPE_TTB: &str = "TTB";

/// Training label derived from one port call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub port_call_ref: String,
    pub vessel_id: VesselId,
    pub port_code: PortCode,
    pub label_type: String,
    pub label_ts_utc: DateTime<Utc>,
    pub observed_wait_hours: f64,
    pub censored: bool,
    pub horizon_cutoff_ts_utc: DateTime<Utc>,
    pub zone_order_anomaly: bool,
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
}
