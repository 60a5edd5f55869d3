//! Canonical role timestamps for a session
//!
//! Each staged role gets the first ENTER of any zone with that role. Events
//! arrive sorted by (timestamp, rank, zone_id), so the first match already
//! carries the tie-break winner. Stamps are then made monotonic by clamping
//! earlier stages down to later ones.

use crate::domain::error::PortCallError;
use crate::domain::port_call::{PortCallSession, RoleStamp};
use crate::domain::types::{EventKind, ZoneRole};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Fill `transitions`, `berth_end` and `zone_order_anomaly` on a session
///
/// Returns configuration errors for ambiguous tie-breaks (equal configured
/// priority at the same timestamp); those are resolved by zone id.
pub fn assign_roles(session: &mut PortCallSession) -> Vec<PortCallError> {
    let mut issues = Vec::new();
    let mut stamps: SmallVec<[RoleStamp; 3]> = SmallVec::new();

    for role in ZoneRole::STAGED {
        let mut entries = session
            .events
            .iter()
            .filter(|e| e.role == role && e.event.event_type == EventKind::Enter);

        let Some(winner) = entries.next() else {
            continue;
        };

        if winner.rank.0.is_some() {
            let rivals = entries
                .take_while(|e| e.event.timestamp == winner.event.timestamp)
                .filter(|e| e.rank == winner.rank && e.event.zone_id != winner.event.zone_id);
            for rival in rivals {
                let err = PortCallError::Configuration {
                    port_code: session.port_code.clone(),
                    zone_id: rival.event.zone_id.clone(),
                    reason: format!(
                        "{} tie with {} at equal priority, resolved by zone id",
                        role.as_str(),
                        winner.event.zone_id
                    ),
                };
                warn!(vessel_id = %session.vessel_id, error = %err, "ambiguous_tie_break");
                issues.push(err);
            }
        }

        stamps.push(RoleStamp {
            role,
            at: winner.event.timestamp,
            zone_id: winner.event.zone_id.clone(),
            clamped_from: None,
        });
    }

    // Walk from the latest stage back so every earlier stage is capped by its successor
    let mut ceiling: Option<DateTime<Utc>> = None;
    for stamp in stamps.iter_mut().rev() {
        if let Some(limit) = ceiling {
            if stamp.at > limit {
                debug!(
                    vessel_id = %session.vessel_id,
                    role = %stamp.role.as_str(),
                    from = %stamp.at,
                    to = %limit,
                    "role_stamp_clamped"
                );
                stamp.clamped_from = Some(stamp.at);
                stamp.at = limit;
                session.zone_order_anomaly = true;
            }
        }
        ceiling = Some(stamp.at);
    }

    session.berth_end = berth_end(session);
    session.transitions = stamps;
    issues
}

/// Time of the EXIT that last left berth occupancy empty, if the vessel
/// was not back at a berth afterwards
fn berth_end(session: &PortCallSession) -> Option<DateTime<Utc>> {
    let mut occupied = FxHashSet::default();
    let mut end = None;

    for e in session.events.iter().filter(|e| e.role == ZoneRole::Berth) {
        match e.event.event_type {
            EventKind::Enter => {
                occupied.insert(&e.event.zone_id);
                end = None;
            }
            EventKind::Exit => {
                if occupied.remove(&e.event.zone_id) && occupied.is_empty() {
                    end = Some(e.event.timestamp);
                }
            }
        }
    }
    end
}
