//! Call finalizer and right-censoring classifier
//!
//! Drives each session through the stage state machine and turns it into an
//! immutable `PortCall`:
//!
//! ```text
//! AWAITING_QUEUE → AWAITING_BASIN → AWAITING_BERTH → BERTHED → DEPARTED
//!                        └────────────────┴─────────────┴──→ CENSORED
//! ```
//!
//! Stages may be skipped. DEPARTED needs a closed session that reached a
//! berth and had left every berth zone by its end; anything else is censored.

use crate::domain::error::PortCallError;
use crate::domain::port_call::{
    CallState, CensorReason, PortCall, PortCallSession, SessionStatus,
};
use crate::domain::types::{hours_between, ZoneRole};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Signals driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Reached(ZoneRole),
    Departure,
    SessionEnd,
}

fn transition(state: CallState, signal: Signal) -> CallState {
    use CallState::*;
    match (state, signal) {
        (s, _) if s.is_terminal() => s,
        (AwaitingQueue, Signal::Reached(ZoneRole::Queue)) => AwaitingBasin,
        (AwaitingQueue | AwaitingBasin, Signal::Reached(ZoneRole::Basin)) => AwaitingBerth,
        (AwaitingQueue | AwaitingBasin | AwaitingBerth, Signal::Reached(ZoneRole::Berth)) => {
            Berthed
        }
        (Berthed, Signal::Departure) => Departed,
        (_, Signal::SessionEnd) => Censored,
        (s, _) => s,
    }
}

fn censor_reason(session: &PortCallSession) -> CensorReason {
    if !session.is_closed() {
        CensorReason::WindowOpen
    } else if session.stamp(ZoneRole::Berth).is_none() {
        CensorReason::ClosedBeforeBerth
    } else {
        CensorReason::ClosedAtBerth
    }
}

/// Finalize one session at the evaluation snapshot
///
/// Sessions without role timestamps yield `IncompleteSession`.
pub fn finalize(
    session: &mut PortCallSession,
    snapshot: DateTime<Utc>,
) -> Result<PortCall, PortCallError> {
    if !session.has_role_timestamps() {
        return Err(PortCallError::IncompleteSession {
            vessel_id: session.vessel_id.clone(),
            port_code: session.port_code.clone(),
            session_start: session.session_start,
        });
    }

    let mut state = CallState::AwaitingQueue;
    for stamp in &session.transitions {
        state = transition(state, Signal::Reached(stamp.role));
    }
    if session.is_closed() && !session.berth_occupied_at_end() {
        state = transition(state, Signal::Departure);
    }
    state = transition(state, Signal::SessionEnd);

    let censored = state == CallState::Censored;
    session.status = if censored { SessionStatus::Censored } else { SessionStatus::Completed };

    let queue = session.stamp_at(ZoneRole::Queue);
    let basin = session.stamp_at(ZoneRole::Basin);
    let berth = if censored { None } else { session.stamp(ZoneRole::Berth) };
    let berth_start = berth.map(|s| s.at);
    let berth_end = berth.and(session.berth_end);

    let time_to_berth_hours = match (censored, basin) {
        (true, Some(b)) => Some(hours_between(b, snapshot)),
        (false, Some(b)) => berth_start.map(|s| hours_between(b, s)),
        (_, None) => None,
    };

    let call = PortCall {
        port_call_ref: session.key().port_call_ref(),
        vessel_id: session.vessel_id.clone(),
        port_code: session.port_code.clone(),
        session_start_utc: session.session_start,
        session_end_utc: session.session_end,
        queue_start_utc: queue,
        basin_start_utc: basin,
        berth_start_utc: berth_start,
        berth_end_utc: berth_end,
        berth_zone_id: berth.map(|s| s.zone_id.clone()),
        censored,
        censor_reason: censored.then(|| censor_reason(session)),
        terminal_state: state,
        time_to_berth_hours,
        queue_wait_hours: queue.zip(basin).map(|(q, b)| hours_between(q, b)),
        alongside_hours: berth_start.zip(berth_end).map(|(s, e)| hours_between(s, e)),
        zone_order_anomaly: session.zone_order_anomaly,
        snapshot_utc: snapshot,
    };

    debug!(
        port_call_ref = %call.port_call_ref,
        vessel_id = %call.vessel_id,
        state = %state.as_str(),
        censored = %censored,
        "port_call_finalized"
    );
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::port_call::{ResolvedEvent, TieBreakRank};
    use crate::domain::types::{EventKind, ZoneEvent};
    use crate::services::role_assigner::assign_roles;
    use crate::services::session_builder::SessionBuilder;
    use chrono::{Duration, TimeZone};

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn ev(zone: &str, role: ZoneRole, kind: EventKind, hours: i64) -> ResolvedEvent {
        ResolvedEvent {
            event: ZoneEvent::new("710000001", "STS", zone, kind, at(hours)),
            role,
            rank: TieBreakRank(None),
        }
    }

    fn single_session(events: Vec<ResolvedEvent>, gap_h: i64, until_h: i64) -> PortCallSession {
        let mut sessions =
            SessionBuilder::new(Duration::hours(gap_h)).build(events, at(until_h)).unwrap();
        assert_eq!(sessions.len(), 1);
        let mut session = sessions.remove(0);
        assign_roles(&mut session);
        session
    }

    #[test]
    fn test_transition_table() {
        use CallState::*;
        assert_eq!(transition(AwaitingQueue, Signal::Reached(ZoneRole::Queue)), AwaitingBasin);
        assert_eq!(transition(AwaitingQueue, Signal::Reached(ZoneRole::Berth)), Berthed);
        assert_eq!(transition(AwaitingBerth, Signal::Departure), AwaitingBerth);
        assert_eq!(transition(Berthed, Signal::Departure), Departed);
        assert_eq!(transition(Departed, Signal::SessionEnd), Departed);
        assert_eq!(transition(AwaitingBasin, Signal::SessionEnd), Censored);
        assert_eq!(transition(Censored, Signal::Reached(ZoneRole::Berth)), Censored);
    }

    #[test]
    fn test_completed_call() {
        let mut session = single_session(
            vec![
                ev("Q1", ZoneRole::Queue, EventKind::Enter, 0),
                ev("B1", ZoneRole::Basin, EventKind::Enter, 5),
                ev("BERTH_1", ZoneRole::Berth, EventKind::Enter, 30),
                ev("BERTH_1", ZoneRole::Berth, EventKind::Exit, 80),
            ],
            12,
            120,
        );
        let call = finalize(&mut session, at(120)).unwrap();

        assert!(!call.censored);
        assert_eq!(call.terminal_state, CallState::Departed);
        assert_eq!(call.queue_wait_hours, Some(5.0));
        assert_eq!(call.time_to_berth_hours, Some(25.0));
        assert_eq!(call.alongside_hours, Some(50.0));
        assert_eq!(call.berth_zone_id.as_ref().map(|z| z.as_str()), Some("BERTH_1"));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[test]
    fn test_open_session_censored() {
        let mut session =
            single_session(vec![ev("B1", ZoneRole::Basin, EventKind::Enter, 0)], 500, 400);
        let call = finalize(&mut session, at(400)).unwrap();

        assert!(call.censored);
        assert_eq!(call.censor_reason, Some(CensorReason::WindowOpen));
        assert_eq!(call.terminal_state, CallState::Censored);
        assert_eq!(call.time_to_berth_hours, Some(400.0));
        assert!(call.berth_start_utc.is_none());
        assert!(call.queue_wait_hours.is_none());
    }

    #[test]
    fn test_closed_at_berth_withholds_berth_fields() {
        let mut session = single_session(
            vec![
                ev("B1", ZoneRole::Basin, EventKind::Enter, 0),
                ev("BERTH_1", ZoneRole::Berth, EventKind::Enter, 10),
            ],
            12,
            200,
        );
        let call = finalize(&mut session, at(200)).unwrap();

        assert!(call.censored);
        assert_eq!(call.censor_reason, Some(CensorReason::ClosedAtBerth));
        assert!(call.berth_start_utc.is_none());
        assert!(call.berth_zone_id.is_none());
        assert!(call.alongside_hours.is_none());
        assert_eq!(call.time_to_berth_hours, Some(200.0));
    }

    #[test]
    fn test_closed_before_berth() {
        let mut session = single_session(
            vec![
                ev("Q1", ZoneRole::Queue, EventKind::Enter, 0),
                ev("Q1", ZoneRole::Queue, EventKind::Exit, 3),
            ],
            12,
            100,
        );
        let call = finalize(&mut session, at(100)).unwrap();
        assert_eq!(call.censor_reason, Some(CensorReason::ClosedBeforeBerth));
        assert!(call.basin_start_utc.is_none());
        assert!(call.time_to_berth_hours.is_none());
    }

    #[test]
    fn test_completed_without_basin_has_no_ttb() {
        let mut session = single_session(
            vec![
                ev("BERTH_1", ZoneRole::Berth, EventKind::Enter, 0),
                ev("BERTH_1", ZoneRole::Berth, EventKind::Exit, 8),
            ],
            12,
            100,
        );
        let call = finalize(&mut session, at(100)).unwrap();
        assert!(!call.censored);
        assert!(call.time_to_berth_hours.is_none());
        assert_eq!(call.alongside_hours, Some(8.0));
    }

    #[test]
    fn test_incomplete_session() {
        let mut session =
            single_session(vec![ev("X", ZoneRole::Other, EventKind::Enter, 0)], 12, 100);
        let err = finalize(&mut session, at(100)).unwrap_err();
        assert!(matches!(err, PortCallError::IncompleteSession { .. }));
    }
}
