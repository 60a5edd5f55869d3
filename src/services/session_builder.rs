//! Gap-based sessionization of one vessel's events

use crate::domain::error::PortCallError;
use crate::domain::port_call::{PortCallSession, ResolvedEvent};
use crate::domain::types::{EventKind, PortCode, ZoneId, ZoneRole};
use crate::infra::config::Config;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Splits a vessel's ordered events into port call sessions
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    default_gap: Duration,
    port_gaps: BTreeMap<PortCode, Duration>,
    departure_closes_session: bool,
}

/// Session under construction plus its live zone occupancy
struct OpenSession {
    session: PortCallSession,
    occupancy: BTreeMap<ZoneId, ZoneRole>,
    berthed: bool,
}

impl OpenSession {
    fn start(event: ResolvedEvent) -> Self {
        let mut open = Self {
            session: PortCallSession::start(event.clone()),
            occupancy: BTreeMap::new(),
            berthed: false,
        };
        open.track(&event);
        open
    }

    fn push(&mut self, event: ResolvedEvent) {
        self.track(&event);
        self.session.last_event_at = event.event.timestamp;
        self.session.events.push(event);
    }

    fn track(&mut self, event: &ResolvedEvent) {
        match event.event.event_type {
            EventKind::Enter => {
                if event.role == ZoneRole::Berth {
                    self.berthed = true;
                }
                self.occupancy.insert(event.event.zone_id.clone(), event.role);
            }
            // EXIT of a zone that was never entered is ignored
            EventKind::Exit => {
                self.occupancy.remove(&event.event.zone_id);
            }
        }
    }

    /// Vessel has berthed and has now left every zone
    fn departed(&self) -> bool {
        self.berthed && self.occupancy.is_empty()
    }

    fn close(mut self) -> PortCallSession {
        self.session.session_end = Some(self.session.last_event_at);
        self.finish()
    }

    fn finish(mut self) -> PortCallSession {
        self.session.occupied_at_end = self.occupancy;
        self.session
    }
}

impl SessionBuilder {
    pub fn new(default_gap: Duration) -> Self {
        Self { default_gap, port_gaps: BTreeMap::new(), departure_closes_session: false }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            default_gap: config.default_gap(),
            port_gaps: config.port_gaps().clone(),
            departure_closes_session: config.departure_closes_session(),
        }
    }

    pub fn with_port_gap(mut self, port: PortCode, gap: Duration) -> Self {
        self.port_gaps.insert(port, gap);
        self
    }

    pub fn with_departure_closes_session(mut self, enabled: bool) -> Self {
        self.departure_closes_session = enabled;
        self
    }

    pub fn gap_for(&self, port: &PortCode) -> Duration {
        self.port_gaps.get(port).copied().unwrap_or(self.default_gap)
    }

    /// Build sessions from one vessel's events
    ///
    /// `events` must be in non-decreasing timestamp order. A session still
    /// within its gap tolerance at `until` is returned open.
    pub fn build(
        &self,
        events: Vec<ResolvedEvent>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PortCallSession>, PortCallError> {
        if let Some(pair) =
            events.windows(2).find(|w| w[1].event.timestamp < w[0].event.timestamp)
        {
            return Err(PortCallError::UnorderedEvents {
                vessel_id: pair[1].event.vessel_id.clone(),
                previous: pair[0].event.timestamp,
                current: pair[1].event.timestamp,
            });
        }

        let mut sessions = Vec::new();
        let mut current: Option<OpenSession> = None;

        for event in events {
            if let Some(open) = current.take() {
                let gap = self.gap_for(&open.session.port_code);
                let silent = event.event.timestamp - open.session.last_event_at;
                if event.event.port_code != open.session.port_code || silent > gap {
                    sessions.push(open.close());
                } else {
                    current = Some(open);
                }
            }

            match current.as_mut() {
                Some(open) => open.push(event),
                None => current = Some(OpenSession::start(event)),
            }

            let departed = current.as_ref().is_some_and(OpenSession::departed);
            if self.departure_closes_session && departed {
                if let Some(done) = current.take() {
                    sessions.push(done.close());
                }
            }
        }

        if let Some(open) = current {
            let gap = self.gap_for(&open.session.port_code);
            if until - open.session.last_event_at > gap {
                sessions.push(open.close());
            } else {
                sessions.push(open.finish());
            }
        }

        if let Some(first) = sessions.first() {
            debug!(
                vessel_id = %first.vessel_id,
                sessions = %sessions.len(),
                open = %sessions.iter().filter(|s| !s.is_closed()).count(),
                "sessions_built"
            );
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::port_call::TieBreakRank;
    use crate::domain::types::ZoneEvent;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn at(hours: i64) -> DateTime<Utc> {
        t0() + Duration::hours(hours)
    }

    fn ev(port: &str, zone: &str, role: ZoneRole, kind: EventKind, hours: i64) -> ResolvedEvent {
        ResolvedEvent {
            event: ZoneEvent::new("710000001", port, zone, kind, at(hours)),
            role,
            rank: TieBreakRank(None),
        }
    }

    fn enter(zone: &str, role: ZoneRole, hours: i64) -> ResolvedEvent {
        ev("STS", zone, role, EventKind::Enter, hours)
    }

    fn exit(zone: &str, role: ZoneRole, hours: i64) -> ResolvedEvent {
        ev("STS", zone, role, EventKind::Exit, hours)
    }

    fn gap_events() -> Vec<ResolvedEvent> {
        vec![
            enter("Q1", ZoneRole::Queue, 0),
            enter("B1", ZoneRole::Basin, 2),
            enter("BERTH_1", ZoneRole::Berth, 10),
        ]
    }

    #[test]
    fn test_gap_six_hours_splits() {
        let builder = SessionBuilder::new(Duration::hours(6));
        let sessions = builder.build(gap_events(), at(100)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_start, at(0));
        assert_eq!(sessions[0].session_end, Some(at(2)));
        assert_eq!(sessions[1].session_start, at(10));
    }

    #[test]
    fn test_gap_twelve_hours_single_session() {
        let builder = SessionBuilder::new(Duration::hours(12));
        let sessions = builder.build(gap_events(), at(100)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].events.len(), 3);
        assert_eq!(sessions[0].session_end, Some(at(10)));
    }

    #[test]
    fn test_gap_equal_to_threshold_continues() {
        let builder = SessionBuilder::new(Duration::hours(8));
        let events = vec![enter("Q1", ZoneRole::Queue, 2), enter("B1", ZoneRole::Basin, 10)];
        let sessions = builder.build(events, at(100)).unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_open_at_window_end() {
        let builder = SessionBuilder::new(Duration::hours(12));
        let sessions = builder.build(vec![enter("B1", ZoneRole::Basin, 0)], at(12)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].is_closed());
        assert_eq!(sessions[0].occupied_at_end.len(), 1);

        let closed = builder.build(vec![enter("B1", ZoneRole::Basin, 0)], at(13)).unwrap();
        assert!(closed[0].is_closed());
    }

    #[test]
    fn test_port_change_starts_new_session() {
        let builder = SessionBuilder::new(Duration::hours(12));
        let events = vec![
            enter("Q1", ZoneRole::Queue, 0),
            ev("PNG", "Q1", ZoneRole::Queue, EventKind::Enter, 1),
        ];
        let sessions = builder.build(events, at(100)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[1].port_code.as_str(), "PNG");
    }

    #[test]
    fn test_per_port_gap_override() {
        let builder = SessionBuilder::new(Duration::hours(12))
            .with_port_gap(PortCode::new("STS"), Duration::hours(1));
        let events = vec![enter("Q1", ZoneRole::Queue, 0), enter("B1", ZoneRole::Basin, 2)];
        assert_eq!(builder.build(events, at(100)).unwrap().len(), 2);
    }

    #[test]
    fn test_occupancy_at_end() {
        let builder = SessionBuilder::new(Duration::hours(12));
        let events = vec![
            exit("Q1", ZoneRole::Queue, 0), // never entered
            enter("Q1", ZoneRole::Queue, 1),
            enter("BERTH_1", ZoneRole::Berth, 3),
            exit("Q1", ZoneRole::Queue, 4),
        ];
        let sessions = builder.build(events, at(100)).unwrap();
        let s = &sessions[0];
        assert!(s.berth_occupied_at_end());
        assert_eq!(s.occupied_at_end.len(), 1);
    }

    #[test]
    fn test_departure_closes_session() {
        let events = || {
            vec![
                enter("BERTH_1", ZoneRole::Berth, 0),
                exit("BERTH_1", ZoneRole::Berth, 5),
                enter("Q1", ZoneRole::Queue, 6),
            ]
        };

        let plain = SessionBuilder::new(Duration::hours(12));
        assert_eq!(plain.build(events(), at(100)).unwrap().len(), 1);

        let closing = SessionBuilder::new(Duration::hours(12)).with_departure_closes_session(true);
        let sessions = closing.build(events(), at(100)).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_end, Some(at(5)));
        assert!(sessions[0].occupied_at_end.is_empty());
    }

    #[test]
    fn test_unordered_events_rejected() {
        let builder = SessionBuilder::new(Duration::hours(12));
        let events = vec![enter("B1", ZoneRole::Basin, 5), enter("Q1", ZoneRole::Queue, 1)];
        let err = builder.build(events, at(100)).unwrap_err();
        assert!(matches!(err, PortCallError::UnorderedEvents { .. }));
    }

    #[test]
    fn test_empty_input() {
        let builder = SessionBuilder::new(Duration::hours(12));
        assert!(builder.build(Vec::new(), at(0)).unwrap().is_empty());
    }
}
