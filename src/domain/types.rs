//! Shared types for the port call engine

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Newtype wrapper for vessel identifiers (MMSI as text)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VesselId(pub String);

impl VesselId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id looks like an MMSI: 7 to 9 ASCII digits
    pub fn is_mmsi(&self) -> bool {
        let len = self.0.len();
        (7..=9).contains(&len) && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for VesselId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for geofence zone identifiers
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for port codes, always upper-case
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PortCode(String);

impl PortCode {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PortCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(PortCode::new(&raw))
    }
}

impl fmt::Display for PortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zone crossing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Enter,
    Exit,
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTER" | "ZONE_ENTRY" => Ok(EventKind::Enter),
            "EXIT" | "ZONE_EXIT" => Ok(EventKind::Exit),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enter => "ENTER",
            EventKind::Exit => "EXIT",
        }
    }
}

/// Functional meaning of a geofenced zone
///
/// Declaration order is stage order: a vessel progresses QUEUE → BASIN → BERTH.
/// OTHER zones carry no stage and only keep sessions continuous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneRole {
    Queue,
    Basin,
    Berth,
    Other,
}

impl ZoneRole {
    /// Roles that carry a canonical timestamp, in stage order
    pub const STAGED: [ZoneRole; 3] = [ZoneRole::Queue, ZoneRole::Basin, ZoneRole::Berth];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneRole::Queue => "QUEUE",
            ZoneRole::Basin => "BASIN",
            ZoneRole::Berth => "BERTH",
            ZoneRole::Other => "OTHER",
        }
    }

    #[inline]
    pub fn is_staged(&self) -> bool {
        !matches!(self, ZoneRole::Other)
    }
}

/// One entry of the zone role catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRoleConfig {
    pub port_code: PortCode,
    pub zone_id: ZoneId,
    pub role: ZoneRole,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Tie-break rank among zones of the same role (lower wins)
    #[serde(default)]
    pub priority: Option<u32>,
    /// Physical berth slot; at most one active BERTH zone per slot
    #[serde(default)]
    pub berth_slot: Option<String>,
}

fn default_active() -> bool {
    true
}

impl ZoneRoleConfig {
    pub fn new(port_code: &str, zone_id: &str, role: ZoneRole) -> Self {
        Self {
            port_code: PortCode::new(port_code),
            zone_id: ZoneId::new(zone_id),
            role,
            active: true,
            priority: None,
            berth_slot: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_berth_slot(mut self, slot: &str) -> Self {
        self.berth_slot = Some(slot.to_string());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A raw geofence crossing produced by the geofencing collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub vessel_id: VesselId,
    pub zone_id: ZoneId,
    pub event_type: EventKind,
    /// RFC 3339 string or epoch milliseconds on input
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub port_code: PortCode,
}

impl ZoneEvent {
    pub fn new(
        vessel_id: &str,
        port_code: &str,
        zone_id: &str,
        event_type: EventKind,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            vessel_id: VesselId::new(vessel_id),
            zone_id: ZoneId::new(zone_id),
            event_type,
            timestamp,
            port_code: PortCode::new(port_code),
        }
    }
}

/// Accept a timestamp as an RFC 3339 string or as epoch milliseconds
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an RFC 3339 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp {value:?}: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            let ms = i64::try_from(value).map_err(|_| E::custom("epoch ms out of range"))?;
            self.visit_i64(ms)
        }

        fn visit_i64<E>(self, value: i64) -> Result<DateTime<Utc>, E>
        where
            E: de::Error,
        {
            Utc.timestamp_millis_opt(value)
                .single()
                .ok_or_else(|| E::custom(format!("epoch ms out of range: {value}")))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Elapsed hours from `from` to `to` (negative if `to` is earlier)
#[inline]
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
