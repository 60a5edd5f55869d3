//! Domain models - core types of the port call engine
//!
//! This module contains the canonical data types used throughout the system:
//! - `ZoneEvent` - raw geofence crossing from the geofencing collaborator
//! - `PortCallSession` - one gap-bounded visit of a vessel to a port
//! - `PortCall` - finalized, immutable call record
//! - `Label` - leakage-safe training label
//! - `PortCallError` - recoverable error taxonomy

pub mod error;
pub mod port_call;
pub mod types;

pub use error::{PortCallError, RegistryError};
pub use port_call::{CallKey, CallState, CensorReason, Label, PortCall, PortCallSession};
pub use types::{EventKind, PortCode, VesselId, ZoneEvent, ZoneId, ZoneRole, ZoneRoleConfig};
