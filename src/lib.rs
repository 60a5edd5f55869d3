//! Port call engine library
//!
//! Turns geofence ENTER/EXIT events into port call sessions, role
//! timestamps, finalized port calls and leakage-safe time-to-berth labels.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
