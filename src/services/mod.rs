//! Services - port call construction
//!
//! Leaves first:
//! - `registry` - Zone role snapshot for a run
//! - `normalizer` - Window/port filtering, role resolution, ordering, dedup
//! - `session_builder` - Gap-based sessionization per vessel
//! - `role_assigner` - Canonical role timestamps, tie-breaks, clamping
//! - `finalizer` - Stage state machine and right-censoring
//! - `label_emitter` - Leakage-safe labels and the horizon guard
//! - `features` - Feature snapshots at the label horizon
//! - `pipeline` - Sharded run orchestration

pub mod features;
pub mod finalizer;
pub mod label_emitter;
pub mod normalizer;
pub mod pipeline;
pub mod registry;
pub mod role_assigner;
pub mod session_builder;

pub use pipeline::{Pipeline, ReplaceScope, RunOutput, RunParams};
pub use registry::ZoneRoleRegistry;
