//! IO modules - file interfaces at the run boundary
//!
//! - `ingest` - JSONL readers for zone events and the zone catalog
//! - `store` - upsert store for port calls and labels, checkpoint, run history
//! - `prometheus` - Prometheus textfile export of the run summary

pub mod ingest;
pub mod prometheus;
pub mod store;

pub use ingest::{read_catalog, read_events};
pub use store::{Checkpoint, CommitStats, RunRecord, Store, StoreError};
