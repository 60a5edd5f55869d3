//! JSONL readers for zone events and the zone role catalog
//!
//! A malformed event line is skipped and counted. A malformed catalog line
//! fails the whole load because the registry must be consistent.

use crate::domain::types::{ZoneEvent, ZoneRoleConfig};
use crate::infra::metrics::Metrics;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Read zone events, one JSON object per line
pub fn read_events(path: &Path, metrics: &Metrics) -> Result<Vec<ZoneEvent>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open events file: {}", path.display()))?;

    let mut events = Vec::new();
    let mut malformed = 0usize;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ZoneEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                malformed += 1;
                metrics.record_event_malformed();
                warn!(line = %(idx + 1), error = %e, "event_malformed");
            }
        }
    }

    info!(
        file = %path.display(),
        events = %events.len(),
        malformed = %malformed,
        "events_loaded"
    );
    Ok(events)
}

/// Read zone role entries, one JSON object per line
pub fn read_catalog(path: &Path) -> Result<Vec<ZoneRoleConfig>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open zone catalog: {}", path.display()))?;

    let mut zones = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let zone: ZoneRoleConfig = serde_json::from_str(line).with_context(|| {
            format!("Invalid zone catalog entry at {}:{}", path.display(), idx + 1)
        })?;
        zones.push(zone);
    }
    Ok(zones)
}
