//! End-to-end tests: zone events in, port calls and labels out

use chrono::{DateTime, Duration, TimeZone, Utc};
use port_calls::domain::error::PortCallError;
use port_calls::domain::port_call::CensorReason;
use port_calls::domain::types::{EventKind, ZoneEvent, ZoneId, ZoneRole, ZoneRoleConfig};
use port_calls::domain::PortCall;
use port_calls::infra::{Config, Metrics};
use port_calls::io::{RunRecord, Store};
use port_calls::services::label_emitter::{Feature, HorizonGuard};
use port_calls::services::normalizer::{normalize, NormalizeParams};
use port_calls::services::role_assigner::assign_roles;
use port_calls::services::session_builder::SessionBuilder;
use port_calls::services::{Pipeline, RunOutput, RunParams, ZoneRoleRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const VESSEL: &str = "710000001";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 6, 0, 0).unwrap()
}

fn at(hours: i64) -> DateTime<Utc> {
    t0() + Duration::hours(hours)
}

fn zones() -> Vec<ZoneRoleConfig> {
    vec![
        ZoneRoleConfig::new("STS", "ANCH_A", ZoneRole::Queue).with_priority(1),
        ZoneRoleConfig::new("STS", "ANCH_B", ZoneRole::Queue).with_priority(2),
        ZoneRoleConfig::new("STS", "OUTER_Q", ZoneRole::Queue),
        ZoneRoleConfig::new("STS", "OUTER_P", ZoneRole::Queue),
        ZoneRoleConfig::new("STS", "BASIN", ZoneRole::Basin),
        ZoneRoleConfig::new("STS", "BERTH_1", ZoneRole::Berth).with_berth_slot("1"),
    ]
}

fn config() -> Config {
    Config::default().with_zones(zones())
}

fn registry() -> Arc<ZoneRoleRegistry> {
    Arc::new(ZoneRoleRegistry::from_configs(zones()).unwrap())
}

fn params(until_h: i64) -> RunParams {
    RunParams {
        since: at(0),
        until: at(until_h),
        snapshot: at(until_h),
        lookback: Duration::days(2),
        ports: BTreeSet::new(),
    }
}

fn ev(zone: &str, kind: EventKind, hours: i64) -> ZoneEvent {
    ZoneEvent::new(VESSEL, "STS", zone, kind, at(hours))
}

fn run(config: &Config, events: Vec<ZoneEvent>, params: &RunParams) -> RunOutput {
    Pipeline::new(config, registry(), Arc::new(Metrics::new())).run_sequential(events, params)
}

fn only_call(output: &RunOutput) -> &PortCall {
    assert_eq!(output.port_calls.len(), 1, "expected exactly one port call");
    output.port_calls.values().next().unwrap()
}

/// Queue 0h, basin 5h, berth 30h, leaves berth 80h
fn full_call() -> Vec<ZoneEvent> {
    vec![
        ev("ANCH_A", EventKind::Enter, 0),
        ev("ANCH_A", EventKind::Exit, 5),
        ev("BASIN", EventKind::Enter, 5),
        ev("BASIN", EventKind::Exit, 30),
        ev("BERTH_1", EventKind::Enter, 30),
        ev("BERTH_1", EventKind::Exit, 80),
    ]
}

fn record(params: &RunParams, output: &RunOutput) -> RunRecord {
    RunRecord {
        site_id: "it".to_string(),
        since: params.since,
        until: params.until,
        snapshot: params.snapshot,
        summary: output.summary.clone(),
    }
}

#[test]
fn test_completed_call_timings() {
    let output = run(&config(), full_call(), &params(100));
    let call = only_call(&output);

    assert!(!call.censored);
    assert_eq!(call.queue_start_utc, Some(at(0)));
    assert_eq!(call.basin_start_utc, Some(at(5)));
    assert_eq!(call.berth_start_utc, Some(at(30)));
    assert_eq!(call.berth_end_utc, Some(at(80)));
    assert_eq!(call.berth_zone_id, Some(ZoneId::new("BERTH_1")));
    assert_eq!(call.queue_wait_hours, Some(5.0));
    assert_eq!(call.time_to_berth_hours, Some(25.0));
    assert_eq!(call.alongside_hours, Some(50.0));
    assert_eq!(call.session_end_utc, Some(at(80)));
}

#[test]
fn test_long_basin_wait_is_censored() {
    let events = vec![ev("BASIN", EventKind::Enter, 0)];
    let output = run(&config(), events, &params(400));
    let call = only_call(&output);

    assert!(call.censored);
    assert_eq!(call.berth_start_utc, None);
    assert_eq!(call.time_to_berth_hours, Some(400.0));

    let label = &output.labels[&call.port_call_ref];
    assert!(label.censored);
    assert_eq!(label.observed_wait_hours, 400.0);
    assert_eq!(label.label_ts_utc, at(400));
}

#[test]
fn test_gap_threshold_splits_sessions() {
    let events = || {
        vec![
            ev("BASIN", EventKind::Enter, 0),
            ev("BASIN", EventKind::Exit, 2),
            ev("BASIN", EventKind::Enter, 10),
        ]
    };

    let six = run(&config().with_default_gap_hours(6.0), events(), &params(100));
    assert_eq!(six.port_calls.len(), 2);
    let starts: Vec<_> = six.port_calls.keys().map(|k| k.session_start).collect();
    assert_eq!(starts, vec![at(0), at(10)]);

    let twelve = run(&config().with_default_gap_hours(12.0), events(), &params(100));
    assert_eq!(only_call(&twelve).session_start_utc, at(0));
}

#[test]
fn test_stage_order_holds_after_clamping() {
    // Basin reported before the queue, as with a late anchorage fix
    let events = vec![
        ev("BASIN", EventKind::Enter, 2),
        ev("ANCH_A", EventKind::Enter, 10),
        ev("ANCH_A", EventKind::Exit, 11),
        ev("BASIN", EventKind::Exit, 20),
        ev("BERTH_1", EventKind::Enter, 20),
        ev("BERTH_1", EventKind::Exit, 40),
    ];
    let output = run(&config(), events, &params(100));
    let call = only_call(&output);

    let queue = call.queue_start_utc.unwrap();
    let basin = call.basin_start_utc.unwrap();
    let berth = call.berth_start_utc.unwrap();
    assert!(queue <= basin && basin <= berth);
    assert_eq!(queue, at(2));
    assert!(call.zone_order_anomaly);
    assert!(output.labels[&call.port_call_ref].zone_order_anomaly);
}

#[test]
fn test_censored_calls_withhold_berth() {
    // Still alongside when the session goes silent
    let events = vec![
        ev("BASIN", EventKind::Enter, 5),
        ev("BASIN", EventKind::Exit, 20),
        ev("BERTH_1", EventKind::Enter, 20),
    ];
    let output = run(&config(), events, &params(100));
    let call = only_call(&output);

    assert!(call.censored);
    assert_eq!(call.censor_reason, Some(CensorReason::ClosedAtBerth));
    assert_eq!(call.berth_start_utc, None);
    assert_eq!(call.berth_end_utc, None);
    assert_eq!(call.alongside_hours, None);
    assert_eq!(call.time_to_berth_hours, Some(95.0));
}

#[test]
fn test_every_censored_call_uses_snapshot_wait() {
    let mut events = full_call();
    events.extend([
        ZoneEvent::new("710000002", "STS", "BASIN", EventKind::Enter, at(60)),
        ZoneEvent::new("710000003", "STS", "ANCH_B", EventKind::Enter, at(90)),
        ZoneEvent::new("710000004", "STS", "BASIN", EventKind::Enter, at(95)),
    ]);
    let output = run(&config(), events, &params(100));
    assert_eq!(output.port_calls.len(), 4);

    for call in output.port_calls.values().filter(|c| c.censored) {
        assert_eq!(call.berth_start_utc, None);
        if let Some(basin) = call.basin_start_utc {
            let expected = (call.snapshot_utc - basin).num_minutes() as f64 / 60.0;
            assert_eq!(call.time_to_berth_hours, Some(expected));
        }
    }
    assert_eq!(output.summary.calls_censored, 3);
}

#[test]
fn test_label_cutoff_equals_label_ts() {
    let mut events = full_call();
    events.push(ZoneEvent::new("710000002", "STS", "BASIN", EventKind::Enter, at(60)));
    let output = run(&config(), events, &params(100));
    assert_eq!(output.labels.len(), 2);

    for label in output.labels.values() {
        assert_eq!(label.horizon_cutoff_ts_utc, label.label_ts_utc);
        assert!(label.features.contains_key("queue_vessels_6h"));
    }

    let label = output.labels.values().find(|l| !l.censored).unwrap();
    let guard = HorizonGuard::for_label(label);
    let mut features = BTreeMap::new();
    let rejected = guard.admit(
        &mut features,
        vec![Feature::new("berth_start_hour", 6.0, label.label_ts_utc + Duration::hours(25))],
    );
    assert_eq!(rejected.len(), 1);
    assert!(features.is_empty());
}

#[test]
fn test_features_ignore_later_arrivals() {
    let mut events = full_call();
    // Arrives in the basin after our vessel's label timestamp
    events.push(ZoneEvent::new("710000002", "STS", "BASIN", EventKind::Enter, at(6)));
    let output = run(&config(), events, &params(100));

    let label = output.labels.values().find(|l| l.vessel_id.as_str() == VESSEL).unwrap();
    assert_eq!(label.label_ts_utc, at(5));
    assert_eq!(label.features["basin_vessels_30m"], 1.0);
    assert_eq!(label.features["hour_utc"], 11.0);
    assert_eq!(label.features["dow_utc"], 1.0);
    assert_eq!(label.features["is_weekend"], 0.0);
}

#[test]
fn test_queue_tie_is_deterministic() {
    let registry = registry();
    let normalize_params = NormalizeParams {
        since: at(0),
        until: at(100),
        lookback: Duration::days(2),
        ports: BTreeSet::new(),
        validate_mmsi: true,
    };
    let queue_zone = |events: Vec<ZoneEvent>| {
        let mut batch = normalize(events, &registry, &normalize_params);
        let events = batch.vessels.remove(&port_calls::domain::VesselId::new(VESSEL)).unwrap();
        let mut sessions = SessionBuilder::new(Duration::hours(12)).build(events, at(100)).unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(assign_roles(&mut sessions[0]).is_empty());
        sessions[0].stamp(ZoneRole::Queue).unwrap().zone_id.clone()
    };

    // Configured priority wins regardless of input order
    let forward = vec![ev("ANCH_A", EventKind::Enter, 1), ev("ANCH_B", EventKind::Enter, 1)];
    let reverse = vec![ev("ANCH_B", EventKind::Enter, 1), ev("ANCH_A", EventKind::Enter, 1)];
    assert_eq!(queue_zone(forward), ZoneId::new("ANCH_A"));
    assert_eq!(queue_zone(reverse), ZoneId::new("ANCH_A"));

    // Without priorities the zone id decides
    for _ in 0..3 {
        let events = vec![ev("OUTER_Q", EventKind::Enter, 1), ev("OUTER_P", EventKind::Enter, 1)];
        assert_eq!(queue_zone(events), ZoneId::new("OUTER_P"));
    }
}

#[tokio::test]
async fn test_reprocessing_is_byte_identical() {
    let mut events = full_call();
    for i in 2..8 {
        let vessel = format!("71000000{i}");
        events.push(ZoneEvent::new(&vessel, "STS", "ANCH_B", EventKind::Enter, at(i)));
        events.push(ZoneEvent::new(&vessel, "STS", "BASIN", EventKind::Enter, at(i + 3)));
    }
    let run_params = params(100);
    let config = config().with_worker_count(3);

    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    for dir in [&dir_a, &dir_b] {
        let mut shuffled = events.clone();
        if dir.path() == dir_b.path() {
            shuffled.reverse();
        }
        let pipeline = Pipeline::new(&config, registry(), Arc::new(Metrics::new()));
        let output = pipeline.run(shuffled, &run_params).await.unwrap();
        let store = Store::new(dir.path());
        store.commit(&output, &record(&run_params, &output)).unwrap();
        // Re-running into the same store must not change it
        store.commit(&output, &record(&run_params, &output)).unwrap();
    }

    let a = Store::new(dir_a.path());
    let b = Store::new(dir_b.path());
    assert_eq!(fs::read(a.port_calls_path()).unwrap(), fs::read(b.port_calls_path()).unwrap());
    assert_eq!(fs::read(a.labels_path()).unwrap(), fs::read(b.labels_path()).unwrap());
    assert_eq!(a.load_port_calls().unwrap().len(), 7);
}

#[test]
fn test_port_filter_limits_output() {
    let mut events = full_call();
    events.push(ZoneEvent::new("710000002", "SSZ", "BASIN", EventKind::Enter, at(3)));
    let mut run_params = params(100);
    run_params.ports = BTreeSet::from([port_calls::domain::PortCode::new("sts")]);

    let output = run(&config(), events, &run_params);
    assert_eq!(only_call(&output).vessel_id.as_str(), VESSEL);
    assert_eq!(output.summary.dropped_port_filtered, 1);
}

#[test]
fn test_rerun_replaces_superseded_calls() {
    let dir = tempdir().unwrap();
    let store = Store::new(dir.path());
    let run_params = params(100);

    // A 20h silence splits the first run into two calls
    let first = vec![
        ev("BASIN", EventKind::Enter, 0),
        ev("BERTH_1", EventKind::Enter, 20),
        ev("BERTH_1", EventKind::Exit, 30),
    ];
    let output = run(&config(), first.clone(), &run_params);
    assert_eq!(output.port_calls.len(), 2);
    store.commit(&output, &record(&run_params, &output)).unwrap();

    // A late basin exit bridges the gap into a single completed call
    let mut second = first;
    second.push(ev("BASIN", EventKind::Exit, 10));
    let output = run(&config(), second, &run_params);
    let call = only_call(&output).clone();
    assert!(!call.censored);
    let stats = store.commit(&output, &record(&run_params, &output)).unwrap();
    assert_eq!(stats.port_calls_removed, 1);

    let calls = store.load_port_calls().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[&call.key()], call);
    let labels = store.load_labels().unwrap();
    assert_eq!(labels.len(), 1);
    assert!(!labels[&call.port_call_ref].censored);
    assert_eq!(labels[&call.port_call_ref].observed_wait_hours, 20.0);
}

#[test]
fn test_configuration_errors_reach_output() {
    let mut zones = zones();
    zones.push(ZoneRoleConfig::new("STS", "ANCH_C", ZoneRole::Queue).with_priority(1));
    zones.push(ZoneRoleConfig::new("STS", "BERTH_1B", ZoneRole::Berth).with_berth_slot("1"));
    let registry = Arc::new(ZoneRoleRegistry::from_configs(zones).unwrap());

    let mut events = full_call();
    events.push(ev("ANCH_C", EventKind::Enter, 0));
    events.push(ev("PILOT", EventKind::Enter, 4));
    events.push(ev("PILOT", EventKind::Exit, 5));

    let pipeline = Pipeline::new(&config(), registry, Arc::new(Metrics::new()));
    let output = pipeline.run_sequential(events, &params(100));

    let zones: BTreeSet<&str> = output
        .configuration_errors
        .iter()
        .map(|err| match err {
            PortCallError::Configuration { zone_id, .. } => zone_id.as_str(),
            other => panic!("unexpected error {other}"),
        })
        .collect();
    assert_eq!(zones, BTreeSet::from(["ANCH_C", "BERTH_1B", "PILOT"]));
    assert_eq!(output.configuration_errors.len(), 3);
    assert_eq!(output.summary.configuration_errors, 3);
    assert_eq!(only_call(&output).queue_start_utc, Some(at(0)));
}
