//! Configuration loading from TOML files
//!
//! The config file is passed with `--config <path>` (default: config/dev.toml).
//! Every section is optional; missing values fall back to the defaults below.

use crate::domain::types::{PortCode, ZoneRoleConfig};
use anyhow::{ensure, Context};
use chrono::Duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "port-calls".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Inactivity gap (hours) after which a new session starts
    #[serde(default = "default_gap_hours")]
    pub default_gap_hours: f64,
    /// Close a session as soon as the vessel has left every zone after berthing
    #[serde(default)]
    pub departure_closes_session: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { default_gap_hours: default_gap_hours(), departure_closes_session: false }
    }
}

fn default_gap_hours() -> f64 {
    12.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PortOverrideConfig {
    #[serde(default)]
    pub gap_hours: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Extra days read before `since` to catch in-progress sessions
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Window length when no `--since` and no checkpoint exist
    #[serde(default = "default_since_days")]
    pub since_days: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { lookback_days: default_lookback_days(), since_days: default_since_days() }
    }
}

fn default_lookback_days() -> u32 {
    20
}

fn default_since_days() -> u32 {
    365
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    /// Drop events whose vessel id is not a 7-9 digit MMSI
    #[serde(default = "default_validate_mmsi")]
    pub validate_mmsi: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { validate_mmsi: default_validate_mmsi() }
    }
}

fn default_validate_mmsi() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { count: default_worker_count() }
    }
}

fn default_worker_count() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_features_enabled")]
    pub enabled: bool,
    /// Congestion windows in minutes, each producing queue/basin counts
    #[serde(default = "default_feature_windows_min")]
    pub windows_min: Vec<u32>,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self { enabled: default_features_enabled(), windows_min: default_feature_windows_min() }
    }
}

fn default_features_enabled() -> bool {
    true
}

fn default_feature_windows_min() -> Vec<u32> {
    vec![30, 120, 360, 1440]
}

/// Upper bound for `window.lookback_days` and `--lookback-days`
pub const MAX_LOOKBACK_DAYS: u32 = 3_650;
/// Upper bound for `window.since_days`
pub const MAX_SINCE_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Zone crossing events (JSONL)
    #[serde(default = "default_events_file")]
    pub events_file: String,
    /// Optional zone role catalog (JSONL), merged with inline [[zones]]
    #[serde(default)]
    pub catalog_file: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { events_file: default_events_file(), catalog_file: None }
    }
}

fn default_events_file() -> String {
    "events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Directory holding port_calls.jsonl, labels.jsonl and the checkpoint
    #[serde(default = "default_egress_dir")]
    pub dir: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { dir: default_egress_dir() }
    }
}

fn default_egress_dir() -> String {
    "out".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus textfile path (disabled when absent)
    #[serde(default)]
    pub textfile: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub ports: BTreeMap<String, PortOverrideConfig>,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub zones: Vec<ZoneRoleConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    default_gap: Duration,
    port_gaps: BTreeMap<PortCode, Duration>,
    departure_closes_session: bool,
    lookback_days: u32,
    since_days: u32,
    validate_mmsi: bool,
    worker_count: usize,
    features_enabled: bool,
    feature_windows_min: Vec<u32>,
    events_file: String,
    catalog_file: Option<String>,
    egress_dir: String,
    metrics_textfile: Option<String>,
    zones: Vec<ZoneRoleConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            default_gap: hours_to_duration(default_gap_hours()),
            port_gaps: BTreeMap::new(),
            departure_closes_session: false,
            lookback_days: default_lookback_days(),
            since_days: default_since_days(),
            validate_mmsi: default_validate_mmsi(),
            worker_count: default_worker_count(),
            features_enabled: default_features_enabled(),
            feature_windows_min: default_feature_windows_min(),
            events_file: default_events_file(),
            catalog_file: None,
            egress_dir: default_egress_dir(),
            metrics_textfile: None,
            zones: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

/// Convert fractional hours to a millisecond-precision duration
pub fn hours_to_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;

        ensure!(
            toml_config.sessions.default_gap_hours > 0.0,
            "sessions.default_gap_hours must be positive"
        );
        ensure!(toml_config.workers.count > 0, "workers.count must be at least 1");
        ensure!(
            toml_config.window.lookback_days <= MAX_LOOKBACK_DAYS,
            "window.lookback_days must be at most {MAX_LOOKBACK_DAYS}"
        );
        ensure!(
            toml_config.window.since_days <= MAX_SINCE_DAYS,
            "window.since_days must be at most {MAX_SINCE_DAYS}"
        );
        ensure!(
            toml_config.features.windows_min.iter().all(|m| *m > 0),
            "features.windows_min entries must be positive"
        );

        let mut port_gaps = BTreeMap::new();
        for (code, port) in toml_config.ports {
            if let Some(hours) = port.gap_hours {
                ensure!(hours > 0.0, "ports.{code}.gap_hours must be positive");
                port_gaps.insert(PortCode::new(&code), hours_to_duration(hours));
            }
        }

        Ok(Self {
            site_id: toml_config.site.id,
            default_gap: hours_to_duration(toml_config.sessions.default_gap_hours),
            port_gaps,
            departure_closes_session: toml_config.sessions.departure_closes_session,
            lookback_days: toml_config.window.lookback_days,
            since_days: toml_config.window.since_days,
            validate_mmsi: toml_config.normalizer.validate_mmsi,
            worker_count: toml_config.workers.count,
            features_enabled: toml_config.features.enabled,
            feature_windows_min: toml_config.features.windows_min,
            events_file: toml_config.input.events_file,
            catalog_file: toml_config.input.catalog_file,
            egress_dir: toml_config.egress.dir,
            metrics_textfile: toml_config.metrics.textfile,
            zones: toml_config.zones,
            config_file: "inline".to_string(),
        })
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn default_gap(&self) -> Duration {
        self.default_gap
    }

    pub fn port_gaps(&self) -> &BTreeMap<PortCode, Duration> {
        &self.port_gaps
    }

    pub fn departure_closes_session(&self) -> bool {
        self.departure_closes_session
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    pub fn since_days(&self) -> u32 {
        self.since_days
    }

    pub fn validate_mmsi(&self) -> bool {
        self.validate_mmsi
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn features_enabled(&self) -> bool {
        self.features_enabled
    }

    pub fn feature_windows_min(&self) -> &[u32] {
        &self.feature_windows_min
    }

    pub fn events_file(&self) -> &str {
        &self.events_file
    }

    pub fn catalog_file(&self) -> Option<&str> {
        self.catalog_file.as_deref()
    }

    pub fn egress_dir(&self) -> &str {
        &self.egress_dir
    }

    pub fn metrics_textfile(&self) -> Option<&str> {
        self.metrics_textfile.as_deref()
    }

    pub fn zones(&self) -> &[ZoneRoleConfig] {
        &self.zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // Builder methods used by CLI overrides and tests
    pub fn with_default_gap_hours(mut self, hours: f64) -> Self {
        self.default_gap = hours_to_duration(hours);
        self
    }

    pub fn with_port_gap_hours(mut self, port: &str, hours: f64) -> Self {
        self.port_gaps.insert(PortCode::new(port), hours_to_duration(hours));
        self
    }

    pub fn with_departure_closes_session(mut self, enabled: bool) -> Self {
        self.departure_closes_session = enabled;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_features_enabled(mut self, enabled: bool) -> Self {
        self.features_enabled = enabled;
        self
    }

    pub fn with_feature_windows_min(mut self, windows: Vec<u32>) -> Self {
        self.feature_windows_min = windows;
        self
    }

    pub fn with_zones(mut self, zones: Vec<ZoneRoleConfig>) -> Self {
        self.zones = zones;
        self
    }
}
