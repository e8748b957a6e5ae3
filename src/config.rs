//! Configuration module for slamon.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::sla::{CompliancePolicy, LivenessConfig, MetSource, Window, MAX_WINDOW_DAYS};

use chrono::Duration as ChronoDuration;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid window configuration: {0}")]
    InvalidWindowConfig(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "slamon.db")
    pub db_path: String,
    /// Refresh hint handed to dashboard clients (default: 60000)
    pub dashboard_refresh_ms: u64,
    pub sla: SlaConfig,
}

/// Settings of the SLA aggregation engine.
#[derive(Debug, Clone)]
pub struct SlaConfig {
    pub windows: Vec<Window>,
    pub liveness: LivenessConfig,
    /// Used when a profile carries no usable target.
    pub default_target_percentage: f64,
    /// Lookback of the fleet summary when no period is requested.
    pub summary_period_days: i64,
    pub recent_chart_points: usize,
    pub trend_chart_points: usize,
    pub policy: CompliancePolicy,
    pub met_source: MetSource,
    pub query_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "slamon.db".to_string(),
            dashboard_refresh_ms: 60_000,
            sla: SlaConfig::default(),
        }
    }
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            windows: [1, 7, 30, 365]
                .into_iter()
                .filter_map(|d| Window::days(d).ok())
                .collect(),
            liveness: LivenessConfig::default(),
            default_target_percentage: 99.5,
            summary_period_days: 30,
            recent_chart_points: 48,
            trend_chart_points: 96,
            policy: CompliancePolicy::default(),
            met_source: MetSource::default(),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SLAMON_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SLAMON_DB_PATH`: Database file path (default: "slamon.db")
    /// - `SLAMON_DASHBOARD_REFRESH_MS`: dashboard refresh hint (default: 60000)
    /// - `SLAMON_SLA_WINDOWS`: comma list of `days` or `days@offset_days`
    ///   (default: "1,7,30,365")
    /// - `SLAMON_EXPECTED_INTERVAL_MINUTES`: reporting cadence (default: 15)
    /// - `SLAMON_STALE_MARGIN_MINUTES`: grace on top of the cadence (default: 5)
    /// - `SLAMON_OFFLINE_GRACE_MULTIPLE`: stale-to-offline multiple (default: 2)
    /// - `SLAMON_DEFAULT_SLA_TARGET`: fallback target percentage (default: 99.5)
    /// - `SLAMON_SUMMARY_PERIOD_DAYS`: fleet summary lookback (default: 30)
    /// - `SLAMON_RECENT_CHART_POINTS`: raw chart length (default: 48)
    /// - `SLAMON_TREND_CHART_POINTS`: bucketed chart length (default: 96)
    /// - `SLAMON_BREACH_TIER`: `degraded` or `poor` (default: poor)
    /// - `SLAMON_MET_SOURCE`: `stored` or `recomputed` (default: stored)
    /// - `SLAMON_QUERY_TIMEOUT_MS`: per-request store deadline (default: 5000)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        override_parsed(&lookup, "SLAMON_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("SLAMON_DB_PATH") {
            cfg.db_path = db_path;
        }
        override_parsed(&lookup, "SLAMON_DASHBOARD_REFRESH_MS", &mut cfg.dashboard_refresh_ms);

        let sla = &mut cfg.sla;
        if let Some(spec) = lookup("SLAMON_SLA_WINDOWS") {
            sla.windows = parse_windows(&spec)?;
        }

        let mut expected_minutes: i64 = 15;
        let mut margin_minutes: i64 = 5;
        override_parsed(&lookup, "SLAMON_EXPECTED_INTERVAL_MINUTES", &mut expected_minutes);
        override_parsed(&lookup, "SLAMON_STALE_MARGIN_MINUTES", &mut margin_minutes);
        override_parsed(
            &lookup,
            "SLAMON_OFFLINE_GRACE_MULTIPLE",
            &mut sla.liveness.offline_multiple,
        );
        // Capped at one week.
        sla.liveness.expected_interval = ChronoDuration::minutes(expected_minutes.clamp(1, 10_080));
        sla.liveness.stale_margin = ChronoDuration::minutes(margin_minutes.clamp(0, 10_080));
        if !(sla.liveness.offline_multiple >= 1.0) {
            tracing::warn!(
                "SLAMON_OFFLINE_GRACE_MULTIPLE below 1 ({}), using 1",
                sla.liveness.offline_multiple
            );
            sla.liveness.offline_multiple = 1.0;
        }

        override_parsed(&lookup, "SLAMON_DEFAULT_SLA_TARGET", &mut sla.default_target_percentage);
        if !(sla.default_target_percentage > 0.0 && sla.default_target_percentage <= 100.0) {
            tracing::warn!(
                "SLAMON_DEFAULT_SLA_TARGET out of range ({}), using 99.5",
                sla.default_target_percentage
            );
            sla.default_target_percentage = 99.5;
        }

        override_parsed(&lookup, "SLAMON_SUMMARY_PERIOD_DAYS", &mut sla.summary_period_days);
        if !(1..=MAX_WINDOW_DAYS).contains(&sla.summary_period_days) {
            return Err(ConfigError::InvalidValue {
                key: "SLAMON_SUMMARY_PERIOD_DAYS",
                reason: format!(
                    "must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                    sla.summary_period_days
                ),
            });
        }

        override_parsed(&lookup, "SLAMON_RECENT_CHART_POINTS", &mut sla.recent_chart_points);
        override_parsed(&lookup, "SLAMON_TREND_CHART_POINTS", &mut sla.trend_chart_points);
        sla.recent_chart_points = sla.recent_chart_points.max(1);
        sla.trend_chart_points = sla.trend_chart_points.max(1);

        override_parsed(&lookup, "SLAMON_BREACH_TIER", &mut sla.policy.breach_tier);
        override_parsed(&lookup, "SLAMON_MET_SOURCE", &mut sla.met_source);

        let mut timeout_ms: u64 = 5_000;
        override_parsed(&lookup, "SLAMON_QUERY_TIMEOUT_MS", &mut timeout_ms);
        sla.query_timeout = Duration::from_millis(timeout_ms.max(1));

        Ok(cfg)
    }
}

/// Replace `slot` with the parsed value of `key`, keeping the default when
/// the value does not parse.
fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(e) => tracing::warn!("Ignoring {}={:?}: {}", key, raw, e),
        }
    }
}

/// Parse a window list such as `1,7,30` or `7,7@7`.
pub fn parse_windows(spec: &str) -> Result<Vec<Window>, ConfigError> {
    let mut windows: Vec<Window> = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (days, offset) = match part.split_once('@') {
            Some((d, o)) => (d.trim(), o.trim()),
            None => (part, "0"),
        };
        let days: i64 = days
            .parse()
            .map_err(|_| ConfigError::InvalidWindowConfig(format!("bad day count in {part:?}")))?;
        let offset: i64 = offset
            .parse()
            .map_err(|_| ConfigError::InvalidWindowConfig(format!("bad offset in {part:?}")))?;

        let window = Window::days_ending(days, offset)?;
        if windows.iter().any(|w| w.key == window.key) {
            return Err(ConfigError::InvalidWindowConfig(format!("duplicate window {part:?}")));
        }
        windows.push(window);
    }

    if windows.is_empty() {
        return Err(ConfigError::InvalidWindowConfig("no windows configured".to_string()));
    }
    Ok(windows)
}
