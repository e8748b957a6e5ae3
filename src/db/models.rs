//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The segment an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "ISP")]
    Isp,
    Client,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Isp => "ISP",
            Self::Client => "Client",
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            s if s.eq_ignore_ascii_case("isp") => Ok(Self::Isp),
            s if s.eq_ignore_ascii_case("client") => Ok(Self::Client),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Degraded and poor boundaries for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub degraded: f64,
    pub poor: f64,
}

impl ThresholdPair {
    pub const fn new(degraded: f64, poor: f64) -> Self {
        Self { degraded, poor }
    }
}

/// Per-metric thresholds of an agent profile.
///
/// Latency-style metrics get worse as they grow, so `degraded < poor`.
/// Throughput gets worse as it shrinks, so `degraded > poor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub rtt_ms: ThresholdPair,
    pub loss_percent: ThresholdPair,
    pub jitter_ms: ThresholdPair,
    pub dns_time_ms: ThresholdPair,
    pub http_time_s: ThresholdPair,
    pub download_mbps: ThresholdPair,
    pub upload_mbps: ThresholdPair,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            rtt_ms: ThresholdPair::new(100.0, 250.0),
            loss_percent: ThresholdPair::new(2.0, 10.0),
            jitter_ms: ThresholdPair::new(30.0, 50.0),
            dns_time_ms: ThresholdPair::new(300.0, 800.0),
            http_time_s: ThresholdPair::new(1.0, 2.5),
            download_mbps: ThresholdPair::new(60.0, 30.0),
            upload_mbps: ThresholdPair::new(20.0, 5.0),
        }
    }
}

impl Thresholds {
    /// Check that every pair is non-negative and ordered by severity.
    pub fn validate(&self) -> Result<(), String> {
        let rising = [
            ("rtt_ms", self.rtt_ms),
            ("loss_percent", self.loss_percent),
            ("jitter_ms", self.jitter_ms),
            ("dns_time_ms", self.dns_time_ms),
            ("http_time_s", self.http_time_s),
        ];
        let falling = [
            ("download_mbps", self.download_mbps),
            ("upload_mbps", self.upload_mbps),
        ];

        for (name, pair) in rising.iter().chain(falling.iter()) {
            if pair.degraded < 0.0 || pair.poor < 0.0 {
                return Err(format!("{name}: thresholds must be non-negative"));
            }
        }
        for (name, pair) in rising {
            if pair.degraded >= pair.poor {
                return Err(format!("{name}: degraded must be below poor"));
            }
        }
        for (name, pair) in falling {
            if pair.degraded <= pair.poor {
                return Err(format!("{name}: degraded must be above poor"));
            }
        }
        Ok(())
    }
}

/// Identity and SLA configuration of one monitored agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub is_active: bool,
    pub thresholds: Thresholds,
    pub sla_target_percentage: f64,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_reported_hostname: Option<String>,
    pub last_reported_source_ip: Option<String>,
}

impl AgentProfile {
    /// A fresh active profile with default thresholds.
    pub fn new(agent_id: &str, agent_type: AgentType) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            name: agent_id.to_string(),
            agent_type,
            is_active: true,
            thresholds: Thresholds::default(),
            sla_target_percentage: 99.5,
            last_seen: None,
            last_reported_hostname: None,
            last_reported_source_ip: None,
        }
    }
}

/// Reported link state of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Up,
    Down,
}

impl FromStr for Connectivity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" | "OK" | "CONNECTED" | "ONLINE" => Ok(Self::Up),
            "DOWN" | "FAIL" | "FAILED" | "DISCONNECTED" | "OFFLINE" => Ok(Self::Down),
            other => Err(format!("unknown connectivity state: {other}")),
        }
    }
}

/// One reporting interval of one agent. Every measurement is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub overall_connectivity: Option<String>,
    pub avg_rtt_ms: Option<f64>,
    pub avg_loss_percent: Option<f64>,
    pub avg_jitter_ms: Option<f64>,
    pub dns_status: Option<String>,
    pub dns_resolve_time_ms: Option<f64>,
    pub http_status: Option<String>,
    pub http_response_code: Option<i64>,
    pub http_total_time_s: Option<f64>,
    pub speedtest_status: Option<String>,
    pub speedtest_download_mbps: Option<f64>,
    pub speedtest_upload_mbps: Option<f64>,
    pub speedtest_ping_ms: Option<f64>,
    pub speedtest_jitter_ms: Option<f64>,
    pub detailed_health_summary: Option<String>,
    /// Met flag as supplied by the reporting agent.
    pub sla_met: Option<bool>,
}

impl CheckRecord {
    pub fn new(agent_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            timestamp,
            ..Default::default()
        }
    }

    /// Parsed connectivity, `None` when absent or unrecognised.
    pub fn connectivity(&self) -> Option<Connectivity> {
        self.overall_connectivity.as_deref()?.parse().ok()
    }

    /// Whether the speed test of this interval ran to completion.
    pub fn speedtest_completed(&self) -> bool {
        self.speedtest_status
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case("COMPLETED"))
    }
}

/// A check record tagged with its owning agent's segment.
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    pub agent_type: AgentType,
    pub record: CheckRecord,
}
