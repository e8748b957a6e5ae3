//! Per-interval threshold evaluation.
//!
//! Each present metric is graded against the profile's degraded/poor pair
//! and the grades are folded into one met/not-met verdict.

use crate::db::{CheckRecord, Connectivity, ThresholdPair, Thresholds};

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lowest tier that breaks compliance unless a policy overrides it.
/// Degraded is advisory, poor is a breach.
pub const DEFAULT_BREACH_TIER: Tier = Tier::Poor;

/// Monitored dimensions of a check record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rtt,
    PacketLoss,
    Jitter,
    DnsTime,
    HttpTime,
    Download,
    Upload,
}

/// Which direction of a metric is bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsWorse,
    LowerIsWorse,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Rtt,
        Metric::PacketLoss,
        Metric::Jitter,
        Metric::DnsTime,
        Metric::HttpTime,
        Metric::Download,
        Metric::Upload,
    ];

    pub fn polarity(&self) -> Polarity {
        match self {
            Self::Download | Self::Upload => Polarity::LowerIsWorse,
            _ => Polarity::HigherIsWorse,
        }
    }

    /// The measured value, `None` when the probe did not produce one.
    /// Throughput only counts when the speed test completed.
    pub fn value(&self, record: &CheckRecord) -> Option<f64> {
        let value = match self {
            Self::Rtt => record.avg_rtt_ms,
            Self::PacketLoss => record.avg_loss_percent,
            Self::Jitter => record.avg_jitter_ms,
            Self::DnsTime => record.dns_resolve_time_ms,
            Self::HttpTime => record.http_total_time_s,
            Self::Download if record.speedtest_completed() => record.speedtest_download_mbps,
            Self::Upload if record.speedtest_completed() => record.speedtest_upload_mbps,
            Self::Download | Self::Upload => None,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn thresholds(&self, thresholds: &Thresholds) -> ThresholdPair {
        match self {
            Self::Rtt => thresholds.rtt_ms,
            Self::PacketLoss => thresholds.loss_percent,
            Self::Jitter => thresholds.jitter_ms,
            Self::DnsTime => thresholds.dns_time_ms,
            Self::HttpTime => thresholds.http_time_s,
            Self::Download => thresholds.download_mbps,
            Self::Upload => thresholds.upload_mbps,
        }
    }
}

/// Grade of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Good,
    Degraded,
    Poor,
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "degraded" => Ok(Self::Degraded),
            "poor" => Ok(Self::Poor),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Good => "good",
            Self::Degraded => "degraded",
            Self::Poor => "poor",
        };
        f.write_str(s)
    }
}

/// Folds metric grades into a met verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompliancePolicy {
    /// Any metric graded at or above this tier breaks the interval.
    pub breach_tier: Tier,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            breach_tier: DEFAULT_BREACH_TIER,
        }
    }
}

/// Where the read path takes an interval's met flag from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetSource {
    /// The flag the agent reported, recomputing only when it is missing.
    #[default]
    Stored,
    /// Always the evaluator's verdict.
    Recomputed,
}

impl FromStr for MetSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stored" => Ok(Self::Stored),
            "recomputed" => Ok(Self::Recomputed),
            other => Err(format!("unknown met source: {other}")),
        }
    }
}

/// SLA status of one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStatus {
    Met,
    NotMet,
    /// Nothing was measured; the interval does not count at all.
    Unknown,
}

impl IntervalStatus {
    fn from_met(met: bool) -> Self {
        if met {
            Self::Met
        } else {
            Self::NotMet
        }
    }
}

/// Evaluator output for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalClassification {
    pub metrics: Vec<(Metric, Tier)>,
    pub connectivity_failed: bool,
    pub status: IntervalStatus,
}

impl IntervalClassification {
    pub fn tier_of(&self, metric: Metric) -> Option<Tier> {
        self.metrics.iter().find(|(m, _)| *m == metric).map(|(_, t)| *t)
    }
}

/// Grade a single value. Exceeding a threshold (strictly) reaches its tier.
pub fn classify_metric(metric: Metric, value: f64, pair: ThresholdPair) -> Tier {
    match metric.polarity() {
        Polarity::HigherIsWorse if value > pair.poor => Tier::Poor,
        Polarity::HigherIsWorse if value > pair.degraded => Tier::Degraded,
        Polarity::LowerIsWorse if value < pair.poor => Tier::Poor,
        Polarity::LowerIsWorse if value < pair.degraded => Tier::Degraded,
        _ => Tier::Good,
    }
}

/// Grade every present metric of `record` and derive the interval status.
pub fn evaluate(
    record: &CheckRecord,
    thresholds: &Thresholds,
    policy: &CompliancePolicy,
) -> IntervalClassification {
    let metrics: Vec<(Metric, Tier)> = Metric::ALL
        .iter()
        .filter_map(|m| {
            m.value(record)
                .map(|v| (*m, classify_metric(*m, v, m.thresholds(thresholds))))
        })
        .collect();

    let connectivity = record.connectivity();
    let connectivity_failed = connectivity == Some(Connectivity::Down);

    let status = if metrics.is_empty() && connectivity.is_none() {
        IntervalStatus::Unknown
    } else {
        let breached = metrics.iter().any(|(_, t)| *t >= policy.breach_tier);
        IntervalStatus::from_met(!breached && !connectivity_failed)
    };

    IntervalClassification {
        metrics,
        connectivity_failed,
        status,
    }
}

/// Status used for aggregation.
///
/// Unknown intervals stay unknown whatever the agent reported. Otherwise
/// `MetSource::Stored` keeps the reported flag when present.
pub fn resolve(
    record: &CheckRecord,
    thresholds: &Thresholds,
    policy: &CompliancePolicy,
    source: MetSource,
) -> IntervalStatus {
    let evaluated = evaluate(record, thresholds, policy).status;
    match (evaluated, source, record.sla_met) {
        (IntervalStatus::Unknown, _, _) => IntervalStatus::Unknown,
        (_, MetSource::Stored, Some(met)) => IntervalStatus::from_met(met),
        (status, _, _) => status,
    }
}

/// A stored met flag that the evaluator disagrees with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetDisagreement {
    pub stored: bool,
    pub recomputed: bool,
}

/// Compare the agent's flag with the evaluator's verdict.
pub fn cross_check(
    record: &CheckRecord,
    thresholds: &Thresholds,
    policy: &CompliancePolicy,
) -> Option<MetDisagreement> {
    let stored = record.sla_met?;
    let recomputed = match evaluate(record, thresholds, policy).status {
        IntervalStatus::Met => true,
        IntervalStatus::NotMet => false,
        IntervalStatus::Unknown => return None,
    };
    (stored != recomputed).then_some(MetDisagreement { stored, recomputed })
}
