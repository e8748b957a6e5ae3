//! Chart downsampling of check records.

use crate::db::CheckRecord;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const HOUR_SECONDS: i64 = 3_600;
const DAY_SECONDS: i64 = 86_400;

/// Periods up to this many days chart hourly, longer ones daily.
pub const HOURLY_MAX_DAYS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
    Seconds(i64),
}

impl Granularity {
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Hour => HOUR_SECONDS,
            Self::Day => DAY_SECONDS,
            Self::Seconds(s) => (*s).max(1),
        }
    }

    /// Bucket size used for a lookback of `days`.
    pub fn for_period_days(days: i64) -> Self {
        if days <= HOURLY_MAX_DAYS {
            Self::Hour
        } else {
            Self::Day
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartMode {
    /// The most recent individual records, unaveraged.
    Recent,
    /// Mean per time bucket.
    Bucketed(Granularity),
}

/// Truncate a timestamp to the start of its bucket.
pub fn truncate_to_bucket(dt: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let ts = dt.timestamp();
    let truncated = ts - ts.rem_euclid(granularity.seconds());
    DateTime::from_timestamp(truncated, 0).unwrap_or(dt)
}

/// A point type the downsampler can fill.
pub trait ChartPoint: Sized {
    /// Whether a record belongs to this series at all.
    fn accepts(_record: &CheckRecord) -> bool {
        true
    }

    fn fields(record: &CheckRecord) -> Vec<Option<f64>>;

    fn build(timestamp: DateTime<Utc>, values: &[Option<f64>], samples: usize) -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyPoint {
    pub timestamp: DateTime<Utc>,
    pub avg_rtt_ms: Option<f64>,
    pub avg_loss_percent: Option<f64>,
    pub avg_jitter_ms: Option<f64>,
    /// Records that contributed at least one value.
    pub samples: usize,
}

impl ChartPoint for LatencyPoint {
    fn fields(record: &CheckRecord) -> Vec<Option<f64>> {
        vec![record.avg_rtt_ms, record.avg_loss_percent, record.avg_jitter_ms]
    }

    fn build(timestamp: DateTime<Utc>, values: &[Option<f64>], samples: usize) -> Self {
        Self {
            timestamp,
            avg_rtt_ms: values[0],
            avg_loss_percent: values[1],
            avg_jitter_ms: values[2],
            samples,
        }
    }
}

/// Speed-test series. Only completed speed tests contribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputPoint {
    pub timestamp: DateTime<Utc>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    /// Records that contributed at least one value.
    pub samples: usize,
}

impl ChartPoint for ThroughputPoint {
    fn accepts(record: &CheckRecord) -> bool {
        record.speedtest_completed()
    }

    fn fields(record: &CheckRecord) -> Vec<Option<f64>> {
        vec![
            record.speedtest_download_mbps,
            record.speedtest_upload_mbps,
            record.speedtest_ping_ms,
            record.speedtest_jitter_ms,
        ]
    }

    fn build(timestamp: DateTime<Utc>, values: &[Option<f64>], samples: usize) -> Self {
        Self {
            timestamp,
            download_mbps: values[0],
            upload_mbps: values[1],
            ping_ms: values[2],
            jitter_ms: values[3],
            samples,
        }
    }
}

/// Mean over present, finite values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    pub fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Downsample `records` into at most `max_points` ascending points.
///
/// Input order does not matter.
pub fn downsample<P: ChartPoint>(
    records: &[CheckRecord],
    mode: ChartMode,
    max_points: usize,
) -> Vec<P> {
    let mut accepted: Vec<&CheckRecord> = records.iter().filter(|r| P::accepts(r)).collect();
    accepted.sort_by_key(|r| r.timestamp);

    match mode {
        ChartMode::Recent => {
            let skip = accepted.len().saturating_sub(max_points);
            accepted[skip..]
                .iter()
                .map(|r| {
                    let values: Vec<Option<f64>> = P::fields(r)
                        .into_iter()
                        .map(|v| v.filter(|v| v.is_finite()))
                        .collect();
                    let samples = usize::from(values.iter().any(Option::is_some));
                    P::build(r.timestamp, &values, samples)
                })
                .collect()
        }
        ChartMode::Bucketed(granularity) => {
            let mut buckets: BTreeMap<DateTime<Utc>, (Vec<Mean>, usize)> = BTreeMap::new();
            for record in accepted {
                let fields = P::fields(record);
                let (means, samples) = buckets
                    .entry(truncate_to_bucket(record.timestamp, granularity))
                    .or_insert_with(|| (vec![Mean::default(); fields.len()], 0));
                let mut contributed = false;
                for (mean, value) in means.iter_mut().zip(fields) {
                    let value = value.filter(|v| v.is_finite());
                    contributed |= value.is_some();
                    mean.push(value);
                }
                if contributed {
                    *samples += 1;
                }
            }

            let points: Vec<P> = buckets
                .into_iter()
                .filter_map(|(ts, (means, samples))| {
                    let values: Vec<Option<f64>> = means.iter().map(Mean::value).collect();
                    values
                        .iter()
                        .any(Option::is_some)
                        .then(|| P::build(ts, &values, samples))
                })
                .collect();

            let skip = points.len().saturating_sub(max_points);
            points.into_iter().skip(skip).collect()
        }
    }
}

pub fn latency_series(
    records: &[CheckRecord],
    mode: ChartMode,
    max_points: usize,
) -> Vec<LatencyPoint> {
    downsample(records, mode, max_points)
}

pub fn throughput_series(
    records: &[CheckRecord],
    mode: ChartMode,
    max_points: usize,
) -> Vec<ThroughputPoint> {
    downsample(records, mode, max_points)
}
