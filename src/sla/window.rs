//! Rolling SLA windows.

use super::IntervalStatus;
use crate::config::ConfigError;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

/// Longest lookback, duration plus offset, a window may span.
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// A named lookback period ending `offset` before the reference time.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub key: String,
    pub label: String,
    pub duration: ChronoDuration,
    pub offset: ChronoDuration,
}

impl Window {
    /// The trailing `days` days.
    pub fn days(days: i64) -> Result<Self, ConfigError> {
        Self::days_ending(days, 0)
    }

    /// `days` days ending `offset_days` days before the reference time.
    pub fn days_ending(days: i64, offset_days: i64) -> Result<Self, ConfigError> {
        if days <= 0 {
            return Err(ConfigError::InvalidWindowConfig(format!(
                "window duration must be positive, got {days} days"
            )));
        }
        if offset_days < 0 {
            return Err(ConfigError::InvalidWindowConfig(format!(
                "window offset cannot be negative, got {offset_days} days"
            )));
        }
        if days.saturating_add(offset_days) > MAX_WINDOW_DAYS {
            return Err(ConfigError::InvalidWindowConfig(format!(
                "window cannot reach back more than {MAX_WINDOW_DAYS} days"
            )));
        }

        let unit = if days == 1 { "Day" } else { "Days" };
        let (key, label) = if offset_days == 0 {
            (
                format!("last_{days}_{}", unit.to_lowercase()),
                format!("Last {days} {unit}"),
            )
        } else {
            (
                format!("last_{days}_{}_offset_{offset_days}", unit.to_lowercase()),
                format!("{days} {unit} ending {offset_days} Days ago"),
            )
        };

        Ok(Self {
            key,
            label,
            duration: ChronoDuration::days(days),
            offset: ChronoDuration::days(offset_days),
        })
    }

    /// Inclusive cutoff and end of the window relative to `now`.
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = now - self.offset;
        (end - self.duration, end)
    }

    /// Whether `ts` falls inside the window.
    ///
    /// Offset windows are half-open so adjacent windows never share an
    /// interval. A trailing window has no upper bound, so intervals stamped
    /// slightly ahead of `now` by agent clock skew still count.
    pub fn contains(&self, ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (cutoff, end) = self.bounds(now);
        ts >= cutoff && (self.offset == ChronoDuration::zero() || ts < end)
    }

    /// How far back from `now` records are needed to evaluate this window.
    pub fn lookback(&self) -> ChronoDuration {
        self.duration + self.offset
    }
}

/// Compliance of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowResult {
    pub key: String,
    pub label: String,
    pub total_intervals: u64,
    pub met_intervals: u64,
    pub achieved_percentage: f64,
    pub is_target_met: bool,
}

/// The part of a classified record the accumulator looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval<'a> {
    pub agent_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub status: IntervalStatus,
}

/// Running met/total counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: u64,
    pub met: u64,
}

impl Tally {
    pub fn add(&mut self, status: IntervalStatus) {
        match status {
            IntervalStatus::Met => {
                self.total += 1;
                self.met += 1;
            }
            IntervalStatus::NotMet => self.total += 1,
            IntervalStatus::Unknown => {}
        }
    }

    fn merge(&mut self, other: Tally) {
        self.total += other.total;
        self.met += other.met;
    }

    pub fn percentage(&self) -> f64 {
        achieved_percentage(self.met, self.total)
    }

    pub fn into_result(self, window: &Window, target_percentage: f64) -> WindowResult {
        let achieved = self.percentage();
        WindowResult {
            key: window.key.clone(),
            label: window.label.clone(),
            total_intervals: self.total,
            met_intervals: self.met,
            achieved_percentage: achieved,
            is_target_met: self.total > 0 && achieved >= target_percentage,
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `met / total` as a percentage, 0.0 when nothing was counted.
pub fn achieved_percentage(met: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(met.min(total) as f64 / total as f64 * 100.0)
}

/// Sort by time and drop repeated (agent, timestamp) pairs, keeping the
/// first occurrence.
pub fn dedup_intervals<'a>(intervals: &[Interval<'a>]) -> Vec<Interval<'a>> {
    let mut sorted = intervals.to_vec();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.agent_id.cmp(b.agent_id))
    });
    sorted.dedup_by(|b, a| a.timestamp == b.timestamp && a.agent_id == b.agent_id);
    sorted
}

/// Compute every window independently over the full interval set.
pub fn accumulate(
    intervals: &[Interval<'_>],
    windows: &[Window],
    now: DateTime<Utc>,
    target_percentage: f64,
) -> Vec<WindowResult> {
    let intervals = dedup_intervals(intervals);
    windows
        .iter()
        .map(|window| {
            let mut tally = Tally::default();
            for interval in intervals.iter().filter(|i| window.contains(i.timestamp, now)) {
                tally.add(interval.status);
            }
            tally.into_result(window, target_percentage)
        })
        .collect()
}

/// Single-pass accumulation for windows that share an end and therefore
/// nest by duration.
///
/// Each interval lands in the band of the smallest window containing it and
/// band counts are prefix-summed outward. Returns `None` when the windows do
/// not share an end.
pub fn accumulate_nested(
    intervals: &[Interval<'_>],
    windows: &[Window],
    now: DateTime<Utc>,
    target_percentage: f64,
) -> Option<Vec<WindowResult>> {
    let first = windows.first()?;
    if windows.iter().any(|w| w.offset != first.offset) {
        return None;
    }

    // Smallest first, so cutoffs are descending.
    let mut order: Vec<usize> = (0..windows.len()).collect();
    order.sort_by_key(|&i| windows[i].duration);
    let cutoffs: Vec<DateTime<Utc>> = order.iter().map(|&i| windows[i].bounds(now).0).collect();
    let widest = &windows[order[order.len() - 1]];

    let mut bands = vec![Tally::default(); order.len()];
    for interval in dedup_intervals(intervals) {
        if !widest.contains(interval.timestamp, now) {
            continue;
        }
        let band = cutoffs.partition_point(|c| *c > interval.timestamp);
        bands[band].add(interval.status);
    }

    let mut results: Vec<Option<WindowResult>> = vec![None; windows.len()];
    let mut running = Tally::default();
    for (band, &idx) in bands.iter().zip(&order) {
        running.merge(*band);
        results[idx] = Some(running.into_result(&windows[idx], target_percentage));
    }
    results.into_iter().collect()
}

/// Nested accumulation when valid, the independent definition otherwise.
pub fn accumulate_fast(
    intervals: &[Interval<'_>],
    windows: &[Window],
    now: DateTime<Utc>,
    target_percentage: f64,
) -> Vec<WindowResult> {
    accumulate_nested(intervals, windows, now, target_percentage)
        .unwrap_or_else(|| accumulate(intervals, windows, now, target_percentage))
}
