//! Agent liveness from last-report age.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Online,
    Stale,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    /// How often agents are expected to report.
    pub expected_interval: ChronoDuration,
    /// Lateness tolerated before an agent counts as stale.
    pub stale_margin: ChronoDuration,
    /// Beyond `offline_multiple` times the stale threshold an agent is offline.
    pub offline_multiple: f64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            expected_interval: ChronoDuration::minutes(15),
            stale_margin: ChronoDuration::minutes(5),
            offline_multiple: 2.0,
        }
    }
}

impl LivenessConfig {
    /// Age up to which an agent is online.
    pub fn stale_after(&self) -> ChronoDuration {
        self.expected_interval + self.stale_margin
    }

    /// Age beyond which an agent is offline.
    pub fn offline_after(&self) -> ChronoDuration {
        let ms = self.stale_after().num_milliseconds() as f64 * self.offline_multiple.max(1.0);
        ChronoDuration::milliseconds(ms.round() as i64)
    }

    pub fn classify(&self, last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> LivenessState {
        let Some(last_seen) = last_seen else {
            return LivenessState::Offline;
        };
        // Clock skew can put the last report slightly in the future.
        let age = (now - last_seen).max(ChronoDuration::zero());

        if age <= self.stale_after() {
            LivenessState::Online
        } else if age <= self.offline_after() {
            LivenessState::Stale
        } else {
            LivenessState::Offline
        }
    }
}

/// Classify with the default offline multiple.
pub fn classify(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    expected_interval: ChronoDuration,
    stale_margin: ChronoDuration,
) -> LivenessState {
    LivenessConfig {
        expected_interval,
        stale_margin,
        ..LivenessConfig::default()
    }
    .classify(last_seen, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn ago(minutes: i64) -> Option<DateTime<Utc>> {
        Some(now() - ChronoDuration::minutes(minutes))
    }

    fn default_classify(minutes: i64) -> LivenessState {
        classify(ago(minutes), now(), ChronoDuration::minutes(15), ChronoDuration::minutes(5))
    }

    #[test]
    fn test_states_by_age() {
        assert_eq!(default_classify(18), LivenessState::Online);
        assert_eq!(default_classify(25), LivenessState::Stale);
        assert_eq!(default_classify(90), LivenessState::Offline);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        assert_eq!(default_classify(20), LivenessState::Online);
        assert_eq!(default_classify(21), LivenessState::Stale);
        assert_eq!(default_classify(40), LivenessState::Stale);
        assert_eq!(default_classify(41), LivenessState::Offline);
    }

    #[test]
    fn test_never_seen_is_offline() {
        let cfg = LivenessConfig::default();
        assert_eq!(cfg.classify(None, now()), LivenessState::Offline);
    }

    #[test]
    fn test_future_last_seen_is_online() {
        let cfg = LivenessConfig::default();
        assert_eq!(cfg.classify(ago(-3), now()), LivenessState::Online);
    }

    #[test]
    fn test_offline_multiple() {
        let cfg = LivenessConfig {
            offline_multiple: 3.0,
            ..LivenessConfig::default()
        };
        assert_eq!(cfg.offline_after(), ChronoDuration::minutes(60));
        assert_eq!(cfg.classify(ago(55), now()), LivenessState::Stale);
    }
}
