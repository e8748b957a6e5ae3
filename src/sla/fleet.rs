//! Cross-agent summary for the fleet dashboard.

use super::{
    accumulate, achieved_percentage, effective_target, truncate_to_bucket, ClassifiedRecord,
    Granularity, Interval, LivenessConfig, LivenessState, Mean, Tally, Window, WindowResult,
};
use crate::db::{AgentProfile, AgentType, CheckRecord};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

/// Which agents a summary covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentFilter {
    #[default]
    All,
    Only(AgentType),
}

impl SegmentFilter {
    pub fn matches(&self, agent_type: AgentType) -> bool {
        match self {
            Self::All => true,
            Self::Only(t) => *t == agent_type,
        }
    }

    pub fn agent_type(&self) -> Option<AgentType> {
        match self {
            Self::All => None,
            Self::Only(t) => Some(*t),
        }
    }
}

impl FromStr for SegmentFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::Only)
    }
}

/// Latest state of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub liveness: LivenessState,
    pub last_seen: Option<DateTime<Utc>>,
    pub latest_check: Option<CheckRecord>,
    pub sla: Option<WindowResult>,
}

/// Compliance of a whole segment over the summary window.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSla {
    pub segment: String,
    pub agent_count: usize,
    pub window: WindowResult,
}

/// One calendar day of the fleet trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTrendPoint {
    pub timestamp: DateTime<Utc>,
    pub total_intervals: u64,
    pub met_intervals: u64,
    pub achieved_percentage: f64,
    /// Compliance of everything from the first day up to this one.
    pub cumulative_percentage: f64,
    pub avg_rtt_ms: Option<f64>,
    pub avg_loss_percent: Option<f64>,
    pub avg_jitter_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub window_label: String,
    pub agents: Vec<AgentStatus>,
    pub segments: Vec<SegmentSla>,
    pub trend: Vec<DailyTrendPoint>,
}

#[derive(Debug, Clone)]
pub struct FleetComposer {
    pub summary_window: Window,
    pub liveness: LivenessConfig,
    pub default_target: f64,
    pub trend_points: usize,
}

impl FleetComposer {
    /// Per-agent compliance over the summary window.
    pub fn agent_results(
        &self,
        profiles: &[AgentProfile],
        records: &[ClassifiedRecord],
        now: DateTime<Utc>,
    ) -> HashMap<String, WindowResult> {
        let mut by_agent: HashMap<&str, Vec<Interval<'_>>> = HashMap::new();
        for r in records {
            by_agent.entry(r.record.agent_id.as_str()).or_default().push(r.interval());
        }

        profiles
            .iter()
            .map(|p| {
                let intervals = by_agent.get(p.agent_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                let target = effective_target(p.sla_target_percentage, self.default_target);
                (p.agent_id.clone(), self.window_result(intervals, now, target))
            })
            .collect()
    }

    /// Compose the fleet view.
    ///
    /// Segment percentages are computed over the union of the segment's
    /// intervals, never by averaging agent percentages.
    pub fn summarize(
        &self,
        profiles: &[AgentProfile],
        latest: &HashMap<String, CheckRecord>,
        window_results: &HashMap<String, WindowResult>,
        records: &[ClassifiedRecord],
        filter: SegmentFilter,
        now: DateTime<Utc>,
    ) -> FleetSummary {
        let selected: Vec<&AgentProfile> = profiles
            .iter()
            .filter(|p| filter.matches(p.agent_type))
            .collect();
        let members: HashSet<&str> = selected.iter().map(|p| p.agent_id.as_str()).collect();
        let in_scope: Vec<&ClassifiedRecord> = records
            .iter()
            .filter(|r| {
                filter.matches(r.agent_type) && members.contains(r.record.agent_id.as_str())
            })
            .collect();

        let agents = selected
            .iter()
            .map(|p| {
                let latest_check = latest.get(&p.agent_id).cloned();
                let last_seen = match (p.last_seen, latest_check.as_ref().map(|r| r.timestamp)) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                AgentStatus {
                    agent_id: p.agent_id.clone(),
                    name: p.name.clone(),
                    agent_type: p.agent_type,
                    liveness: self.liveness.classify(last_seen, now),
                    last_seen,
                    latest_check,
                    sla: window_results.get(&p.agent_id).cloned(),
                }
            })
            .collect();

        let mut segments = Vec::new();
        for agent_type in [AgentType::Isp, AgentType::Client] {
            if !filter.matches(agent_type) {
                continue;
            }
            let agent_count = selected.iter().filter(|p| p.agent_type == agent_type).count();
            if agent_count == 0 {
                continue;
            }
            let intervals: Vec<Interval<'_>> = in_scope
                .iter()
                .filter(|r| r.agent_type == agent_type)
                .map(|r| r.interval())
                .collect();
            segments.push(self.segment(agent_type.as_str(), agent_count, &intervals, now));
        }
        if filter == SegmentFilter::All && !selected.is_empty() {
            let intervals: Vec<Interval<'_>> = in_scope.iter().map(|r| r.interval()).collect();
            segments.push(self.segment("All", selected.len(), &intervals, now));
        }

        FleetSummary {
            window_label: self.summary_window.label.clone(),
            agents,
            segments,
            trend: self.daily_trend(&in_scope, now),
        }
    }

    fn segment(
        &self,
        name: &str,
        agent_count: usize,
        intervals: &[Interval<'_>],
        now: DateTime<Utc>,
    ) -> SegmentSla {
        SegmentSla {
            segment: name.to_string(),
            agent_count,
            window: self.window_result(intervals, now, self.default_target),
        }
    }

    fn window_result(
        &self,
        intervals: &[Interval<'_>],
        now: DateTime<Utc>,
        target: f64,
    ) -> WindowResult {
        accumulate(intervals, std::slice::from_ref(&self.summary_window), now, target)
            .into_iter()
            .next()
            .unwrap_or_else(|| Tally::default().into_result(&self.summary_window, target))
    }

    /// One point per calendar day inside the summary window, ascending.
    fn daily_trend(
        &self,
        records: &[&ClassifiedRecord],
        now: DateTime<Utc>,
    ) -> Vec<DailyTrendPoint> {
        let mut seen: HashSet<(&str, DateTime<Utc>)> = HashSet::new();
        let mut days: BTreeMap<DateTime<Utc>, (Tally, [Mean; 3])> = BTreeMap::new();

        for r in records {
            let rec = &r.record;
            if !self.summary_window.contains(rec.timestamp, now) {
                continue;
            }
            if !seen.insert((rec.agent_id.as_str(), rec.timestamp)) {
                continue;
            }
            let (tally, means) = days
                .entry(truncate_to_bucket(rec.timestamp, Granularity::Day))
                .or_default();
            tally.add(r.status);
            means[0].push(rec.avg_rtt_ms);
            means[1].push(rec.avg_loss_percent);
            means[2].push(rec.avg_jitter_ms);
        }

        let mut cumulative = Tally::default();
        let trend: Vec<DailyTrendPoint> = days
            .into_iter()
            .filter(|(_, (tally, means))| {
                tally.total > 0 || means.iter().any(|m| m.value().is_some())
            })
            .map(|(timestamp, (tally, means))| {
                cumulative.total += tally.total;
                cumulative.met += tally.met;
                DailyTrendPoint {
                    timestamp,
                    total_intervals: tally.total,
                    met_intervals: tally.met,
                    achieved_percentage: achieved_percentage(tally.met, tally.total),
                    cumulative_percentage: cumulative.percentage(),
                    avg_rtt_ms: means[0].value(),
                    avg_loss_percent: means[1].value(),
                    avg_jitter_ms: means[2].value(),
                }
            })
            .collect();

        let skip = trend.len().saturating_sub(self.trend_points);
        trend.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::IntervalStatus;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn composer() -> FleetComposer {
        FleetComposer {
            summary_window: Window::days(30).unwrap(),
            liveness: LivenessConfig::default(),
            default_target: 99.5,
            trend_points: 96,
        }
    }

    fn profile(id: &str, agent_type: AgentType) -> AgentProfile {
        AgentProfile::new(id, agent_type)
    }

    fn classified(
        id: &str,
        agent_type: AgentType,
        hours_ago: i64,
        status: IntervalStatus,
    ) -> ClassifiedRecord {
        let mut record = CheckRecord::new(id, now() - ChronoDuration::hours(hours_ago));
        record.avg_rtt_ms = Some(40.0);
        ClassifiedRecord {
            agent_type,
            record,
            status,
        }
    }

    /// isp-a: 10 intervals all met. isp-b: 10 intervals none met.
    fn two_isps() -> (Vec<AgentProfile>, Vec<ClassifiedRecord>) {
        let profiles = vec![profile("isp-a", AgentType::Isp), profile("isp-b", AgentType::Isp)];
        let mut records = Vec::new();
        for h in 0..10 {
            records.push(classified("isp-a", AgentType::Isp, h, IntervalStatus::Met));
            records.push(classified("isp-b", AgentType::Isp, h, IntervalStatus::NotMet));
        }
        (profiles, records)
    }

    #[test]
    fn test_segment_percentage_uses_union() {
        let (profiles, records) = two_isps();
        let c = composer();
        let per_agent = c.agent_results(&profiles, &records, now());
        let summary = c.summarize(
            &profiles,
            &HashMap::new(),
            &per_agent,
            &records,
            SegmentFilter::All,
            now(),
        );

        let isp = summary.segments.iter().find(|s| s.segment == "ISP").unwrap();
        assert_eq!(isp.agent_count, 2);
        assert_eq!(isp.window.total_intervals, 20);
        assert_eq!(isp.window.met_intervals, 10);
        assert_eq!(isp.window.achieved_percentage, 50.0);
        assert!(!isp.window.is_target_met);
        assert!(summary.segments.iter().all(|s| s.segment != "Client"));
    }

    #[test]
    fn test_union_differs_from_naive_average() {
        let profiles = vec![profile("big", AgentType::Client), profile("small", AgentType::Client)];
        let mut records = Vec::new();
        for h in 0..9 {
            records.push(classified("big", AgentType::Client, h, IntervalStatus::Met));
        }
        records.push(classified("small", AgentType::Client, 1, IntervalStatus::NotMet));

        let c = composer();
        let summary = c.summarize(
            &profiles,
            &HashMap::new(),
            &HashMap::new(),
            &records,
            SegmentFilter::All,
            now(),
        );
        let client = summary.segments.iter().find(|s| s.segment == "Client").unwrap();
        // 9 of 10 intervals, not the 50% an average of 100% and 0% would give.
        assert_eq!(client.window.achieved_percentage, 90.0);
    }

    #[test]
    fn test_segment_filter_restricts_agents_and_segments() {
        let (mut profiles, mut records) = two_isps();
        profiles.push(profile("site-1", AgentType::Client));
        records.push(classified("site-1", AgentType::Client, 2, IntervalStatus::Met));

        let c = composer();
        let summary = c.summarize(
            &profiles,
            &HashMap::new(),
            &HashMap::new(),
            &records,
            SegmentFilter::Only(AgentType::Client),
            now(),
        );
        assert_eq!(summary.agents.len(), 1);
        assert_eq!(summary.segments.len(), 1);
        assert_eq!(summary.segments[0].window.total_intervals, 1);
        assert_eq!(summary.trend.iter().map(|p| p.total_intervals).sum::<u64>(), 1);
    }

    #[test]
    fn test_liveness_uses_latest_check() {
        let profiles = vec![profile("isp-a", AgentType::Isp), profile("ghost", AgentType::Isp)];
        let mut latest = HashMap::new();
        let seen = now() - ChronoDuration::minutes(10);
        latest.insert("isp-a".to_string(), CheckRecord::new("isp-a", seen));

        let summary = composer().summarize(
            &profiles,
            &latest,
            &HashMap::new(),
            &[],
            SegmentFilter::All,
            now(),
        );
        let by_id: HashMap<_, _> = summary
            .agents
            .iter()
            .map(|a| (a.agent_id.as_str(), a))
            .collect();
        assert_eq!(by_id["isp-a"].liveness, LivenessState::Online);
        assert!(by_id["isp-a"].latest_check.is_some());
        assert_eq!(by_id["ghost"].liveness, LivenessState::Offline);
        assert_eq!(by_id["ghost"].last_seen, None);
    }

    #[test]
    fn test_daily_trend_is_ascending_and_cumulative() {
        let profiles = vec![profile("isp-a", AgentType::Isp)];
        let records = vec![
            classified("isp-a", AgentType::Isp, 0, IntervalStatus::Met),
            classified("isp-a", AgentType::Isp, 48, IntervalStatus::NotMet),
            classified("isp-a", AgentType::Isp, 49, IntervalStatus::Met),
            classified("isp-a", AgentType::Isp, 24, IntervalStatus::Unknown),
        ];
        let summary = composer().summarize(
            &profiles,
            &HashMap::new(),
            &HashMap::new(),
            &records,
            SegmentFilter::All,
            now(),
        );
        let trend = &summary.trend;

        assert_eq!(trend.len(), 3);
        assert!(trend.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(trend[0].achieved_percentage, 50.0);
        // The Unknown-only day still charts latency but counts nothing.
        assert_eq!(trend[1].total_intervals, 0);
        assert_eq!(trend[1].avg_rtt_ms, Some(40.0));
        assert_eq!(trend[2].cumulative_percentage, 66.67);
    }

    #[test]
    fn test_agent_results_fall_back_to_default_target() {
        let mut p = profile("isp-a", AgentType::Isp);
        p.sla_target_percentage = 0.0;
        let records = vec![classified("isp-a", AgentType::Isp, 1, IntervalStatus::Met)];
        let results = composer().agent_results(&[p], &records, now());
        assert!(results["isp-a"].is_target_met);
        assert_eq!(results["isp-a"].total_intervals, 1);
    }

    #[test]
    fn test_segment_filter_parse() {
        assert_eq!("all".parse::<SegmentFilter>().unwrap(), SegmentFilter::All);
        assert_eq!("isp".parse::<SegmentFilter>().unwrap(), SegmentFilter::Only(AgentType::Isp));
        assert!("router".parse::<SegmentFilter>().is_err());
    }
}
