//! Per-request dashboard assembly.
//!
//! Every store call runs on the blocking pool and is bounded by the
//! request's deadline. Nothing is cached between requests.

use super::{
    accumulate_fast, cross_check, effective_target, latency_series, resolve, throughput_series,
    ChartMode, ClassifiedRecord, FleetComposer, FleetSummary, Granularity, LatencyPoint,
    LivenessState, SegmentFilter, ThroughputPoint, Window, WindowResult, MAX_WINDOW_DAYS,
};
use crate::config::SlaConfig;
use crate::db::{AgentProfile, AgentType, CheckRecord, CheckSource, DbError, Thresholds};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("check store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("agent profile not found: {0}")]
    ProfileNotFound(String),
    #[error("store query exceeded the request deadline")]
    DeadlineExceeded,
    #[error("invalid lookback period: {0} days")]
    InvalidPeriod(i64),
}

#[derive(Debug, Clone)]
pub struct DashboardRequest {
    /// `None` selects fleet mode.
    pub agent_id: Option<String>,
    /// Chart lookback; `None` charts the most recent records.
    pub days: Option<i64>,
    pub segment: SegmentFilter,
    pub now: DateTime<Utc>,
}

/// Active agent as listed in the dashboard sidebar.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEntry {
    pub agent_id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub liveness: LivenessState,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub sla_target_percentage: f64,
    pub liveness: LivenessState,
    pub last_seen: Option<DateTime<Utc>>,
    pub latest_check: Option<CheckRecord>,
    pub windows: Vec<WindowResult>,
    pub latency_chart: Vec<LatencyPoint>,
    pub throughput_chart: Vec<ThroughputPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    pub agents: Vec<AgentEntry>,
    pub selected: Option<AgentReport>,
    pub fleet: Option<FleetSummary>,
}

/// Read-only SLA engine over a check store.
#[derive(Clone)]
pub struct SlaEngine {
    source: Arc<dyn CheckSource>,
    config: Arc<SlaConfig>,
}

impl SlaEngine {
    pub fn new(source: Arc<dyn CheckSource>, config: SlaConfig) -> Self {
        Self {
            source,
            config: Arc::new(config),
        }
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.query_timeout
    }

    /// Run one store call on the blocking pool, giving up at `deadline`.
    async fn read<T, F>(&self, deadline: Instant, op: &'static str, f: F) -> Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CheckSource) -> Result<T, DbError> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        let task = tokio::task::spawn_blocking(move || f(source.as_ref()));

        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(DbError::NotFound))) => Err(EngineError::ProfileNotFound(op.to_string())),
            Ok(Ok(Err(e))) => {
                tracing::error!("SlaEngine: {} failed: {}", op, e);
                Err(EngineError::StoreUnavailable(e.to_string()))
            }
            Ok(Err(e)) => {
                tracing::error!("SlaEngine: {} task failed: {}", op, e);
                Err(EngineError::StoreUnavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("SlaEngine: {} exceeded deadline", op);
                Err(EngineError::DeadlineExceeded)
            }
        }
    }

    /// Active profiles with their liveness.
    pub async fn agents(&self, now: DateTime<Utc>) -> Result<Vec<AgentEntry>, EngineError> {
        let deadline = self.deadline();
        self.agent_entries(deadline, now).await
    }

    async fn agent_entries(
        &self,
        deadline: Instant,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentEntry>, EngineError> {
        let profiles = self
            .read(deadline, "list_active_profiles", |s| s.list_active_profiles())
            .await?;
        let latest = self
            .read(deadline, "get_latest_record_per_agent", |s| s.get_latest_record_per_agent(true))
            .await?;

        Ok(profiles
            .into_iter()
            .map(|p| {
                let last_seen = last_seen(&p, latest.get(&p.agent_id));
                AgentEntry {
                    liveness: self.config.liveness.classify(last_seen, now),
                    last_seen,
                    agent_id: p.agent_id,
                    name: p.name,
                    agent_type: p.agent_type,
                }
            })
            .collect())
    }

    pub async fn profile(&self, agent_id: &str) -> Result<AgentProfile, EngineError> {
        self.fetch_profile(self.deadline(), agent_id).await
    }

    async fn fetch_profile(
        &self,
        deadline: Instant,
        agent_id: &str,
    ) -> Result<AgentProfile, EngineError> {
        let id = agent_id.to_string();
        self.read(deadline, "get_profile", move |s| s.get_profile(&id))
            .await
            .map_err(|e| match e {
                EngineError::ProfileNotFound(_) => {
                    EngineError::ProfileNotFound(agent_id.to_string())
                }
                other => other,
            })
    }

    pub async fn dashboard(&self, req: DashboardRequest) -> Result<DashboardReport, EngineError> {
        if let Some(days) = req.days {
            if days <= 0 || days > MAX_WINDOW_DAYS {
                return Err(EngineError::InvalidPeriod(days));
            }
        }

        let deadline = self.deadline();
        let agents = self.agent_entries(deadline, req.now).await?;

        match req.agent_id.as_deref() {
            Some(agent_id) => {
                let selected = self.agent_report(deadline, agent_id, req.days, req.now).await?;
                Ok(DashboardReport {
                    agents,
                    selected: Some(selected),
                    fleet: None,
                })
            }
            None => {
                let fleet = self.fleet_summary(deadline, req.days, req.segment, req.now).await?;
                Ok(DashboardReport {
                    agents,
                    selected: None,
                    fleet: Some(fleet),
                })
            }
        }
    }

    async fn agent_report(
        &self,
        deadline: Instant,
        agent_id: &str,
        days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<AgentReport, EngineError> {
        let cfg = &self.config;
        let profile = self.fetch_profile(deadline, agent_id).await?;

        let chart_span = days.map(ChronoDuration::days);
        let lookback = cfg
            .windows
            .iter()
            .map(Window::lookback)
            .chain(chart_span)
            .max()
            .unwrap_or_else(|| ChronoDuration::days(cfg.summary_period_days));
        let since = now - lookback;

        let id = agent_id.to_string();
        let records = self
            .read(deadline, "get_records_since", move |s| s.get_records_since(&id, since))
            .await?;
        let id = agent_id.to_string();
        let latest_check = self
            .read(deadline, "get_latest_record", move |s| s.get_latest_record(&id))
            .await?;

        let classified: Vec<ClassifiedRecord> = records
            .iter()
            .map(|r| self.classify(profile.agent_type, r.clone(), &profile.thresholds))
            .collect();
        let intervals: Vec<_> = classified.iter().map(ClassifiedRecord::interval).collect();
        let target = effective_target(profile.sla_target_percentage, cfg.default_target_percentage);
        let windows = accumulate_fast(&intervals, &cfg.windows, now, target);

        let (mode, max_points, chart_records) = match chart_span {
            Some(span) => {
                let cutoff = now - span;
                let in_span: Vec<CheckRecord> = records
                    .iter()
                    .filter(|r| r.timestamp >= cutoff)
                    .cloned()
                    .collect();
                let granularity = Granularity::for_period_days(span.num_days());
                (ChartMode::Bucketed(granularity), cfg.trend_chart_points, in_span)
            }
            None => (ChartMode::Recent, cfg.recent_chart_points, records),
        };

        let last_seen = last_seen(&profile, latest_check.as_ref());
        Ok(AgentReport {
            liveness: cfg.liveness.classify(last_seen, now),
            last_seen,
            latest_check,
            windows,
            latency_chart: latency_series(&chart_records, mode, max_points),
            throughput_chart: throughput_series(&chart_records, mode, max_points),
            sla_target_percentage: target,
            agent_id: profile.agent_id,
            name: profile.name,
            agent_type: profile.agent_type,
        })
    }

    async fn fleet_summary(
        &self,
        deadline: Instant,
        days: Option<i64>,
        segment: SegmentFilter,
        now: DateTime<Utc>,
    ) -> Result<FleetSummary, EngineError> {
        let cfg = &self.config;
        let period = days.unwrap_or(cfg.summary_period_days);
        let window = Window::days(period).map_err(|_| EngineError::InvalidPeriod(period))?;
        let since = now - window.lookback();

        let profiles = self
            .read(deadline, "list_active_profiles", |s| s.list_active_profiles())
            .await?;
        let latest = self
            .read(deadline, "get_latest_record_per_agent", |s| s.get_latest_record_per_agent(true))
            .await?;
        let rows = self
            .read(deadline, "get_records_since_all_agents", move |s| {
                s.get_records_since_all_agents(since, segment.agent_type())
            })
            .await?;

        let by_id: HashMap<&str, &AgentProfile> =
            profiles.iter().map(|p| (p.agent_id.as_str(), p)).collect();
        let default_thresholds = Thresholds::default();
        let classified: Vec<ClassifiedRecord> = rows
            .into_iter()
            .map(|row| {
                // Inactive or removed agents are dropped by the composer.
                let thresholds = by_id
                    .get(row.record.agent_id.as_str())
                    .map(|p| &p.thresholds)
                    .unwrap_or(&default_thresholds);
                self.classify(row.agent_type, row.record, thresholds)
            })
            .collect();

        let composer = FleetComposer {
            summary_window: window,
            liveness: cfg.liveness,
            default_target: cfg.default_target_percentage,
            trend_points: cfg.trend_chart_points,
        };
        let per_agent = composer.agent_results(&profiles, &classified, now);
        Ok(composer.summarize(&profiles, &latest, &per_agent, &classified, segment, now))
    }

    /// Resolve the status a record counts as, logging a stored flag the
    /// evaluator disagrees with.
    fn classify(
        &self,
        agent_type: AgentType,
        record: CheckRecord,
        thresholds: &Thresholds,
    ) -> ClassifiedRecord {
        let cfg = &self.config;
        if let Some(d) = cross_check(&record, thresholds, &cfg.policy) {
            tracing::debug!(
                "SlaEngine: {} at {} stored met={} but thresholds give {}",
                record.agent_id,
                record.timestamp,
                d.stored,
                d.recomputed
            );
        }
        ClassifiedRecord {
            agent_type,
            status: resolve(&record, thresholds, &cfg.policy, cfg.met_source),
            record,
        }
    }
}

fn last_seen(profile: &AgentProfile, latest: Option<&CheckRecord>) -> Option<DateTime<Utc>> {
    match (profile.last_seen, latest.map(|r| r.timestamp)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
