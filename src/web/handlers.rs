//! HTTP request handlers.

use super::AppState;
use crate::db::{parse_db_time, AgentProfile, AgentType, CheckRecord};
use crate::sla::{DashboardReport, DashboardRequest, EngineError, SegmentFilter, MAX_WINDOW_DAYS};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::OnceLock;

fn agent_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").unwrap())
}

pub fn is_valid_agent_id(id: &str) -> bool {
    agent_id_pattern().is_match(id)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn engine_error_response(e: EngineError) -> Response {
    let status = match e {
        EngineError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        EngineError::InvalidPeriod(_) => StatusCode::BAD_REQUEST,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Lenient payload fields
// ============================================================================

/// Agents send "N/A" or "" for measurements they could not take.
fn is_absent(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("n/a")
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if !is_absent(&s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(value.filter(|v| v.is_finite()))
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) if !is_absent(&s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) if !is_absent(&s) => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

// ============================================================================
// API: Agent submissions
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct PingSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_rtt_ms: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_packet_loss_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_jitter_ms: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DnsResolution {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub resolve_time_ms: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HttpCheck {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub response_code: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_time_s: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeedTest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub download_mbps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub upload_mbps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ping_ms: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub jitter_ms: Option<f64>,
}

/// Report posted by a monitoring agent once per interval.
#[derive(Debug, Default, Deserialize)]
pub struct MetricsPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_identifier: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_hostname: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub agent_source_ip: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub overall_connectivity: Option<String>,
    #[serde(default)]
    pub ping_summary: Option<PingSummary>,
    #[serde(default)]
    pub dns_resolution: Option<DnsResolution>,
    #[serde(default)]
    pub http_check: Option<HttpCheck>,
    #[serde(default)]
    pub speed_test: Option<SpeedTest>,
    #[serde(default)]
    pub detailed_health_summary: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub current_sla_met_status: Option<String>,
}

impl MetricsPayload {
    /// Validate the payload and split it into the profile to create (or
    /// refresh) and the check record to store.
    pub fn into_report(self, now: DateTime<Utc>) -> Result<(AgentProfile, CheckRecord), String> {
        let agent_id = self
            .agent_identifier
            .ok_or_else(|| "missing agent_identifier".to_string())?;
        if !is_valid_agent_id(&agent_id) {
            return Err(format!("invalid agent_identifier {agent_id:?}"));
        }
        let raw_ts = self.timestamp.ok_or_else(|| "missing timestamp".to_string())?;
        let timestamp = parse_db_time(&raw_ts)
            .ok_or_else(|| format!("unparseable timestamp {raw_ts:?}"))?;

        let agent_type = self
            .agent_type
            .and_then(|t| t.parse().ok())
            .unwrap_or(AgentType::Client);

        let mut profile = AgentProfile::new(&agent_id, agent_type);
        if let Some(host) = &self.agent_hostname {
            profile.name = host.clone();
        }
        profile.last_seen = Some(now);
        profile.last_reported_hostname = self.agent_hostname;
        profile.last_reported_source_ip = self
            .agent_source_ip
            .filter(|ip| ip.parse::<IpAddr>().is_ok());

        let ping = self.ping_summary.unwrap_or_default();
        let dns = self.dns_resolution.unwrap_or_default();
        let http = self.http_check.unwrap_or_default();
        let speed = self.speed_test.unwrap_or_default();

        let record = CheckRecord {
            agent_id,
            timestamp,
            overall_connectivity: self.overall_connectivity.or(ping.status),
            avg_rtt_ms: ping.average_rtt_ms,
            avg_loss_percent: ping.average_packet_loss_percent,
            avg_jitter_ms: ping.average_jitter_ms,
            dns_status: dns.status,
            dns_resolve_time_ms: dns.resolve_time_ms,
            http_status: http.status,
            http_response_code: http.response_code,
            http_total_time_s: http.total_time_s,
            speedtest_status: speed.status,
            speedtest_download_mbps: speed.download_mbps,
            speedtest_upload_mbps: speed.upload_mbps,
            speedtest_ping_ms: speed.ping_ms,
            speedtest_jitter_ms: speed.jitter_ms,
            detailed_health_summary: match self.detailed_health_summary {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => (!is_absent(&s)).then_some(s),
                Some(other) => Some(other.to_string()),
            },
            sla_met: self
                .current_sla_met_status
                .map(|s| s.eq_ignore_ascii_case("MET")),
        };

        Ok((profile, record))
    }
}

pub async fn handle_submit_metrics(
    State(state): State<AppState>,
    Json(payload): Json<MetricsPayload>,
) -> impl IntoResponse {
    let (profile, record) = match payload.into_report(Utc::now()) {
        Ok(r) => r,
        Err(msg) => {
            tracing::warn!("Rejected submission: {}", msg);
            return error_response(StatusCode::BAD_REQUEST, msg);
        }
    };

    let agent_id = profile.agent_id.clone();
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.ingest(&profile, &record)).await;

    match result {
        Ok(Ok(outcome)) => {
            if outcome.profile_created {
                tracing::info!("Created profile for new agent {}", agent_id);
            }
            if !outcome.record_inserted {
                tracing::debug!("Duplicate submission from {} ignored", agent_id);
            }
            Json(json!({
                "status": "success",
                "message": format!("Metrics received for agent {agent_id}"),
                "profile_created": outcome.profile_created,
                "record_inserted": outcome.record_inserted,
            }))
            .into_response()
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to store metrics from {}: {}", agent_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            tracing::error!("Ingest task for {} failed: {}", agent_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// API: Profiles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProfileQuery {
    pub agent_id: Option<String>,
}

pub async fn handle_profile_config(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
) -> impl IntoResponse {
    let Some(agent_id) = query.agent_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing agent_id parameter");
    };
    if !is_valid_agent_id(&agent_id) {
        return error_response(StatusCode::BAD_REQUEST, "invalid agent_id parameter");
    }

    match state.engine.profile(&agent_id).await {
        Ok(profile) => Json(profile).into_response(),
        Err(e) => engine_error_response(e),
    }
}

// ============================================================================
// API: Dashboard
// ============================================================================

pub async fn handle_get_agents(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.agents(Utc::now()).await {
        Ok(agents) => Json(agents).into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SlaStatsQuery {
    pub agent_id: Option<String>,
    pub days: Option<String>,
    pub segment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlaStatsResponse {
    #[serde(flatten)]
    pub report: DashboardReport,
    pub generated_at: DateTime<Utc>,
    pub dashboard_refresh_interval_ms: u64,
}

fn parse_stats_query(query: SlaStatsQuery, now: DateTime<Utc>) -> Result<DashboardRequest, String> {
    let agent_id = query.agent_id.filter(|id| !id.trim().is_empty());
    if let Some(id) = &agent_id {
        if !is_valid_agent_id(id) {
            return Err("invalid agent_id parameter".to_string());
        }
    }

    let days = match query.days.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => match d.parse::<i64>() {
            Ok(n) if (1..=MAX_WINDOW_DAYS).contains(&n) => Some(n),
            _ => {
                return Err(format!(
                    "invalid days parameter {d:?}, expected 1 to {MAX_WINDOW_DAYS}"
                ))
            }
        },
        None => None,
    };

    let segment = match query.segment.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse::<SegmentFilter>()?,
        None => SegmentFilter::All,
    };

    Ok(DashboardRequest {
        agent_id,
        days,
        segment,
        now,
    })
}

pub async fn handle_sla_stats(
    State(state): State<AppState>,
    Query(query): Query<SlaStatsQuery>,
) -> impl IntoResponse {
    let now = Utc::now();
    let request = match parse_stats_query(query, now) {
        Ok(r) => r,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    match state.engine.dashboard(request).await {
        Ok(report) => Json(SlaStatsResponse {
            report,
            generated_at: now,
            dashboard_refresh_interval_ms: state.config.dashboard_refresh_ms,
        })
        .into_response(),
        Err(e) => engine_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::db::Store;
    use crate::sla::SlaEngine;
    use crate::web::router;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn build_app(tmp: &NamedTempFile) -> Router {
        let config = ServerConfig::default();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let engine = SlaEngine::new(store.clone(), config.sla.clone());
        router(AppState { config, store, engine })
    }

    fn payload(agent: &str, ts: DateTime<Utc>) -> Value {
        json!({
            "agent_identifier": agent,
            "agent_type": "ISP",
            "agent_hostname": "edge-01",
            "agent_source_ip": "10.0.0.7",
            "timestamp": ts.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "ping_summary": {
                "status": "OK",
                "average_rtt_ms": 21.5,
                "average_packet_loss_percent": "0",
                "average_jitter_ms": "N/A"
            },
            "dns_resolution": { "status": "OK", "resolve_time_ms": 12 },
            "http_check": { "status": "OK", "response_code": 200, "total_time_s": 0.4 },
            "speed_test": { "status": "SKIPPED", "download_mbps": "N/A", "upload_mbps": "" },
            "current_sla_met_status": "MET"
        })
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_payload_absent_markers() {
        let ts = Utc::now();
        let p: MetricsPayload = serde_json::from_value(payload("isp-1", ts)).unwrap();
        let (profile, record) = p.into_report(ts).unwrap();

        assert_eq!(profile.agent_type, AgentType::Isp);
        assert_eq!(profile.name, "edge-01");
        assert_eq!(profile.last_reported_source_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(record.avg_rtt_ms, Some(21.5));
        assert_eq!(record.avg_loss_percent, Some(0.0));
        assert_eq!(record.avg_jitter_ms, None);
        assert_eq!(record.speedtest_download_mbps, None);
        assert_eq!(record.speedtest_upload_mbps, None);
        assert_eq!(record.dns_resolve_time_ms, Some(12.0));
        assert_eq!(record.http_response_code, Some(200));
        assert_eq!(record.overall_connectivity.as_deref(), Some("OK"));
        assert_eq!(record.sla_met, Some(true));
    }

    #[test]
    fn test_payload_validation() {
        let ts = Utc::now();
        let mut bad_id = payload("bad id!", ts);
        let p: MetricsPayload = serde_json::from_value(bad_id.take()).unwrap();
        assert!(p.into_report(ts).is_err());

        let mut no_ts = payload("isp-1", ts);
        no_ts["timestamp"] = json!("N/A");
        let p: MetricsPayload = serde_json::from_value(no_ts).unwrap();
        assert!(p.into_report(ts).is_err());

        let mut odd = payload("isp-1", ts);
        odd["agent_type"] = json!("router");
        odd["agent_source_ip"] = json!("not-an-ip");
        odd["current_sla_met_status"] = json!("NOT_MET");
        let p: MetricsPayload = serde_json::from_value(odd).unwrap();
        let (profile, record) = p.into_report(ts).unwrap();
        assert_eq!(profile.agent_type, AgentType::Client);
        assert_eq!(profile.last_reported_source_ip, None);
        assert_eq!(record.sla_met, Some(false));
    }

    #[test]
    fn test_stats_query_parsing() {
        let now = Utc::now();
        let q = |agent: Option<&str>, days: Option<&str>, segment: Option<&str>| SlaStatsQuery {
            agent_id: agent.map(String::from),
            days: days.map(String::from),
            segment: segment.map(String::from),
        };

        let r = parse_stats_query(q(Some(""), Some(""), None), now).unwrap();
        assert_eq!(r.agent_id, None);
        assert_eq!(r.days, None);
        assert_eq!(r.segment, SegmentFilter::All);

        let r = parse_stats_query(q(Some("isp-1"), Some("7"), Some("ISP")), now).unwrap();
        assert_eq!(r.agent_id.as_deref(), Some("isp-1"));
        assert_eq!(r.days, Some(7));
        assert_eq!(r.segment, SegmentFilter::Only(AgentType::Isp));

        assert!(parse_stats_query(q(None, Some("abc"), None), now).is_err());
        assert!(parse_stats_query(q(None, Some("-1"), None), now).is_err());
        assert!(parse_stats_query(q(None, Some("3651"), None), now).is_err());
        assert_eq!(parse_stats_query(q(None, Some("3650"), None), now).unwrap().days, Some(3650));
        assert!(parse_stats_query(q(None, None, Some("router")), now).is_err());
        assert!(parse_stats_query(q(Some("a b"), None, None), now).is_err());
    }

    #[tokio::test]
    async fn test_submit_then_query() {
        let tmp = NamedTempFile::new().unwrap();
        let app = build_app(&tmp);
        let ts = Utc::now() - ChronoDuration::minutes(30);

        let (status, body) = send(&app, post("/api/submit_metrics", &payload("isp-1", ts))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["profile_created"], true);
        assert_eq!(body["record_inserted"], true);

        let (status, body) = send(&app, post("/api/submit_metrics", &payload("isp-1", ts))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile_created"], false);
        assert_eq!(body["record_inserted"], false);

        let (status, body) = send(&app, get("/api/sla_stats?agent_id=isp-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dashboard_refresh_interval_ms"], 60_000);
        assert_eq!(body["selected"]["name"], "edge-01");
        assert_eq!(body["selected"]["liveness"], "online");
        assert_eq!(body["selected"]["windows"][0]["key"], "last_1_day");
        assert_eq!(body["selected"]["windows"][0]["total_intervals"], 1);
        assert_eq!(body["selected"]["windows"][0]["achieved_percentage"], 100.0);
        assert_eq!(body["selected"]["latency_chart"].as_array().unwrap().len(), 1);
        assert!(body["fleet"].is_null());

        let (status, body) = send(&app, get("/api/sla_stats?days=7")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["selected"].is_null());
        assert_eq!(body["fleet"]["segments"][0]["segment"], "ISP");
        assert_eq!(body["fleet"]["segments"][0]["window"]["total_intervals"], 1);

        let (status, body) = send(&app, get("/api/agents")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["agent_id"], "isp-1");
        assert_eq!(body[0]["agent_type"], "ISP");
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_agent() {
        let tmp = NamedTempFile::new().unwrap();
        let app = build_app(&tmp);

        let req = post("/api/submit_metrics", &payload("bad id!", Utc::now()));
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("agent_identifier"));
    }

    #[tokio::test]
    async fn test_profile_config() {
        let tmp = NamedTempFile::new().unwrap();
        let app = build_app(&tmp);

        let (status, _) = send(&app, get("/api/profile_config")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, get("/api/profile_config?agent_id=ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("ghost"));

        send(&app, post("/api/submit_metrics", &payload("isp-1", Utc::now()))).await;
        let (status, body) = send(&app, get("/api/profile_config?agent_id=isp-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thresholds"]["rtt_ms"]["poor"], 250.0);
        assert_eq!(body["sla_target_percentage"], 99.5);
    }

    #[tokio::test]
    async fn test_sla_stats_bad_input_and_unknown_agent() {
        let tmp = NamedTempFile::new().unwrap();
        let app = build_app(&tmp);

        let (status, _) = send(&app, get("/api/sla_stats?days=abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for uri in [
            "/api/sla_stats?days=100000000",
            "/api/sla_stats?agent_id=isp-1&days=100000000",
        ] {
            let (status, body) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].as_str().unwrap().contains("days"));
        }

        let (status, body) = send(&app, get("/api/sla_stats?agent_id=ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
