//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Timestamp layout shared by the read and write paths. Lexical order of
/// formatted values equals chronological order.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CHECK_COLUMNS: &str = "c.agent_id, c.timestamp, c.overall_connectivity, c.avg_rtt_ms, \
     c.avg_loss_percent, c.avg_jitter_ms, c.dns_status, c.dns_resolve_time_ms, c.http_status, \
     c.http_response_code, c.http_total_time_s, c.speedtest_status, c.speedtest_download_mbps, \
     c.speedtest_upload_mbps, c.speedtest_ping_ms, c.speedtest_jitter_ms, \
     c.detailed_health_summary, c.sla_met_interval";

const PROFILE_COLUMNS: &str = "agent_id, agent_name, agent_type, is_active, sla_target_percentage, \
     rtt_degraded, rtt_poor, loss_degraded, loss_poor, jitter_degraded, jitter_poor, \
     dns_time_degraded, dns_time_poor, http_time_degraded, http_time_poor, \
     speedtest_dl_degraded, speedtest_dl_poor, speedtest_ul_degraded, speedtest_ul_poor, \
     last_seen, last_reported_hostname, last_reported_source_ip";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("connection lock poisoned")]
    Poisoned,
    #[error("invalid profile {agent_id}: {reason}")]
    InvalidProfile { agent_id: String, reason: String },
    #[error("malformed record for agent {agent_id}: unparseable timestamp {timestamp:?}")]
    MalformedRecord { agent_id: String, timestamp: String },
}

/// Read operations the SLA engine needs from a check store.
///
/// Every record list is ordered by timestamp ascending and every timestamp
/// is UTC.
pub trait CheckSource: Send + Sync {
    fn list_active_profiles(&self) -> Result<Vec<AgentProfile>, DbError>;

    /// Returns `DbError::NotFound` for an unknown agent.
    fn get_profile(&self, agent_id: &str) -> Result<AgentProfile, DbError>;

    fn get_latest_record(&self, agent_id: &str) -> Result<Option<CheckRecord>, DbError>;

    fn get_latest_record_per_agent(
        &self,
        active_only: bool,
    ) -> Result<HashMap<String, CheckRecord>, DbError>;

    fn get_records_since(
        &self,
        agent_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>, DbError>;

    fn get_records_since_all_agents(
        &self,
        since: DateTime<Utc>,
        segment: Option<AgentType>,
    ) -> Result<Vec<SegmentRecord>, DbError>;
}

/// Outcome of storing one agent report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub profile_created: bool,
    pub record_inserted: bool,
}

/// Thread-safe database store.
///
/// Writes go through a single shared connection. Reads open their own
/// read-only connection so dashboard requests never queue behind each other.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Switch to WAL and apply pending migrations.
    fn init(&self) -> Result<(), DbError> {
        let mut conn = self.writer()?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        let report = embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn reader(&self) -> Result<Connection, DbError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    // --- Profiles ---

    /// Insert a profile or overwrite every field of an existing one.
    pub fn upsert_profile(&self, profile: &AgentProfile) -> Result<(), DbError> {
        let conn = self.writer()?;
        write_profile(&conn, profile)
    }

    /// Store one agent report.
    ///
    /// An unknown agent gets `profile` as its new profile. A known agent
    /// only has its last-seen time, hostname, source address and type
    /// refreshed. A record whose (agent, timestamp) already exists is
    /// ignored.
    pub fn ingest(
        &self,
        profile: &AgentProfile,
        record: &CheckRecord,
    ) -> Result<IngestOutcome, DbError> {
        let conn = self.writer()?;
        let tx = conn.unchecked_transaction()?;

        let existing = tx
            .query_row(
                "SELECT 1 FROM agent_profiles WHERE agent_id = ?1",
                params![profile.agent_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        if existing {
            tx.execute(
                "UPDATE agent_profiles SET last_seen=?1, last_reported_hostname=?2, \
                 last_reported_source_ip=?3, agent_type=?4 WHERE agent_id=?5",
                params![
                    profile.last_seen.map(format_db_time),
                    profile.last_reported_hostname,
                    profile.last_reported_source_ip,
                    profile.agent_type.as_str(),
                    profile.agent_id,
                ],
            )?;
        } else {
            write_profile(&tx, profile)?;
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO check_records (agent_id, timestamp, overall_connectivity, \
             avg_rtt_ms, avg_loss_percent, avg_jitter_ms, dns_status, dns_resolve_time_ms, \
             http_status, http_response_code, http_total_time_s, speedtest_status, \
             speedtest_download_mbps, speedtest_upload_mbps, speedtest_ping_ms, speedtest_jitter_ms, \
             detailed_health_summary, sla_met_interval) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                record.agent_id,
                format_db_time(record.timestamp),
                record.overall_connectivity,
                record.avg_rtt_ms,
                record.avg_loss_percent,
                record.avg_jitter_ms,
                record.dns_status,
                record.dns_resolve_time_ms,
                record.http_status,
                record.http_response_code,
                record.http_total_time_s,
                record.speedtest_status,
                record.speedtest_download_mbps,
                record.speedtest_upload_mbps,
                record.speedtest_ping_ms,
                record.speedtest_jitter_ms,
                record.detailed_health_summary,
                record.sla_met,
            ],
        )?;
        tx.commit()?;

        Ok(IngestOutcome {
            profile_created: !existing,
            record_inserted: inserted > 0,
        })
    }

    /// Insert a check for an agent whose profile already exists.
    pub fn add_check(&self, record: &CheckRecord) -> Result<bool, DbError> {
        let profile = self.get_profile(&record.agent_id)?;
        Ok(self.ingest(&profile, record)?.record_inserted)
    }
}

impl CheckSource for Store {
    fn list_active_profiles(&self) -> Result<Vec<AgentProfile>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM agent_profiles WHERE is_active = 1 \
             ORDER BY agent_type, agent_name"
        ))?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }

    fn get_profile(&self, agent_id: &str) -> Result<AgentProfile, DbError> {
        let conn = self.reader()?;
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM agent_profiles WHERE agent_id = ?1"),
            params![agent_id],
            profile_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    fn get_latest_record(&self, agent_id: &str) -> Result<Option<CheckRecord>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_records c WHERE c.agent_id = ?1 \
             ORDER BY c.timestamp DESC LIMIT 1"
        ))?;
        let rows = stmt.query_map(params![agent_id], |row| record_from_row(row, 0))?;
        Ok(collect_records(rows)?.into_iter().next())
    }

    fn get_latest_record_per_agent(
        &self,
        active_only: bool,
    ) -> Result<HashMap<String, CheckRecord>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_records c \
             JOIN agent_profiles p ON p.agent_id = c.agent_id \
             WHERE (?1 = 0 OR p.is_active = 1) \
             AND c.timestamp = (SELECT MAX(timestamp) FROM check_records WHERE agent_id = c.agent_id)"
        ))?;
        let rows = stmt.query_map(params![active_only], |row| record_from_row(row, 0))?;
        Ok(collect_records(rows)?
            .into_iter()
            .map(|r| (r.agent_id.clone(), r))
            .collect())
    }

    fn get_records_since(
        &self,
        agent_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM check_records c \
             WHERE c.agent_id = ?1 AND c.timestamp >= ?2 ORDER BY c.timestamp ASC"
        ))?;
        let rows = stmt.query_map(params![agent_id, format_db_time(since)], |row| {
            record_from_row(row, 0)
        })?;
        collect_records(rows)
    }

    fn get_records_since_all_agents(
        &self,
        since: DateTime<Utc>,
        segment: Option<AgentType>,
    ) -> Result<Vec<SegmentRecord>, DbError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT p.agent_type, {CHECK_COLUMNS} FROM check_records c \
             JOIN agent_profiles p ON p.agent_id = c.agent_id \
             WHERE c.timestamp >= ?1 AND (?2 IS NULL OR p.agent_type = ?2) \
             ORDER BY c.timestamp ASC, c.agent_id ASC"
        ))?;
        let rows = stmt.query_map(
            params![format_db_time(since), segment.map(|s| s.as_str())],
            |row| {
                let agent_type: String = row.get(0)?;
                let agent_type = agent_type.parse().unwrap_or(AgentType::Client);
                Ok(record_from_row(row, 1)?.map(|record| SegmentRecord { agent_type, record }))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            match row? {
                Ok(r) => out.push(r),
                Err(e) => tracing::warn!("Skipping record: {}", e),
            }
        }
        Ok(out)
    }
}

fn write_profile(conn: &Connection, profile: &AgentProfile) -> Result<(), DbError> {
    let t = &profile.thresholds;
    t.validate().map_err(|reason| DbError::InvalidProfile {
        agent_id: profile.agent_id.clone(),
        reason,
    })?;
    conn.execute(
        &format!(
            "INSERT INTO agent_profiles ({PROFILE_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22) \
             ON CONFLICT(agent_id) DO UPDATE SET \
             agent_name=excluded.agent_name, agent_type=excluded.agent_type, is_active=excluded.is_active, \
             sla_target_percentage=excluded.sla_target_percentage, \
             rtt_degraded=excluded.rtt_degraded, rtt_poor=excluded.rtt_poor, \
             loss_degraded=excluded.loss_degraded, loss_poor=excluded.loss_poor, \
             jitter_degraded=excluded.jitter_degraded, jitter_poor=excluded.jitter_poor, \
             dns_time_degraded=excluded.dns_time_degraded, dns_time_poor=excluded.dns_time_poor, \
             http_time_degraded=excluded.http_time_degraded, http_time_poor=excluded.http_time_poor, \
             speedtest_dl_degraded=excluded.speedtest_dl_degraded, speedtest_dl_poor=excluded.speedtest_dl_poor, \
             speedtest_ul_degraded=excluded.speedtest_ul_degraded, speedtest_ul_poor=excluded.speedtest_ul_poor, \
             last_seen=excluded.last_seen, last_reported_hostname=excluded.last_reported_hostname, \
             last_reported_source_ip=excluded.last_reported_source_ip"
        ),
        params![
            profile.agent_id,
            profile.name,
            profile.agent_type.as_str(),
            profile.is_active,
            profile.sla_target_percentage,
            t.rtt_ms.degraded,
            t.rtt_ms.poor,
            t.loss_percent.degraded,
            t.loss_percent.poor,
            t.jitter_ms.degraded,
            t.jitter_ms.poor,
            t.dns_time_ms.degraded,
            t.dns_time_ms.poor,
            t.http_time_s.degraded,
            t.http_time_s.poor,
            t.download_mbps.degraded,
            t.download_mbps.poor,
            t.upload_mbps.degraded,
            t.upload_mbps.poor,
            profile.last_seen.map(format_db_time),
            profile.last_reported_hostname,
            profile.last_reported_source_ip,
        ],
    )?;
    Ok(())
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<AgentProfile> {
    let agent_id: String = row.get(0)?;
    let agent_type: String = row.get(2)?;
    let last_seen: Option<String> = row.get(19)?;

    let last_seen = last_seen.and_then(|s| {
        let parsed = parse_db_time(&s);
        if parsed.is_none() {
            tracing::warn!("Agent {} has unparseable last_seen {:?}", agent_id, s);
        }
        parsed
    });

    Ok(AgentProfile {
        name: row.get(1)?,
        agent_type: agent_type.parse().unwrap_or(AgentType::Client),
        is_active: row.get(3)?,
        sla_target_percentage: row.get(4)?,
        thresholds: Thresholds {
            rtt_ms: ThresholdPair::new(row.get(5)?, row.get(6)?),
            loss_percent: ThresholdPair::new(row.get(7)?, row.get(8)?),
            jitter_ms: ThresholdPair::new(row.get(9)?, row.get(10)?),
            dns_time_ms: ThresholdPair::new(row.get(11)?, row.get(12)?),
            http_time_s: ThresholdPair::new(row.get(13)?, row.get(14)?),
            download_mbps: ThresholdPair::new(row.get(15)?, row.get(16)?),
            upload_mbps: ThresholdPair::new(row.get(17)?, row.get(18)?),
        },
        last_seen,
        last_reported_hostname: row.get(20)?,
        last_reported_source_ip: row.get(21)?,
        agent_id,
    })
}

/// Map a check row starting at column `at`. A row with an unparseable
/// timestamp maps to `DbError::MalformedRecord` instead of failing the query.
fn record_from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<Result<CheckRecord, DbError>> {
    let agent_id: String = row.get(at)?;
    let time_str: String = row.get(at + 1)?;
    let Some(timestamp) = parse_db_time(&time_str) else {
        return Ok(Err(DbError::MalformedRecord {
            agent_id,
            timestamp: time_str,
        }));
    };
    let met: Option<i64> = row.get(at + 17)?;

    Ok(Ok(CheckRecord {
        agent_id,
        timestamp,
        overall_connectivity: row.get(at + 2)?,
        avg_rtt_ms: row.get(at + 3)?,
        avg_loss_percent: row.get(at + 4)?,
        avg_jitter_ms: row.get(at + 5)?,
        dns_status: row.get(at + 6)?,
        dns_resolve_time_ms: row.get(at + 7)?,
        http_status: row.get(at + 8)?,
        http_response_code: row.get(at + 9)?,
        http_total_time_s: row.get(at + 10)?,
        speedtest_status: row.get(at + 11)?,
        speedtest_download_mbps: row.get(at + 12)?,
        speedtest_upload_mbps: row.get(at + 13)?,
        speedtest_ping_ms: row.get(at + 14)?,
        speedtest_jitter_ms: row.get(at + 15)?,
        detailed_health_summary: row.get(at + 16)?,
        sla_met: met.map(|m| m != 0),
    }))
}

/// Collect mapped rows, logging and skipping malformed ones.
fn collect_records<I>(rows: I) -> Result<Vec<CheckRecord>, DbError>
where
    I: Iterator<Item = rusqlite::Result<Result<CheckRecord, DbError>>>,
{
    let mut out = Vec::new();
    for row in rows {
        match row? {
            Ok(r) => out.push(r),
            Err(e) => tracing::warn!("Skipping record: {}", e),
        }
    }
    Ok(out)
}

/// Format a timestamp for storage.
pub fn format_db_time(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database or an agent payload.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    // Try ISO 8601 with an explicit offset
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 9, h, m, 0).unwrap()
    }

    fn seeded_store(tmp: &NamedTempFile) -> Store {
        let store = Store::new(tmp.path()).unwrap();
        store.upsert_profile(&AgentProfile::new("isp-1", AgentType::Isp)).unwrap();
        store.upsert_profile(&AgentProfile::new("client-1", AgentType::Client)).unwrap();

        for (agent, h) in [("isp-1", 1), ("isp-1", 2), ("client-1", 1), ("client-1", 3)] {
            let mut r = CheckRecord::new(agent, at(h, 0));
            r.avg_rtt_ms = Some(h as f64 * 10.0);
            r.sla_met = Some(true);
            store.add_check(&r).unwrap();
        }
        store
    }

    #[test]
    fn test_profile_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut profile = AgentProfile::new("edge-7", AgentType::Isp);
        profile.name = "Edge Seven".to_string();
        profile.thresholds.rtt_ms = ThresholdPair::new(80.0, 200.0);
        profile.last_seen = Some(at(12, 0));
        store.upsert_profile(&profile).unwrap();

        let fetched = store.get_profile("edge-7").unwrap();
        assert_eq!(fetched.name, "Edge Seven");
        assert_eq!(fetched.agent_type, AgentType::Isp);
        assert_eq!(fetched.thresholds.rtt_ms, ThresholdPair::new(80.0, 200.0));
        assert_eq!(fetched.last_seen, Some(at(12, 0)));

        assert!(matches!(store.get_profile("missing"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_ingest_creates_then_refreshes_profile() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut profile = AgentProfile::new("site-a", AgentType::Client);
        profile.last_seen = Some(at(1, 0));
        let record = CheckRecord::new("site-a", at(1, 0));

        let first = store.ingest(&profile, &record).unwrap();
        assert!(first.profile_created);
        assert!(first.record_inserted);

        // Same timestamp again is ignored, profile is refreshed.
        profile.last_seen = Some(at(1, 15));
        profile.agent_type = AgentType::Isp;
        profile.name = "ignored on refresh".to_string();
        let second = store.ingest(&profile, &record).unwrap();
        assert!(!second.profile_created);
        assert!(!second.record_inserted);

        let fetched = store.get_profile("site-a").unwrap();
        assert_eq!(fetched.last_seen, Some(at(1, 15)));
        assert_eq!(fetched.agent_type, AgentType::Isp);
        assert_eq!(fetched.name, "site-a");
    }

    #[test]
    fn test_records_since_ordered_and_filtered() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);

        let records = store.get_records_since("isp-1", at(2, 0)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].avg_rtt_ms, Some(20.0));

        let all = store.get_records_since_all_agents(at(0, 0), None).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].record.timestamp <= w[1].record.timestamp));

        let isp = store
            .get_records_since_all_agents(at(0, 0), Some(AgentType::Isp))
            .unwrap();
        assert_eq!(isp.len(), 2);
        assert!(isp.iter().all(|r| r.agent_type == AgentType::Isp));
    }

    #[test]
    fn test_latest_records() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);

        let latest = store.get_latest_record("client-1").unwrap().unwrap();
        assert_eq!(latest.timestamp, at(3, 0));
        assert!(store.get_latest_record("nobody").unwrap().is_none());

        let mut inactive = store.get_profile("client-1").unwrap();
        inactive.is_active = false;
        store.upsert_profile(&inactive).unwrap();

        let per_agent = store.get_latest_record_per_agent(false).unwrap();
        assert_eq!(per_agent.len(), 2);
        assert_eq!(per_agent["isp-1"].timestamp, at(2, 0));

        let active = store.get_latest_record_per_agent(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(store.list_active_profiles().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_timestamp_is_skipped() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);
        {
            let conn = store.writer().unwrap();
            conn.execute(
                "INSERT INTO check_records (agent_id, timestamp, sla_met_interval) \
                 VALUES ('isp-1', '2024-01-09Tgarbage', 1)",
                [],
            )
            .unwrap();
        }

        let records = store.get_records_since("isp-1", at(0, 0)).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_absent_values_stay_absent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = seeded_store(&tmp);
        let mut r = CheckRecord::new("isp-1", at(5, 0));
        r.avg_loss_percent = Some(0.0);
        store.add_check(&r).unwrap();

        let back = store.get_latest_record("isp-1").unwrap().unwrap();
        assert_eq!(back.avg_loss_percent, Some(0.0));
        assert_eq!(back.avg_rtt_ms, None);
        assert_eq!(back.sla_met, None);
    }

    #[test]
    fn test_misordered_thresholds_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let mut profile = AgentProfile::new("isp-9", AgentType::Isp);
        profile.thresholds.rtt_ms = ThresholdPair::new(500.0, 100.0);

        let err = store.upsert_profile(&profile).unwrap_err();
        assert!(matches!(err, DbError::InvalidProfile { .. }));
        assert!(matches!(store.get_profile("isp-9"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_parse_db_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(parse_db_time("2024-01-10T00:00:00Z"), Some(expected));
        assert_eq!(parse_db_time("2024-01-10 00:00:00"), Some(expected));
        assert_eq!(parse_db_time("2024-01-10T01:00:00+01:00"), Some(expected));
        assert_eq!(parse_db_time("yesterday"), None);
        assert_eq!(format_db_time(expected), "2024-01-10T00:00:00Z");
    }
}
