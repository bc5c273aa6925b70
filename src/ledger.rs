/// Session ledger: append-only record of every application attempt in a run.
///
/// Every recorded attempt rewrites `data/applications_log.json` wholesale, so the
/// file on disk is always a complete picture of the run so far. A separate final
/// report is written once at shutdown.
use crate::session_dir::SessionDir;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Outcome of a single application attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Success,
    Failed,
    Skipped,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Success => "success",
            ApplicationStatus::Failed => "failed",
            ApplicationStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(ApplicationStatus::Success),
            "failed" => Ok(ApplicationStatus::Failed),
            "skipped" => Ok(ApplicationStatus::Skipped),
            _ => Err(LedgerError::InvalidStatus {
                value: s.to_string(),
            }),
        }
    }
}

/// One logged application attempt. Never edited after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub job_title: String,
    pub company: String,
    pub job_url: String,
    pub application_time: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub reason: String,
    pub easy_apply: bool,
    pub form_fields_filled: Vec<String>,
    pub errors: Vec<String>,
}

/// Input for [`Ledger::record_attempt`]; the ledger stamps the time.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub job_title: String,
    pub company: String,
    pub job_url: String,
    pub status: ApplicationStatus,
    pub reason: String,
    pub easy_apply: bool,
    pub form_fields: Vec<String>,
    pub errors: Vec<String>,
}

/// Aggregate counters derived from the record stream.
///
/// `total_jobs_checked` always equals submitted + failed + skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_jobs_checked: u64,
    pub easy_apply_found: u64,
    pub applications_submitted: u64,
    pub applications_failed: u64,
    pub jobs_skipped: u64,
}

impl SessionStats {
    fn apply(&mut self, record: &ApplicationRecord) {
        self.total_jobs_checked += 1;
        if record.easy_apply {
            self.easy_apply_found += 1;
        }
        match record.status {
            ApplicationStatus::Success => self.applications_submitted += 1,
            ApplicationStatus::Failed => self.applications_failed += 1,
            ApplicationStatus::Skipped => self.jobs_skipped += 1,
        }
    }
}

/// Root aggregate persisted as the live snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub start_time: DateTime<Utc>,
    pub applications: Vec<ApplicationRecord>,
    pub stats: SessionStats,
}

impl SessionState {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            applications: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Summary of the counters as of `now`.
    pub fn summary_at(&self, now: DateTime<Utc>) -> StatsSummary {
        let total = self.stats.total_jobs_checked.max(1) as f64;
        StatsSummary {
            session_duration: format_duration(now - self.start_time),
            statistics: self.stats,
            success_rate: percent(self.stats.applications_submitted as f64 / total),
            easy_apply_rate: percent(self.stats.easy_apply_found as f64 / total),
        }
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Payload returned by the "get session statistics" action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub session_duration: String,
    pub statistics: SessionStats,
    pub success_rate: String,
    pub easy_apply_rate: String,
}

#[derive(Debug, Serialize)]
struct FinalReport<'a> {
    session_summary: &'a SessionState,
    end_time: DateTime<Utc>,
    total_runtime: String,
}

/// Render a duration as `H:MM:SS`, with a `N day(s), ` prefix past 24 hours.
///
/// Sub-second precision is truncated; negative spans render as zero.
pub fn format_duration(duration: TimeDelta) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Owns the session state and the two files it is persisted to.
#[derive(Debug)]
pub struct Ledger {
    state: SessionState,
    snapshot_path: PathBuf,
    report_path: PathBuf,
}

impl Ledger {
    /// Create a ledger starting now.
    pub fn new(snapshot_path: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self::with_start(Utc::now(), snapshot_path, report_path)
    }

    pub fn with_start(
        start_time: DateTime<Utc>,
        snapshot_path: impl Into<PathBuf>,
        report_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: SessionState::new(start_time),
            snapshot_path: snapshot_path.into(),
            report_path: report_path.into(),
        }
    }

    /// Ledger writing to the standard files inside a run directory.
    pub fn for_session(session: &SessionDir) -> Self {
        Self::new(session.applications_log(), session.final_report())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Append one attempt, update the counters and rewrite the snapshot.
    ///
    /// If the snapshot write fails the record stays in memory; the next successful write
    /// brings the file back in sync since it always holds the full state.
    pub fn record_attempt(&mut self, attempt: Attempt) -> Result<String, LedgerError> {
        let record = ApplicationRecord {
            job_title: attempt.job_title,
            company: attempt.company,
            job_url: attempt.job_url,
            application_time: Utc::now(),
            status: attempt.status,
            reason: attempt.reason,
            easy_apply: attempt.easy_apply,
            form_fields_filled: attempt.form_fields,
            errors: attempt.errors,
        };
        let confirmation = format!(
            "Application logged: {} - {} at {}",
            record.status, record.job_title, record.company
        );

        self.state.stats.apply(&record);
        self.state.applications.push(record);

        let stats = &self.state.stats;
        tracing::info!(
            checked = stats.total_jobs_checked,
            easy_apply = stats.easy_apply_found,
            applied = stats.applications_submitted,
            failed = stats.applications_failed,
            skipped = stats.jobs_skipped,
            "session stats updated"
        );

        write_json_atomic(&self.snapshot_path, &self.state)?;
        Ok(confirmation)
    }

    /// Current counters plus derived rates. Pure read.
    pub fn stats_summary(&self) -> StatsSummary {
        self.state.summary_at(Utc::now())
    }

    /// Write the final report. Safe to call with zero recorded attempts.
    pub fn finalize(&self) -> Result<PathBuf, LedgerError> {
        self.finalize_at(Utc::now())
    }

    pub fn finalize_at(&self, end_time: DateTime<Utc>) -> Result<PathBuf, LedgerError> {
        let report = FinalReport {
            session_summary: &self.state,
            end_time,
            total_runtime: format_duration(end_time - self.state.start_time),
        };
        write_json_atomic(&self.report_path, &report)?;
        tracing::info!(path = %self.report_path.display(), "final report saved");
        Ok(self.report_path.clone())
    }
}

/// Parse a live snapshot back into a [`SessionState`].
pub fn load_snapshot(path: &Path) -> Result<SessionState, LedgerError> {
    let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| LedgerError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Pretty-print `value` into a temp file next to `path`, then rename over it.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| LedgerError::Serialize { source: e })?;

    let dir = path.parent().unwrap_or(Path::new("."));
    let write_err = |e| LedgerError::Write {
        path: path.to_path_buf(),
        source: e,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(json.as_bytes()).map_err(write_err)?;
    tmp.write_all(b"\n").map_err(write_err)?;

    tmp.persist(path).map_err(|e| LedgerError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Errors from ledger operations.
#[derive(Debug)]
pub enum LedgerError {
    /// Status was not one of success, failed, skipped.
    InvalidStatus { value: String },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl LedgerError {
    /// Whether the failure happened while persisting (memory was still updated).
    pub fn is_serialization_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::Serialize { .. } | LedgerError::Write { .. } | LedgerError::Persist { .. }
        )
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::InvalidStatus { value } => write!(
                f,
                "invalid status {value:?}: expected one of success, failed, skipped"
            ),
            LedgerError::Serialize { source } => {
                write!(f, "failed to serialize session state: {source}")
            }
            LedgerError::Write { path, source } => {
                write!(f, "failed to write {}: {source}", path.display())
            }
            LedgerError::Persist { path, source } => {
                write!(f, "failed to replace {}: {source}", path.display())
            }
            LedgerError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            LedgerError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::InvalidStatus { .. } => None,
            LedgerError::Serialize { source } => Some(source),
            LedgerError::Write { source, .. } => Some(source),
            LedgerError::Persist { source, .. } => Some(source),
            LedgerError::Read { source, .. } => Some(source),
            LedgerError::Parse { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn attempt(status: ApplicationStatus, easy_apply: bool) -> Attempt {
        Attempt {
            job_title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            job_url: "https://jobs.example.test/1".to_string(),
            status,
            reason: String::new(),
            easy_apply,
            form_fields: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn ledger_in(dir: &Path) -> Ledger {
        Ledger::new(
            dir.join("applications_log.json"),
            dir.join("final_report.json"),
        )
    }

    #[test]
    fn test_success_with_easy_apply_updates_stats() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        let msg = ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap();
        assert_eq!(msg, "Application logged: success - Backend Engineer at Acme");
        assert_eq!(
            ledger.state().stats,
            SessionStats {
                total_jobs_checked: 1,
                easy_apply_found: 1,
                applications_submitted: 1,
                applications_failed: 0,
                jobs_skipped: 0,
            }
        );
    }

    #[test]
    fn test_skipped_without_easy_apply_updates_stats() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());

        let mut a = attempt(ApplicationStatus::Skipped, false);
        a.reason = "not_easy_apply".to_string();
        ledger.record_attempt(a).unwrap();

        assert_eq!(
            ledger.state().stats,
            SessionStats {
                total_jobs_checked: 1,
                easy_apply_found: 0,
                applications_submitted: 0,
                applications_failed: 0,
                jobs_skipped: 1,
            }
        );
        assert_eq!(ledger.state().applications[0].reason, "not_easy_apply");
    }

    #[test]
    fn test_total_matches_outcome_counters_over_mixed_sequence() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        let statuses = [
            ApplicationStatus::Success,
            ApplicationStatus::Failed,
            ApplicationStatus::Skipped,
            ApplicationStatus::Skipped,
            ApplicationStatus::Success,
            ApplicationStatus::Failed,
            ApplicationStatus::Success,
        ];

        for (i, status) in statuses.iter().enumerate() {
            ledger.record_attempt(attempt(*status, i % 2 == 0)).unwrap();
            let s = ledger.state().stats;
            assert_eq!(s.total_jobs_checked, (i + 1) as u64);
            assert_eq!(
                s.applications_submitted + s.applications_failed + s.jobs_skipped,
                s.total_jobs_checked
            );
        }
        let s = ledger.state().stats;
        assert_eq!(s.applications_submitted, 3);
        assert_eq!(s.applications_failed, 2);
        assert_eq!(s.jobs_skipped, 2);
        assert_eq!(s.easy_apply_found, 4);
    }

    #[test]
    fn test_status_parsing_is_strict() {
        assert_eq!(
            "success".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::Success
        );
        assert_eq!(
            " Skipped ".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::Skipped
        );
        let err = "pending".parse::<ApplicationStatus>().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatus { ref value } if value == "pending"));
        assert!(err.to_string().contains("success, failed, skipped"));
    }

    #[test]
    fn test_snapshot_round_trip_matches_memory() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        let mut a = attempt(ApplicationStatus::Failed, true);
        a.form_fields = vec!["first name".to_string(), "city, state".to_string()];
        a.errors = vec!["upload failed".to_string()];
        ledger.record_attempt(a).unwrap();
        ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap();

        let loaded = load_snapshot(ledger.snapshot_path()).unwrap();
        assert_eq!(&loaded, ledger.state());
        assert_eq!(loaded.applications.len(), 2);
        assert_eq!(
            loaded.applications[0].form_fields_filled,
            vec!["first name", "city, state"]
        );
    }

    #[test]
    fn test_snapshot_json_shape() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        ledger
            .record_attempt(attempt(ApplicationStatus::Skipped, false))
            .unwrap();

        let raw = std::fs::read_to_string(ledger.snapshot_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["start_time"].is_string());
        assert_eq!(value["applications"][0]["status"], "skipped");
        assert_eq!(value["applications"][0]["easy_apply"], false);
        assert_eq!(value["stats"]["jobs_skipped"], 1);
        // Pretty-printed for humans
        assert!(raw.contains("\n  \"applications\""));
    }

    #[test]
    fn test_write_failure_keeps_record_in_memory() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no-such-dir");
        let mut ledger = ledger_in(&missing);

        let err = ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap_err();
        assert!(err.is_serialization_failure());
        assert_eq!(ledger.state().applications.len(), 1);
        assert_eq!(ledger.state().stats.total_jobs_checked, 1);

        // Once storage is back, the next write carries both records.
        std::fs::create_dir_all(&missing).unwrap();
        ledger
            .record_attempt(attempt(ApplicationStatus::Failed, false))
            .unwrap();
        let loaded = load_snapshot(ledger.snapshot_path()).unwrap();
        assert_eq!(loaded.applications.len(), 2);
    }

    #[test]
    fn test_empty_session_rates_are_zero() {
        let start = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let state = SessionState::new(start);
        let summary = state.summary_at(start + TimeDelta::seconds(42));
        assert_eq!(summary.success_rate, "0.0%");
        assert_eq!(summary.easy_apply_rate, "0.0%");
        assert_eq!(summary.session_duration, "0:00:42");
    }

    #[test]
    fn test_summary_rates() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap();
        ledger
            .record_attempt(attempt(ApplicationStatus::Skipped, false))
            .unwrap();
        ledger
            .record_attempt(attempt(ApplicationStatus::Failed, true))
            .unwrap();

        let summary = ledger.stats_summary();
        assert_eq!(summary.success_rate, "33.3%");
        assert_eq!(summary.easy_apply_rate, "66.7%");
        assert_eq!(summary.statistics.total_jobs_checked, 3);
    }

    #[test]
    fn test_summary_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap();

        let now = Utc::now();
        let first = ledger.state().summary_at(now);
        let second = ledger.state().summary_at(now);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_finalize_empty_session() {
        let dir = tempdir().unwrap();
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let ledger = Ledger::with_start(
            start,
            dir.path().join("applications_log.json"),
            dir.path().join("final_report.json"),
        );

        let end = start + TimeDelta::milliseconds(3_723_900);
        let path = ledger.finalize_at(end).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(value["total_runtime"], "1:02:03");
        assert!(value["end_time"].is_string());
        assert_eq!(
            value["session_summary"]["applications"]
                .as_array()
                .unwrap()
                .len(),
            0
        );
        assert_eq!(value["session_summary"]["stats"]["total_jobs_checked"], 0);
    }

    #[test]
    fn test_finalize_is_separate_from_snapshot() {
        let dir = tempdir().unwrap();
        let mut ledger = ledger_in(dir.path());
        ledger
            .record_attempt(attempt(ApplicationStatus::Success, true))
            .unwrap();
        let report = ledger.finalize().unwrap();

        assert_ne!(report, ledger.snapshot_path());
        // Snapshot keeps its own shape
        assert!(load_snapshot(ledger.snapshot_path()).is_ok());
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
        assert_eq!(value["session_summary"]["stats"]["applications_submitted"], 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::zero()), "0:00:00");
        assert_eq!(format_duration(TimeDelta::milliseconds(59_999)), "0:00:59");
        assert_eq!(format_duration(TimeDelta::seconds(3600 * 25 + 61)), "1 day, 1:01:01");
        assert_eq!(format_duration(TimeDelta::seconds(86_400 * 3)), "3 days, 0:00:00");
        assert_eq!(format_duration(TimeDelta::seconds(-5)), "0:00:00");
    }

    #[test]
    fn test_load_snapshot_missing_file() {
        let err = load_snapshot(Path::new("/nonexistent/applications_log.json")).unwrap_err();
        assert!(matches!(err, LedgerError::Read { .. }));
    }
}
