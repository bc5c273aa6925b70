/// Passive elapsed-time guards for bounded waits.
///
/// A guard only answers "has too much time passed?" when asked. It never fires
/// callbacks or interrupts anything; the agent polls it and picks the corrective
/// action itself.
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};

/// Default budget for a human-in-the-loop verification step.
pub const INTERVENTION_THRESHOLD_SECS: u64 = 120;
/// Default budget for filling in a single application.
pub const APPLICATION_THRESHOLD_SECS: u64 = 300;

/// Which bounded wait a guard watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Intervention,
    Application,
}

impl GuardKind {
    fn label(self) -> &'static str {
        match self {
            GuardKind::Intervention => "intervention",
            GuardKind::Application => "application",
        }
    }

    /// Sentinel text the agent watches for once the budget is spent.
    pub fn exceeded_signal(self) -> &'static str {
        match self {
            GuardKind::Intervention => "TIMEOUT_EXCEEDED",
            GuardKind::Application => "TIME_LIMIT_EXCEEDED",
        }
    }
}

/// Result of polling a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    Unarmed,
    Remaining { secs: u64 },
    Exceeded,
}

#[derive(Debug, Clone)]
pub struct TimerGuard {
    kind: GuardKind,
    threshold: TimeDelta,
    armed_since: Option<DateTime<Utc>>,
}

impl TimerGuard {
    pub fn new(kind: GuardKind, threshold_secs: u64) -> Self {
        let secs = threshold_secs.min(u64::from(u32::MAX)) as i64;
        Self {
            kind,
            threshold: TimeDelta::seconds(secs),
            armed_since: None,
        }
    }

    pub fn intervention() -> Self {
        Self::new(GuardKind::Intervention, INTERVENTION_THRESHOLD_SECS)
    }

    pub fn application() -> Self {
        Self::new(GuardKind::Application, APPLICATION_THRESHOLD_SECS)
    }

    pub fn threshold_secs(&self) -> u64 {
        self.threshold.num_seconds().max(0) as u64
    }

    #[cfg(test)]
    pub fn armed_since(&self) -> Option<DateTime<Utc>> {
        self.armed_since
    }

    /// Start (or restart) the window now.
    pub fn arm(&mut self) -> String {
        self.arm_at(Utc::now());
        match self.kind {
            GuardKind::Intervention => {
                tracing::warn!(
                    budget_secs = self.threshold_secs(),
                    "user intervention required, complete the verification in the browser"
                );
                format!(
                    "Timer started - {} seconds for user intervention",
                    self.threshold_secs()
                )
            }
            GuardKind::Application => {
                tracing::debug!(budget_secs = self.threshold_secs(), "application timer armed");
                format!(
                    "Timer started - {} seconds for this application",
                    self.threshold_secs()
                )
            }
        }
    }

    /// Arm as if the window opened at `since`. Overwrites any earlier start.
    pub fn arm_at(&mut self, since: DateTime<Utc>) {
        self.armed_since = Some(since);
    }

    pub fn check(&self) -> GuardStatus {
        self.check_at(Utc::now())
    }

    /// Evaluate the guard against `now`. Never changes state.
    pub fn check_at(&self, now: DateTime<Utc>) -> GuardStatus {
        let Some(since) = self.armed_since else {
            return GuardStatus::Unarmed;
        };
        let elapsed = (now - since).max(TimeDelta::zero());
        if elapsed >= self.threshold {
            return GuardStatus::Exceeded;
        }
        // Rounded to the nearest second, half up.
        let remaining_ms = (self.threshold - elapsed).num_milliseconds();
        GuardStatus::Remaining {
            secs: ((remaining_ms + 500) / 1000).max(0) as u64,
        }
    }

    /// Back to unarmed, whatever the prior state.
    pub fn reset(&mut self) -> String {
        self.armed_since = None;
        tracing::info!(timer = self.kind.label(), "timer reset");
        format!("Timer reset - {} completed", self.kind.label())
    }

    /// Text payload handed back to the agent for a poll result.
    pub fn describe(&self, status: GuardStatus) -> String {
        match status {
            GuardStatus::Unarmed => format!("No {} timer active", self.kind.label()),
            GuardStatus::Remaining { secs } => {
                format!("Timer active - {secs} seconds remaining")
            }
            GuardStatus::Exceeded => {
                tracing::error!(
                    timer = self.kind.label(),
                    budget_secs = self.threshold_secs(),
                    "time budget exceeded"
                );
                self.kind.exceeded_signal().to_string()
            }
        }
    }
}

/// Parse an agent-supplied start instant.
///
/// Accepts RFC 3339 (`2026-03-01T10:00:00Z`, `...+02:00`) or a naive
/// `YYYY-MM-DDTHH:MM:SS[.frac]`, which is read as local time.
pub fn parse_start_time(text: &str) -> Result<DateTime<Utc>, GuardError> {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| GuardError::MalformedTimestamp {
            value: text.to_string(),
            reason: e.to_string(),
        })?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| GuardError::MalformedTimestamp {
            value: text.to_string(),
            reason: "time does not exist in the local timezone".to_string(),
        })
}

#[derive(Debug)]
pub enum GuardError {
    MalformedTimestamp { value: String, reason: String },
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::MalformedTimestamp { value, reason } => {
                write!(f, "malformed timestamp {value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for GuardError {}
