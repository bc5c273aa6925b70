/// The fixed set of actions the agent may call, and their dispatcher.
///
/// The agent names an action and passes primitive arguments as a JSON object;
/// it always gets back an [`ActionResult`]. Argument problems, invalid statuses
/// and failed snapshot writes are reported as error results and never end the
/// run.
use crate::config::UserProfile;
use crate::credentials::Credentials;
use crate::guard::{parse_start_time, GuardStatus, TimerGuard};
use crate::ledger::{ApplicationStatus, Attempt, Ledger};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every callable action. The set is static; nothing registers at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetCredentials,
    GetUserDetails,
    RecordApplicationAttempt,
    GetSessionStatistics,
    ArmInterventionTimer,
    CheckInterventionTimer,
    ResetInterventionTimer,
    ArmApplicationTimer,
    CheckApplicationTimeLimit,
    ResetApplicationTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Boolean,
    /// JSON array of strings, or a comma-separated string.
    StringList,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

const fn param(
    name: &'static str,
    kind: ParamKind,
    required: bool,
    description: &'static str,
) -> Param {
    Param {
        name,
        kind,
        required,
        description,
    }
}

const RECORD_PARAMS: &[Param] = &[
    param("job_title", ParamKind::String, true, "Title of the job posting"),
    param("company", ParamKind::String, true, "Hiring company"),
    param("job_url", ParamKind::String, true, "URL of the job posting"),
    param(
        "status",
        ParamKind::String,
        true,
        "One of success, failed, skipped",
    ),
    param(
        "reason",
        ParamKind::String,
        false,
        "Why the job was skipped or failed, e.g. not_easy_apply",
    ),
    param(
        "easy_apply",
        ParamKind::Boolean,
        false,
        "Whether the posting had an Easy Apply button",
    ),
    param(
        "form_fields",
        ParamKind::StringList,
        false,
        "Names of the form fields that were filled",
    ),
    param(
        "errors",
        ParamKind::StringList,
        false,
        "Errors encountered during the attempt",
    ),
];

const TIME_LIMIT_PARAMS: &[Param] = &[param(
    "start_time",
    ParamKind::String,
    false,
    "ISO-8601 instant the application was started; arms the timer at that instant",
)];

impl Action {
    pub const ALL: [Action; 10] = [
        Action::GetCredentials,
        Action::GetUserDetails,
        Action::RecordApplicationAttempt,
        Action::GetSessionStatistics,
        Action::ArmInterventionTimer,
        Action::CheckInterventionTimer,
        Action::ResetInterventionTimer,
        Action::ArmApplicationTimer,
        Action::CheckApplicationTimeLimit,
        Action::ResetApplicationTimer,
    ];

    /// Wire name used in action requests.
    pub fn name(self) -> &'static str {
        match self {
            Action::GetCredentials => "get_credentials",
            Action::GetUserDetails => "get_user_details",
            Action::RecordApplicationAttempt => "record_application_attempt",
            Action::GetSessionStatistics => "get_session_statistics",
            Action::ArmInterventionTimer => "arm_intervention_timer",
            Action::CheckInterventionTimer => "check_intervention_timer",
            Action::ResetInterventionTimer => "reset_intervention_timer",
            Action::ArmApplicationTimer => "arm_application_timer",
            Action::CheckApplicationTimeLimit => "check_application_time_limit",
            Action::ResetApplicationTimer => "reset_application_timer",
        }
    }

    /// Human description shown to the agent.
    pub fn description(self) -> &'static str {
        match self {
            Action::GetCredentials => "Get login credentials",
            Action::GetUserDetails => "Get user details for job applications",
            Action::RecordApplicationAttempt => "Log job application attempt",
            Action::GetSessionStatistics => "Get current session statistics",
            Action::ArmInterventionTimer => {
                "Start user intervention timer for verification or OTP"
            }
            Action::CheckInterventionTimer => "Check if user intervention time exceeded",
            Action::ResetInterventionTimer => "Reset user intervention timer",
            Action::ArmApplicationTimer => "Start the time limit for the current application",
            Action::CheckApplicationTimeLimit => "Check application time limit",
            Action::ResetApplicationTimer => "Reset the application time limit",
        }
    }

    pub fn params(self) -> &'static [Param] {
        match self {
            Action::RecordApplicationAttempt => RECORD_PARAMS,
            Action::CheckApplicationTimeLimit => TIME_LIMIT_PARAMS,
            _ => &[],
        }
    }

    /// Look up by wire name or by description, ignoring case.
    pub fn from_name(name: &str) -> Option<Action> {
        let wanted = name.trim();
        Action::ALL.into_iter().find(|a| {
            a.name().eq_ignore_ascii_case(wanted) || a.description().eq_ignore_ascii_case(wanted)
        })
    }
}

/// Serializable description of one action, written to `actions.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [Param],
}

pub fn describe() -> Vec<ActionSpec> {
    Action::ALL
        .into_iter()
        .map(|a| ActionSpec {
            name: a.name(),
            description: a.description(),
            parameters: a.params(),
        })
        .collect()
}

/// What the agent receives back from every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub extracted_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub include_in_memory: bool,
}

impl ActionResult {
    /// Content the agent should keep in its memory.
    pub fn remember(content: impl Into<String>) -> Self {
        Self {
            extracted_content: content.into(),
            error: None,
            include_in_memory: true,
        }
    }

    pub fn transient(content: impl Into<String>) -> Self {
        Self {
            extracted_content: content.into(),
            error: None,
            include_in_memory: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            extracted_content: String::new(),
            error: Some(message.into()),
            include_in_memory: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Owns the ledger, both guards and the read-only context the agent may query.
pub struct ActionTable {
    ledger: Ledger,
    intervention: TimerGuard,
    application: TimerGuard,
    credentials: Option<Credentials>,
    user: UserProfile,
}

impl ActionTable {
    pub fn new(
        ledger: Ledger,
        intervention: TimerGuard,
        application: TimerGuard,
        credentials: Option<Credentials>,
        user: UserProfile,
    ) -> Self {
        Self {
            ledger,
            intervention,
            application,
            credentials,
            user,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Dispatch by wire name; unknown names become error results.
    pub fn dispatch_named(&mut self, name: &str, args: &Value) -> ActionResult {
        match Action::from_name(name) {
            Some(action) => self.dispatch(action, args),
            None => {
                let err = ActionError::UnknownAction {
                    name: name.to_string(),
                };
                tracing::warn!(error = %err, "agent called an unknown action");
                ActionResult::error(err.to_string())
            }
        }
    }

    pub fn dispatch(&mut self, action: Action, args: &Value) -> ActionResult {
        tracing::debug!(action = action.name(), "dispatching action");
        match action {
            Action::GetCredentials => self.get_credentials(),
            Action::GetUserDetails => match serde_json::to_string_pretty(&self.user) {
                Ok(json) => ActionResult::remember(json),
                Err(e) => ActionResult::error(format!("Failed to render user details: {e}")),
            },
            Action::RecordApplicationAttempt => self.record_attempt(args),
            Action::GetSessionStatistics => {
                match serde_json::to_string_pretty(&self.ledger.stats_summary()) {
                    Ok(json) => ActionResult::remember(json),
                    Err(e) => ActionResult::error(format!("Failed to render statistics: {e}")),
                }
            }
            Action::ArmInterventionTimer => ActionResult::remember(self.intervention.arm()),
            Action::CheckInterventionTimer => poll(&self.intervention),
            Action::ResetInterventionTimer => ActionResult::remember(self.intervention.reset()),
            Action::ArmApplicationTimer => ActionResult::remember(self.application.arm()),
            Action::CheckApplicationTimeLimit => self.check_application_time_limit(args),
            Action::ResetApplicationTimer => ActionResult::remember(self.application.reset()),
        }
    }

    fn get_credentials(&self) -> ActionResult {
        if self.credentials.is_none() {
            return ActionResult::error("Login credentials not found in environment variables");
        }
        // Placeholders only; the agent substitutes its sensitive data itself.
        ActionResult::remember(
            "Email: <secret>login_email</secret>, Password: <secret>login_password</secret>",
        )
    }

    fn record_attempt(&mut self, args: &Value) -> ActionResult {
        let attempt = match attempt_from_args(args) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "rejected application attempt");
                return ActionResult::error(format!("Failed to log application: {e}"));
            }
        };
        match self.ledger.record_attempt(attempt) {
            Ok(confirmation) => ActionResult::remember(confirmation),
            Err(e) if e.is_serialization_failure() => {
                tracing::error!(error = %e, "attempt kept in memory but snapshot write failed");
                ActionResult::error(format!("Failed to log application: {e}"))
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejected application attempt");
                ActionResult::error(format!("Failed to log application: {e}"))
            }
        }
    }

    fn check_application_time_limit(&mut self, args: &Value) -> ActionResult {
        let start = match optional_str(args, "start_time") {
            Ok(s) => s.filter(|s| !s.trim().is_empty()),
            Err(e) => return ActionResult::error(format!("Error checking time limit: {e}")),
        };
        if let Some(text) = start {
            match parse_start_time(&text) {
                Ok(since) => self.application.arm_at(since),
                Err(e) => {
                    tracing::warn!(error = %e, "bad application start time");
                    return ActionResult::error(format!("Error checking time limit: {e}"));
                }
            }
        }
        poll(&self.application)
    }
}

fn poll(guard: &TimerGuard) -> ActionResult {
    let status = guard.check();
    let text = guard.describe(status);
    match status {
        GuardStatus::Unarmed => ActionResult::transient(text),
        _ => ActionResult::remember(text),
    }
}

fn attempt_from_args(args: &Value) -> Result<Attempt, ActionError> {
    let status_text = required_str(args, "status")?;
    let status = status_text
        .parse::<ApplicationStatus>()
        .map_err(|e| ActionError::InvalidArgument {
            name: "status",
            reason: e.to_string(),
        })?;
    Ok(Attempt {
        job_title: required_str(args, "job_title")?,
        company: required_str(args, "company")?,
        job_url: required_str(args, "job_url")?,
        status,
        reason: optional_str(args, "reason")?.unwrap_or_default(),
        easy_apply: optional_bool(args, "easy_apply")?.unwrap_or(false),
        form_fields: string_list(args, "form_fields")?,
        errors: string_list(args, "errors")?,
    })
}

fn field<'a>(args: &'a Value, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

fn required_str(args: &Value, name: &'static str) -> Result<String, ActionError> {
    optional_str(args, name)?.ok_or(ActionError::MissingArgument { name })
}

fn optional_str(args: &Value, name: &'static str) -> Result<Option<String>, ActionError> {
    match field(args, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(ActionError::InvalidArgument {
            name,
            reason: "expected a string".to_string(),
        }),
    }
}

fn optional_bool(args: &Value, name: &'static str) -> Result<Option<bool>, ActionError> {
    match field(args, name) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" | "" => Ok(Some(false)),
            _ => Err(ActionError::InvalidArgument {
                name,
                reason: format!("expected a boolean, got {s:?}"),
            }),
        },
        Some(_) => Err(ActionError::InvalidArgument {
            name,
            reason: "expected a boolean".to_string(),
        }),
    }
}

/// Accepts `["a", "b"]` or the comma-joined `"a, b"` form.
///
/// Entries are trimmed and empty ones dropped. Only the array form can carry a
/// value that itself contains a comma.
fn string_list(args: &Value, name: &'static str) -> Result<Vec<String>, ActionError> {
    match field(args, name) {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                _ => Err(ActionError::InvalidArgument {
                    name,
                    reason: "list entries must be strings".to_string(),
                }),
            })
            .filter(|entry| !matches!(entry, Ok(s) if s.is_empty()))
            .collect(),
        Some(_) => Err(ActionError::InvalidArgument {
            name,
            reason: "expected a list of strings".to_string(),
        }),
    }
}

#[derive(Debug)]
pub enum ActionError {
    UnknownAction { name: String },
    MissingArgument { name: &'static str },
    InvalidArgument { name: &'static str, reason: String },
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::UnknownAction { name } => write!(f, "unknown action {name:?}"),
            ActionError::MissingArgument { name } => write!(f, "missing argument {name:?}"),
            ActionError::InvalidArgument { name, reason } => {
                write!(f, "invalid argument {name:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ActionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::load_snapshot;
    use serde_json::json;
    use std::path::Path;

    fn table_in(dir: &Path, credentials: Option<Credentials>) -> ActionTable {
        let ledger = Ledger::new(
            dir.join("applications_log.json"),
            dir.join("final_report.json"),
        );
        ActionTable::new(
            ledger,
            TimerGuard::intervention(),
            TimerGuard::application(),
            credentials,
            UserProfile::default(),
        )
    }

    fn creds() -> Credentials {
        Credentials {
            email: "ada@lovelace.dev".to_string(),
            password: "hunter22".to_string(),
            api_key: "sk-proj-0123456789abcdef".to_string(),
        }
    }

    #[test]
    fn test_names_are_unique_and_resolvable() {
        let mut names: Vec<&str> = Action::ALL.iter().map(|a| a.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Action::ALL.len());
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.name()), Some(action));
            assert_eq!(Action::from_name(action.description()), Some(action));
        }
        assert_eq!(
            Action::from_name("LOG JOB APPLICATION ATTEMPT"),
            Some(Action::RecordApplicationAttempt)
        );
    }

    #[test]
    fn test_describe_lists_parameters() {
        let specs = describe();
        assert_eq!(specs.len(), 10);
        let value = serde_json::to_value(&specs).unwrap();
        let record = value
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["name"] == "record_application_attempt")
            .unwrap();
        assert_eq!(record["parameters"][0]["name"], "job_title");
        assert_eq!(record["parameters"][6]["kind"], "string_list");
    }

    #[test]
    fn test_record_attempt_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), Some(creds()));

        let result = table.dispatch(
            Action::RecordApplicationAttempt,
            &json!({
                "job_title": "Data Engineer",
                "company": "Initech",
                "job_url": "https://jobs.example.test/9",
                "status": "success",
                "easy_apply": true,
                "form_fields": ["first name", "phone"],
            }),
        );
        assert!(!result.is_error(), "{result:?}");
        assert_eq!(
            result.extracted_content,
            "Application logged: success - Data Engineer at Initech"
        );
        assert!(result.include_in_memory);

        let saved = load_snapshot(table.ledger().snapshot_path()).unwrap();
        assert_eq!(saved.stats.applications_submitted, 1);
        assert_eq!(saved.applications[0].form_fields_filled, vec!["first name", "phone"]);
    }

    #[test]
    fn test_record_attempt_invalid_status_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);

        let result = table.dispatch_named(
            "record_application_attempt",
            &json!({
                "job_title": "QA",
                "company": "Globex",
                "job_url": "https://jobs.example.test/2",
                "status": "in_progress",
            }),
        );
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("invalid argument \"status\""));
        assert_eq!(table.ledger().state().stats.total_jobs_checked, 0);
        assert!(table.ledger().state().applications.is_empty());
        assert!(!table.ledger().snapshot_path().exists());
    }

    #[test]
    fn test_record_attempt_missing_argument() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let result = table.dispatch(
            Action::RecordApplicationAttempt,
            &json!({"job_title": "QA", "status": "skipped"}),
        );
        assert_eq!(
            result.error.as_deref(),
            Some("Failed to log application: missing argument \"company\"")
        );
    }

    #[test]
    fn test_comma_separated_lists_and_string_bools() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        table.dispatch(
            Action::RecordApplicationAttempt,
            &json!({
                "job_title": "SRE",
                "company": "Hooli",
                "job_url": "https://jobs.example.test/3",
                "status": "failed",
                "easy_apply": "true",
                "form_fields": "email, phone,,resume",
                "errors": "",
            }),
        );
        let record = &table.ledger().state().applications[0];
        assert_eq!(record.form_fields_filled, vec!["email", "phone", "resume"]);
        assert!(record.errors.is_empty());
        assert!(record.easy_apply);
        assert_eq!(table.ledger().state().stats.applications_failed, 1);
    }

    #[test]
    fn test_record_attempt_write_failure_reported_but_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(&dir.path().join("gone"), None);
        let result = table.dispatch(
            Action::RecordApplicationAttempt,
            &json!({
                "job_title": "SRE",
                "company": "Hooli",
                "job_url": "https://jobs.example.test/3",
                "status": "skipped",
                "reason": "not_easy_apply",
            }),
        );
        assert!(result.is_error());
        assert_eq!(table.ledger().state().stats.jobs_skipped, 1);
    }

    #[test]
    fn test_session_statistics_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let result = table.dispatch(Action::GetSessionStatistics, &Value::Null);
        let value: Value = serde_json::from_str(&result.extracted_content).unwrap();
        assert_eq!(value["success_rate"], "0.0%");
        assert_eq!(value["easy_apply_rate"], "0.0%");
        assert_eq!(value["statistics"]["total_jobs_checked"], 0);
        assert!(value["session_duration"].as_str().unwrap().starts_with("0:00:"));
    }

    #[test]
    fn test_credentials_are_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), Some(creds()));
        let result = table.dispatch(Action::GetCredentials, &Value::Null);
        assert!(result.extracted_content.contains("<secret>login_password</secret>"));
        assert!(!result.extracted_content.contains("hunter22"));

        let mut bare = table_in(dir.path(), None);
        assert!(bare.dispatch(Action::GetCredentials, &Value::Null).is_error());
    }

    #[test]
    fn test_user_details_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let result = table.dispatch(Action::GetUserDetails, &Value::Null);
        let value: Value = serde_json::from_str(&result.extracted_content).unwrap();
        assert_eq!(value["professional"]["willing_to_relocate"], "Yes");
        assert_eq!(value["experience_responses"]["years_experience"], "2");
    }

    #[test]
    fn test_intervention_timer_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);

        let idle = table.dispatch(Action::CheckInterventionTimer, &Value::Null);
        assert_eq!(idle.extracted_content, "No intervention timer active");

        table.dispatch(Action::ArmInterventionTimer, &Value::Null);
        let active = table.dispatch(Action::CheckInterventionTimer, &Value::Null);
        assert!(active.extracted_content.ends_with("seconds remaining"));

        let reset = table.dispatch(Action::ResetInterventionTimer, &Value::Null);
        assert_eq!(reset.extracted_content, "Timer reset - intervention completed");
        let idle = table.dispatch(Action::CheckInterventionTimer, &Value::Null);
        assert_eq!(idle.extracted_content, "No intervention timer active");
    }

    #[test]
    fn test_application_time_limit_with_old_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let start = (chrono::Utc::now() - chrono::TimeDelta::seconds(301)).to_rfc3339();
        let result = table.dispatch(
            Action::CheckApplicationTimeLimit,
            &json!({ "start_time": start }),
        );
        assert_eq!(result.extracted_content, "TIME_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_application_time_limit_malformed_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let result = table.dispatch(
            Action::CheckApplicationTimeLimit,
            &json!({ "start_time": "five minutes ago" }),
        );
        assert!(result
            .error
            .unwrap()
            .starts_with("Error checking time limit: malformed timestamp"));
    }

    #[test]
    fn test_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = table_in(dir.path(), None);
        let result = table.dispatch_named("click_button", &Value::Null);
        assert_eq!(result.error.as_deref(), Some("unknown action \"click_button\""));
    }
}
