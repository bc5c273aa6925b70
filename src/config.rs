use crate::guard::{APPLICATION_THRESHOLD_SECS, INTERVENTION_THRESHOLD_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from applybot.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub agent: AgentConfig,
    pub timers: TimerConfig,
    pub credentials: CredentialsConfig,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding one subdirectory per run.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    /// `{prompt_file}`, `{session_dir}` and `{actions_file}` are substituted.
    pub args: Vec<String>,
    /// Natural-language task handed to the agent; opaque to the harness.
    pub prompt_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimerConfig {
    pub intervention_secs: u64,
    pub application_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Explicit .env file; when unset `./.env` then `~/.env` are tried.
    pub env_file: Option<PathBuf>,
    pub email_var: String,
    pub password_var: String,
    pub api_key_var: String,
}

/// Applicant details returned verbatim to the agent for form filling.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UserProfile {
    pub personal: PersonalDetails,
    pub professional: ProfessionalDetails,
    pub education: EducationDetails,
    pub experience_responses: ExperienceResponses,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersonalDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub profile_url: String,
    pub location: Location,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Location {
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfessionalDetails {
    pub current_title: String,
    pub years_of_experience: String,
    pub notice_period: String,
    pub salary_expectation: String,
    pub willing_to_relocate: String,
    pub authorized_to_work: String,
    pub require_sponsorship: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EducationDetails {
    pub degree: String,
    pub university: String,
    pub graduation_year: String,
    pub gpa: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperienceResponses {
    pub have_experience: String,
    pub years_experience: String,
    pub familiar_with: String,
    pub worked_with: String,
    pub comfortable_with: String,
}

// --- Default implementations ---

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("applybot_sessions"),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "browser-agent".to_string(),
            args: vec![
                "--task-file".to_string(),
                "{prompt_file}".to_string(),
                "--actions".to_string(),
                "{actions_file}".to_string(),
                "--session-dir".to_string(),
                "{session_dir}".to_string(),
            ],
            prompt_file: PathBuf::from("TASK.md"),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            intervention_secs: INTERVENTION_THRESHOLD_SECS,
            application_secs: APPLICATION_THRESHOLD_SECS,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_file: None,
            email_var: "LINKEDIN_EMAIL".to_string(),
            password_var: "LINKEDIN_PASSWORD".to_string(),
            api_key_var: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for ProfessionalDetails {
    fn default() -> Self {
        Self {
            current_title: String::new(),
            years_of_experience: "2".to_string(),
            notice_period: "2 weeks".to_string(),
            salary_expectation: String::new(),
            willing_to_relocate: "Yes".to_string(),
            authorized_to_work: "Yes".to_string(),
            require_sponsorship: "No".to_string(),
        }
    }
}

impl Default for ExperienceResponses {
    fn default() -> Self {
        Self {
            have_experience: "Yes".to_string(),
            years_experience: "2".to_string(),
            familiar_with: "Yes".to_string(),
            worked_with: "Yes".to_string(),
            comfortable_with: "Yes".to_string(),
        }
    }
}

/// Commented config written by `applybot init`.
pub const DEFAULT_CONFIG: &str = "\
# applybot configuration
# Every section is optional; values shown are the defaults.

[session]
root = \"applybot_sessions\"

[agent]
command = \"browser-agent\"
args = [\"--task-file\", \"{prompt_file}\", \"--actions\", \"{actions_file}\", \"--session-dir\", \"{session_dir}\"]
prompt_file = \"TASK.md\"

[timers]
intervention_secs = 120
application_secs = 300

[credentials]
email_var = \"LINKEDIN_EMAIL\"
password_var = \"LINKEDIN_PASSWORD\"
api_key_var = \"OPENAI_API_KEY\"

# Applicant details; USER_* environment variables override these.
[user.personal]
first_name = \"\"
last_name = \"\"

[user.personal.location]
city = \"\"
country = \"\"
";

impl AppConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.command is empty".to_string()));
        }
        if self.timers.intervention_secs == 0 || self.timers.application_secs == 0 {
            return Err(ConfigError::Invalid(
                "timer budgets must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the resolved settings for `--dry-run`.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# failed to render config: {e}\n"))
    }
}

impl UserProfile {
    /// Overlay non-empty `USER_*` variables from `lookup` onto the profile.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let p = &mut self.personal;
        let fields: [(&str, &mut String); 16] = [
            ("USER_FIRST_NAME", &mut p.first_name),
            ("USER_LAST_NAME", &mut p.last_name),
            ("USER_EMAIL", &mut p.email),
            ("USER_PHONE", &mut p.phone),
            ("USER_PROFILE_URL", &mut p.profile_url),
            ("USER_CITY", &mut p.location.city),
            ("USER_STATE", &mut p.location.state),
            ("USER_COUNTRY", &mut p.location.country),
            ("USER_ZIP_CODE", &mut p.location.zip_code),
            ("USER_CURRENT_TITLE", &mut self.professional.current_title),
            ("USER_SALARY_EXPECTATION", &mut self.professional.salary_expectation),
            ("USER_YEARS_OF_EXPERIENCE", &mut self.professional.years_of_experience),
            ("USER_DEGREE", &mut self.education.degree),
            ("USER_UNIVERSITY", &mut self.education.university),
            ("USER_GRADUATION_YEAR", &mut self.education.graduation_year),
            ("USER_GPA", &mut self.education.gpa),
        ];
        for (var, field) in fields {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }
}

/// Errors from loading configuration. All are fatal at startup.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
