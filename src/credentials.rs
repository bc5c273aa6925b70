/// Credential discovery and validation.
///
/// Credentials come from the process environment, optionally seeded from a
/// `.env` file. Missing, empty or still-templated values are fatal: the run is
/// refused before the agent is spawned.
use crate::config::CredentialsConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Values that were copied from `.env.template` without being filled in.
static TEMPLATE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^your_|example\.com").unwrap());

/// Validated login and model credentials.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &mask_email(&self.email))
            .field("password", &mask_password(&self.password))
            .field("api_key", &mask_api_key(&self.api_key))
            .finish()
    }
}

/// Why a required variable was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProblem {
    Missing,
    Empty,
    Template,
}

impl std::fmt::Display for CredentialProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialProblem::Missing => f.write_str("MISSING"),
            CredentialProblem::Empty => f.write_str("EMPTY"),
            CredentialProblem::Template => f.write_str("TEMPLATE VALUE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialIssue {
    pub var: String,
    pub problem: CredentialProblem,
}

/// Classify a raw environment value; `None` means it is usable.
pub fn classify(value: Option<&str>) -> Option<CredentialProblem> {
    match value {
        None => Some(CredentialProblem::Missing),
        Some(v) if v.trim().is_empty() => Some(CredentialProblem::Empty),
        Some(v) if TEMPLATE_VALUE.is_match(v.trim()) => Some(CredentialProblem::Template),
        Some(_) => None,
    }
}

/// Load a `.env` file into the process environment.
///
/// An explicitly configured file must load. Otherwise `./.env` and then
/// `$HOME/.env` are tried and the first one found wins; finding none is not an
/// error since the variables may already be exported. Existing variables are
/// never overwritten.
pub fn load_env_file(config: &CredentialsConfig) -> Result<Option<PathBuf>, CredentialError> {
    if let Some(path) = &config.env_file {
        dotenvy::from_path(path).map_err(|e| CredentialError::EnvFile {
            path: path.clone(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "loaded environment file");
        return Ok(Some(path.clone()));
    }

    let mut candidates = vec![PathBuf::from(".env")];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(Path::new(&home).join(".env"));
    }

    for path in candidates.into_iter().filter(|p| p.is_file()) {
        match dotenvy::from_path(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "loaded environment file");
                return Ok(Some(path));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "found environment file but failed to load it");
            }
        }
    }
    tracing::debug!("no .env file found, relying on exported variables");
    Ok(None)
}

/// Resolve the three required variables through `lookup`.
///
/// Every offending variable is reported, not just the first.
pub fn resolve(
    config: &CredentialsConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, CredentialError> {
    let vars = [
        config.email_var.as_str(),
        config.password_var.as_str(),
        config.api_key_var.as_str(),
    ];
    let values: Vec<Option<String>> = vars.iter().map(|v| lookup(v)).collect();

    let issues: Vec<CredentialIssue> = vars
        .iter()
        .zip(&values)
        .filter_map(|(var, value)| {
            classify(value.as_deref()).map(|problem| CredentialIssue {
                var: var.to_string(),
                problem,
            })
        })
        .collect();
    if !issues.is_empty() {
        return Err(CredentialError::MissingCredential { issues });
    }

    let mut values = values.into_iter().map(Option::unwrap_or_default);
    Ok(Credentials {
        email: values.next().unwrap_or_default(),
        password: values.next().unwrap_or_default(),
        api_key: values.next().unwrap_or_default(),
    })
}

/// Resolve from the process environment.
pub fn from_env(config: &CredentialsConfig) -> Result<Credentials, CredentialError> {
    resolve(config, |var| std::env::var(var).ok())
}

/// `jo***@example.org`, or `joh***` when there is no `@`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let prefix: String = local.chars().take(2).collect();
            format!("{prefix}***@{domain}")
        }
        None => {
            let prefix: String = email.chars().take(3).collect();
            format!("{prefix}***")
        }
    }
}

/// First 8 and last 4 characters, or a fixed placeholder for short keys.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "sk-****".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn mask_password(password: &str) -> String {
    "*".repeat(password.chars().count().min(8))
}

#[derive(Debug)]
pub enum CredentialError {
    /// One or more required variables are absent, empty or templated.
    MissingCredential { issues: Vec<CredentialIssue> },
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::MissingCredential { issues } => {
                let listed: Vec<String> = issues
                    .iter()
                    .map(|i| format!("{} ({})", i.var, i.problem))
                    .collect();
                write!(f, "missing credentials: {}", listed.join(", "))
            }
            CredentialError::EnvFile { path, source } => {
                write!(f, "failed to load {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CredentialError::MissingCredential { .. } => None,
            CredentialError::EnvFile { source, .. } => Some(source),
        }
    }
}
