mod actions;
mod bridge;
mod config;
mod credentials;
mod guard;
mod ledger;
mod session_dir;
mod signals;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::actions::ActionTable;
use crate::config::AppConfig;
use crate::guard::{GuardKind, TimerGuard};
use crate::ledger::Ledger;
use crate::session_dir::SessionDir;

/// Supervises a browser agent that submits Easy Apply job applications:
/// hands it a task and a fixed action table, records every attempt to a
/// JSON ledger, and writes a final report when the run ends.
#[derive(Parser, Debug)]
#[command(name = "applybot", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "applybot.toml", global = true)]
    config: PathBuf,

    /// Process log file (in addition to stderr)
    #[arg(long, default_value = "applybot.log", global = true)]
    log_file: PathBuf,

    /// Extra logging (action dispatch, timer arming)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a run (the default)
    Run(RunArgs),
    /// Print statistics for a recorded session
    Stats {
        /// Session directory (default: newest under the sessions root)
        session: Option<PathBuf>,
        /// Sessions root (overrides config)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Print the action table the agent is configured with
    Actions,
    /// Write a starter config and .env.template
    Init,
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Task prompt file (overrides config)
    #[arg(short, long)]
    prompt: Option<PathBuf>,

    /// Sessions root (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Validate config and credentials, print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,
}

const ENV_TEMPLATE: &str = "\
# Login credentials (REQUIRED)
LINKEDIN_EMAIL=your_linkedin_email@example.com
LINKEDIN_PASSWORD=your_linkedin_password

# Model API key (REQUIRED)
OPENAI_API_KEY=your_openai_api_key

# Applicant details (optional, override [user] in applybot.toml)
USER_FIRST_NAME=
USER_LAST_NAME=
USER_EMAIL=
USER_PHONE=
USER_PROFILE_URL=
USER_CITY=
USER_STATE=
USER_COUNTRY=
USER_ZIP_CODE=
USER_CURRENT_TITLE=
USER_SALARY_EXPECTATION=
USER_DEGREE=
USER_UNIVERSITY=
USER_GRADUATION_YEAR=
USER_GPA=
";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let result = match cli.command {
        None => cmd_run(&cli.config, RunArgs::default()).await,
        Some(Command::Run(args)) => cmd_run(&cli.config, args).await,
        Some(Command::Stats { session, root }) => cmd_stats(&cli.config, session, root),
        Some(Command::Actions) => cmd_actions(),
        Some(Command::Init) => cmd_init(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            tracing::error!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cli.log_file);
    let (file_layer, file_err) = match file {
        Ok(f) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(f)),
            ),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    if let Some(e) = file_err {
        tracing::warn!(path = %cli.log_file.display(), error = %e, "log file unavailable, logging to stderr only");
    }
}

async fn cmd_run(config_path: &Path, args: RunArgs) -> Result<(), String> {
    let mut config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
    if let Some(prompt) = args.prompt {
        config.agent.prompt_file = prompt;
    }
    if let Some(root) = args.root {
        config.session.root = root;
    }

    credentials::load_env_file(&config.credentials).map_err(|e| e.to_string())?;
    let creds = match credentials::from_env(&config.credentials) {
        Ok(c) => c,
        Err(credentials::CredentialError::MissingCredential { issues }) => {
            for issue in &issues {
                tracing::error!(var = %issue.var, problem = %issue.problem, "required credential unusable");
            }
            return Err(
                "refusing to start: set the variables above in your environment or .env file"
                    .to_string(),
            );
        }
        Err(e) => return Err(e.to_string()),
    };
    tracing::info!(
        email = %credentials::mask_email(&creds.email),
        api_key = %credentials::mask_api_key(&creds.api_key),
        "credentials loaded"
    );

    config
        .user
        .apply_env_overrides(|var| std::env::var(var).ok());

    if !config.agent.prompt_file.is_file() {
        return Err(format!(
            "task prompt file not found: {}",
            config.agent.prompt_file.display()
        ));
    }

    if args.dry_run {
        println!("{}", config.to_toml());
        println!("Dry run: config and credentials valid, not running.");
        return Ok(());
    }

    let session = SessionDir::create(&config.session.root, chrono::Local::now()).map_err(|e| {
        format!(
            "failed to create session directory under {}: {e}",
            config.session.root.display()
        )
    })?;

    let mut table = ActionTable::new(
        Ledger::for_session(&session),
        TimerGuard::new(GuardKind::Intervention, config.timers.intervention_secs),
        TimerGuard::new(GuardKind::Application, config.timers.application_secs),
        Some(creds),
        config.user.clone(),
    );

    let shutdown = async {
        signals::wait_for_shutdown().await;
    };
    let run = bridge::run_session(
        &config.agent,
        &session,
        &config.agent.prompt_file,
        &mut table,
        shutdown,
    )
    .await;

    let summary = table.ledger().stats_summary();
    let stats = summary.statistics;
    println!(
        "Session {}: checked {}, easy apply {}, applied {}, failed {}, skipped {} ({} elapsed)",
        session.root().display(),
        stats.total_jobs_checked,
        stats.easy_apply_found,
        stats.applications_submitted,
        stats.applications_failed,
        stats.jobs_skipped,
        summary.session_duration,
    );
    if let Ok(path) = &run.report {
        println!("Final report: {}", path.display());
    }

    match run.outcome {
        Ok(outcome) if outcome.interrupted => {
            tracing::info!("run stopped by signal");
            Ok(())
        }
        Ok(outcome) => {
            if outcome.exit_code != Some(0) {
                tracing::warn!(exit_code = ?outcome.exit_code, "agent exited abnormally");
            }
            Ok(())
        }
        Err(e) => Err(format!("agent run failed: {e}")),
    }
}

fn cmd_stats(
    config_path: &Path,
    session: Option<PathBuf>,
    root: Option<PathBuf>,
) -> Result<(), String> {
    let session = match session {
        Some(dir) => SessionDir::new(dir),
        None => {
            let config = AppConfig::load(config_path).map_err(|e| e.to_string())?;
            let root = root.unwrap_or(config.session.root);
            session_dir::latest_session(&root)
                .ok_or_else(|| format!("no recorded sessions under {}", root.display()))?
        }
    };

    let state = ledger::load_snapshot(&session.applications_log()).map_err(|e| e.to_string())?;
    let summary = state.summary_at(chrono::Utc::now());
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("Session: {}", session.root().display());
    println!("{json}");
    Ok(())
}

fn cmd_actions() -> Result<(), String> {
    let json = serde_json::to_string_pretty(&actions::describe()).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn cmd_init(config_path: &Path) -> Result<(), String> {
    write_if_missing(config_path, config::DEFAULT_CONFIG)?;
    write_if_missing(Path::new(".env.template"), ENV_TEMPLATE)?;
    println!("Copy .env.template to .env and fill in your details.");
    Ok(())
}

fn write_if_missing(path: &Path, contents: &str) -> Result<(), String> {
    if path.exists() {
        println!("{} already exists, leaving it alone", path.display());
        return Ok(());
    }
    std::fs::write(path, contents).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}
