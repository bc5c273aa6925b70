/// Agent subprocess lifecycle and the line-oriented action bridge.
///
/// The agent is spawned with piped stdio. Any stdout line that parses as
/// `{"action": ..., "args": {...}, "id": ...}` is dispatched to the
/// [`ActionTable`] and answered with one JSON line on the agent's stdin. All
/// output, requests included, is captured to the conversation log.
use crate::actions::{self, ActionResult, ActionTable};
use crate::config::AgentConfig;
use crate::ledger::LedgerError;
use crate::session_dir::SessionDir;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

/// How long the agent gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Result of a completed agent run.
#[derive(Debug)]
pub struct BridgeOutcome {
    /// Process exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    /// Number of action requests answered.
    pub actions_dispatched: u64,
    /// Whether the run was cut short by a shutdown signal.
    pub interrupted: bool,
    pub duration: Duration,
}

/// One request line written by the agent.
#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Serialize)]
struct ActionResponse<'a> {
    id: &'a Value,
    #[serde(flatten)]
    result: &'a ActionResult,
}

/// Where the placeholders in `agent.args` point for this run.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub prompt_file: PathBuf,
    pub session_dir: PathBuf,
    pub actions_file: PathBuf,
    pub screenshots_dir: PathBuf,
    pub transcript: PathBuf,
}

impl AgentPaths {
    pub fn for_session(session: &SessionDir, prompt_file: &Path) -> Self {
        Self {
            prompt_file: prompt_file.to_path_buf(),
            session_dir: session.root().to_path_buf(),
            actions_file: session.actions_file(),
            screenshots_dir: session.screenshots_dir(),
            transcript: session.conversation_log(),
        }
    }
}

/// Substitute `{prompt_file}`, `{session_dir}` and `{actions_file}` in the args.
fn build_args(agent_config: &AgentConfig, paths: &AgentPaths) -> Vec<String> {
    let prompt = paths.prompt_file.to_string_lossy();
    let session = paths.session_dir.to_string_lossy();
    let actions = paths.actions_file.to_string_lossy();
    agent_config
        .args
        .iter()
        .map(|arg| {
            arg.replace("{prompt_file}", &prompt)
                .replace("{session_dir}", &session)
                .replace("{actions_file}", &actions)
        })
        .collect()
}

/// Parse a stdout line as an action request, if it is one.
fn parse_request(line: &str) -> Option<ActionRequest> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// How a session ended: the bridge outcome plus the final report write.
#[derive(Debug)]
pub struct SessionRun {
    pub outcome: Result<BridgeOutcome, BridgeError>,
    pub report: Result<PathBuf, LedgerError>,
}

/// Publish the action table, run the agent, then write the final report.
///
/// The report is written whether the agent exits normally, is stopped by
/// `shutdown`, or the run fails before or after spawn.
pub async fn run_session(
    agent_config: &AgentConfig,
    session: &SessionDir,
    prompt_file: &Path,
    table: &mut ActionTable,
    shutdown: impl Future<Output = ()>,
) -> SessionRun {
    let paths = AgentPaths::for_session(session, prompt_file);
    let outcome = match write_actions_file(&paths.actions_file) {
        Ok(()) => run_agent(agent_config, &paths, table, shutdown).await,
        Err(e) => Err(e),
    };
    let report = table.ledger().finalize();
    match &report {
        Ok(path) => tracing::info!(
            path = %path.display(),
            records = table.ledger().state().applications.len(),
            "final report written"
        ),
        Err(e) => tracing::error!(error = %e, "failed to save final report"),
    }
    SessionRun { outcome, report }
}

fn write_actions_file(path: &Path) -> Result<(), BridgeError> {
    let specs = serde_json::to_string_pretty(&actions::describe())
        .map_err(|e| BridgeError::ActionsFile {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
    std::fs::write(path, specs).map_err(|e| BridgeError::ActionsFile {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Spawn the agent and serve its action requests until it exits or `shutdown`
/// resolves.
///
/// The agent runs in its own process group so a shutdown can signal everything
/// it started. Any error after spawn also signals the group before returning.
pub async fn run_agent(
    agent_config: &AgentConfig,
    paths: &AgentPaths,
    table: &mut ActionTable,
    shutdown: impl Future<Output = ()>,
) -> Result<BridgeOutcome, BridgeError> {
    let mut transcript =
        std::fs::File::create(&paths.transcript).map_err(|e| BridgeError::Transcript {
            path: paths.transcript.clone(),
            source: e,
        })?;

    let args = build_args(agent_config, paths);
    tracing::info!(
        command = %agent_config.command,
        args = ?args,
        transcript = %paths.transcript.display(),
        "spawning agent"
    );

    let start = Instant::now();
    let mut child = Command::new(&agent_config.command)
        .args(&args)
        .env("APPLYBOT_SESSION_DIR", &paths.session_dir)
        .env("APPLYBOT_SCREENSHOTS_DIR", &paths.screenshots_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Spawn { source: e })?;

    let pid = child.id().unwrap_or(0);
    tracing::info!(pid, "agent process started");

    let served = serve(&mut child, pid, &mut transcript, table, shutdown).await;
    if let Err(e) = &served {
        tracing::warn!(pid, error = %e, "bridge failed, terminating agent");
        terminate_group(pid);
    }
    let (status, interrupted, actions_dispatched) = served?;

    let duration = start.elapsed();
    let exit_code = status.code();
    tracing::info!(
        exit_code = ?exit_code,
        actions_dispatched,
        interrupted,
        duration_secs = duration.as_secs(),
        "agent finished"
    );

    Ok(BridgeOutcome {
        exit_code,
        actions_dispatched,
        interrupted,
        duration,
    })
}

enum Event {
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
    Shutdown,
}

/// Pump the child's output until it exits or `shutdown` resolves.
///
/// Returns the exit status, whether the run was interrupted, and how many
/// requests were answered.
async fn serve(
    child: &mut Child,
    pid: u32,
    transcript: &mut std::fs::File,
    table: &mut ActionTable,
    shutdown: impl Future<Output = ()>,
) -> Result<(ExitStatus, bool, u64), BridgeError> {
    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take().ok_or(BridgeError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(BridgeError::MissingPipe("stderr"))?;
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut actions_dispatched = 0u64;
    tokio::pin!(shutdown);

    // Partial reads stay in the buffers across iterations, so a line split by
    // a cancelled read is completed on the next one.
    let status = loop {
        let event = tokio::select! {
            n = stdout.read_until(b'\n', &mut out_buf), if stdout_open => Event::Stdout(n),
            n = stderr.read_until(b'\n', &mut err_buf), if stderr_open => Event::Stderr(n),
            status = child.wait(), if !stdout_open && !stderr_open => Event::Exited(status),
            _ = &mut shutdown => Event::Shutdown,
        };

        match event {
            Event::Stdout(read) => {
                stdout_open = still_open("stdout", &read);
                if let Some(line) = take_line(&mut out_buf) {
                    log_line(transcript, "out", &line);
                    if let Some(request) = parse_request(&line) {
                        let result = table.dispatch_named(&request.action, &request.args);
                        actions_dispatched += 1;
                        if result.is_error() {
                            tracing::warn!(
                                action = %request.action,
                                error = result.error.as_deref().unwrap_or_default(),
                                "action failed"
                            );
                        } else {
                            tracing::info!(action = %request.action, "action served");
                        }
                        respond(&mut stdin, transcript, &request.id, &result).await;
                    }
                }
            }
            Event::Stderr(read) => {
                stderr_open = still_open("stderr", &read);
                if let Some(line) = take_line(&mut err_buf) {
                    log_line(transcript, "err", &line);
                }
            }
            Event::Exited(status) => {
                break status.map_err(|e| BridgeError::Io { source: e })?;
            }
            Event::Shutdown => {
                tracing::warn!(pid, "shutdown requested, terminating agent");
                drop(stdin);
                terminate_group(pid);
                let status = wait_with_grace(child, pid).await?;
                return Ok((status, true, actions_dispatched));
            }
        }

        if !stdout_open && !stderr_open {
            // Closing stdin tells a well-behaved agent there are no more answers.
            stdin = None;
        }
    };

    Ok((status, false, actions_dispatched))
}

/// Whether a stream should keep being read after this result. Read errors
/// close the stream; they never end the run.
fn still_open(stream: &str, read: &std::io::Result<usize>) -> bool {
    match read {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(stream, error = %e, "failed to read agent output, ignoring stream");
            false
        }
    }
}

/// Drain one buffered line, decoding invalid UTF-8 lossily.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    buf.clear();
    Some(line)
}

async fn wait_with_grace(child: &mut Child, pid: u32) -> Result<ExitStatus, BridgeError> {
    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status.map_err(|e| BridgeError::Io { source: e }),
        Err(_) => {
            tracing::warn!(pid, "agent ignored SIGTERM, killing");
            child.kill().await.map_err(|e| BridgeError::Io { source: e })?;
            child.wait().await.map_err(|e| BridgeError::Io { source: e })
        }
    }
}

fn log_line(transcript: &mut std::fs::File, stream: &str, line: &str) {
    if let Err(e) = writeln!(transcript, "[{stream}] {line}") {
        tracing::warn!(error = %e, "failed to write conversation log");
    }
}

/// Write one response line. A closed stdin is logged, not fatal.
async fn respond(
    stdin: &mut Option<ChildStdin>,
    transcript: &mut std::fs::File,
    id: &Value,
    result: &ActionResult,
) {
    let payload = match serde_json::to_string(&ActionResponse { id, result }) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize action result");
            return;
        }
    };
    log_line(transcript, "in", &payload);

    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let written = async {
        pipe.write_all(payload.as_bytes()).await?;
        pipe.write_all(b"\n").await?;
        pipe.flush().await
    }
    .await;
    if let Err(e) = written {
        tracing::warn!(error = %e, "agent stdin closed, dropping further responses");
        *stdin = None;
    }
}

/// SIGTERM the whole process group started for the agent.
fn terminate_group(pid: u32) {
    if pid == 0 {
        return;
    }
    let pgid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "failed to signal agent process group");
    }
}

/// Errors that end an agent run. The ledger is still finalized afterwards.
#[derive(Debug)]
pub enum BridgeError {
    /// Failed to create the conversation log.
    Transcript {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to publish the action table before spawn.
    ActionsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the agent subprocess.
    Spawn { source: std::io::Error },
    MissingPipe(&'static str),
    /// Failed to read from or wait on the child.
    Io { source: std::io::Error },
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Transcript { path, source } => {
                write!(
                    f,
                    "failed to create conversation log {}: {}",
                    path.display(),
                    source
                )
            }
            BridgeError::ActionsFile { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            BridgeError::Spawn { source } => write!(f, "failed to spawn agent: {}", source),
            BridgeError::MissingPipe(name) => write!(f, "agent {name} pipe was not captured"),
            BridgeError::Io { source } => write!(f, "I/O error talking to agent: {}", source),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Transcript { source, .. } => Some(source),
            BridgeError::ActionsFile { source, .. } => Some(source),
            BridgeError::Spawn { source } => Some(source),
            BridgeError::MissingPipe(_) => None,
            BridgeError::Io { source } => Some(source),
        }
    }
}
