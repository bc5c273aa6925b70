use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Manages the layout of a single run directory.
///
/// Each run gets `<root>/<YYYYmmdd_HHMMSS>/` with `logs/`, `data/` and
/// `screenshots/` beneath it. The ledger writes into `data/`; the agent is
/// pointed at `screenshots/` and its transcript lands in `logs/`.
#[derive(Debug, Clone)]
pub struct SessionDir {
    root: PathBuf,
}

impl SessionDir {
    /// Reference an existing (or not yet created) run directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a fresh run directory under `sessions_root`, named after `now`.
    ///
    /// Two runs started within the same second get a numeric suffix rather
    /// than sharing a directory.
    pub fn create(sessions_root: &Path, now: DateTime<Local>) -> std::io::Result<Self> {
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = sessions_root.join(&stamp);
        let mut n = 1;
        while candidate.exists() {
            candidate = sessions_root.join(format!("{stamp}_{n}"));
            n += 1;
        }
        let dir = Self::new(candidate);
        dir.init()?;
        tracing::info!(path = %dir.root.display(), "session directory created");
        Ok(dir)
    }

    /// The run directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    /// Live snapshot, rewritten after every recorded attempt.
    pub fn applications_log(&self) -> PathBuf {
        self.data_dir().join("applications_log.json")
    }

    /// Written once at shutdown.
    pub fn final_report(&self) -> PathBuf {
        self.data_dir().join("final_report.json")
    }

    /// Action descriptions handed to the agent.
    pub fn actions_file(&self) -> PathBuf {
        self.data_dir().join("actions.json")
    }

    /// Captured agent stdout/stderr.
    pub fn conversation_log(&self) -> PathBuf {
        self.logs_dir().join("conversation.log")
    }

    /// Create the root and its three subdirectories. Idempotent.
    pub fn init(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.screenshots_dir())?;
        Ok(())
    }
}

/// Find the most recent run under `sessions_root` that has a live snapshot.
///
/// Run directories are named by timestamp, so the lexically greatest name is
/// the newest.
pub fn latest_session(sessions_root: &Path) -> Option<SessionDir> {
    let escaped = glob::Pattern::escape(&sessions_root.to_string_lossy());
    let pattern = format!("{escaped}/*/data/applications_log.json");
    let entries = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!(error = %e, pattern = %pattern, "invalid session search pattern");
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|log| Some(log.parent()?.parent()?.to_path_buf()))
        .max()
        .map(SessionDir::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 4, 7, h, m, s).earliest().unwrap()
    }

    #[test]
    fn test_session_dir_paths() {
        let sd = SessionDir::new("runs/20260407_101500");
        assert_eq!(sd.root(), Path::new("runs/20260407_101500"));
        assert_eq!(sd.logs_dir(), PathBuf::from("runs/20260407_101500/logs"));
        assert_eq!(sd.data_dir(), PathBuf::from("runs/20260407_101500/data"));
        assert_eq!(
            sd.screenshots_dir(),
            PathBuf::from("runs/20260407_101500/screenshots")
        );
        assert_eq!(
            sd.applications_log(),
            PathBuf::from("runs/20260407_101500/data/applications_log.json")
        );
        assert_eq!(
            sd.final_report(),
            PathBuf::from("runs/20260407_101500/data/final_report.json")
        );
        assert_eq!(
            sd.conversation_log(),
            PathBuf::from("runs/20260407_101500/logs/conversation.log")
        );
    }

    #[test]
    fn test_create_builds_layout_named_by_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let sd = SessionDir::create(tmp.path(), local(10, 15, 0)).unwrap();

        assert_eq!(sd.root(), tmp.path().join("20260407_101500"));
        assert!(sd.logs_dir().is_dir());
        assert!(sd.data_dir().is_dir());
        assert!(sd.screenshots_dir().is_dir());
    }

    #[test]
    fn test_create_same_second_gets_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        let first = SessionDir::create(tmp.path(), local(9, 0, 0)).unwrap();
        let second = SessionDir::create(tmp.path(), local(9, 0, 0)).unwrap();

        assert_ne!(first.root(), second.root());
        assert_eq!(second.root(), tmp.path().join("20260407_090000_1"));
    }

    #[test]
    fn test_init_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let sd = SessionDir::new(tmp.path().join("run"));
        sd.init().unwrap();
        std::fs::write(sd.applications_log(), "{}").unwrap();
        sd.init().unwrap();
        assert!(sd.applications_log().exists());
    }

    #[test]
    fn test_latest_session_picks_newest_with_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let older = SessionDir::create(tmp.path(), local(8, 0, 0)).unwrap();
        let newer = SessionDir::create(tmp.path(), local(9, 30, 0)).unwrap();
        // Newest run has no snapshot yet, so it is skipped.
        SessionDir::create(tmp.path(), local(11, 0, 0)).unwrap();

        std::fs::write(older.applications_log(), "{}").unwrap();
        std::fs::write(newer.applications_log(), "{}").unwrap();

        let latest = latest_session(tmp.path()).unwrap();
        assert_eq!(latest.root(), newer.root());
    }

    #[test]
    fn test_latest_session_none_when_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(latest_session(tmp.path()).is_none());
    }
}
