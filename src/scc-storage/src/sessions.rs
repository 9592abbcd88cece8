//! Append-only session log.
//!
//! Sessions are newline-delimited JSON records keyed by `(workspace, branch)`.
//! The log is never rewritten in place: every state change appends a
//! superseding record with the same id, and readers keep the last record per
//! id. Writes serialize through an advisory lock and land via a sidecar
//! rename, so a crashed writer can at worst leave a corrupt *trailing* line,
//! which readers skip.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use scc_common::file_locking::{FileLock, LockOptions, atomic_write};

use crate::error::{Result, StorageError};

/// Lifecycle state of a recorded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The sandbox is (believed to be) running.
    Running,
    /// The session ended and a clean end time was recorded.
    Stopped,
    /// The session ended without a clean end time; `ended_at` is estimated.
    Incomplete,
}

/// One session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub workspace: PathBuf,
    pub branch: String,
    pub team: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub container_handle: Option<String>,
    pub status: SessionStatus,
    /// Expected duration in seconds, from the team's session settings. Used
    /// to estimate `ended_at` for incomplete sessions.
    pub expected_duration_secs: u64,
}

impl SessionRecord {
    /// Create a running session record with a fresh id.
    pub fn start(
        workspace: impl Into<PathBuf>,
        branch: impl Into<String>,
        team: impl Into<String>,
        expected_duration_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace: workspace.into(),
            branch: branch.into(),
            team: team.into(),
            started_at: Utc::now(),
            ended_at: None,
            container_handle: None,
            status: SessionStatus::Running,
            expected_duration_secs,
        }
    }

    /// Record a clean end.
    #[must_use]
    pub fn stopped(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self.status = SessionStatus::Stopped;
        self
    }

    /// Mark incomplete, estimating the end from the expected duration.
    #[must_use]
    pub fn incomplete(mut self) -> Self {
        let estimated = self.started_at
            + ChronoDuration::seconds(self.expected_duration_secs.min(i64::MAX as u64) as i64);
        self.ended_at = Some(estimated);
        self.status = SessionStatus::Incomplete;
        self
    }
}

/// Handle to the on-disk session log.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Open the store at `path`. The file may not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all records, keeping the last record per session id.
    ///
    /// Corrupt lines are skipped; a corrupt trailing line is the expected
    /// residue of a crashed writer and is not an error.
    pub fn load(&self) -> Result<Vec<SessionRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, SessionRecord> = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionRecord>(line) {
                Ok(record) => {
                    if !latest.contains_key(&record.id) {
                        order.push(record.id.clone());
                    }
                    latest.insert(record.id.clone(), record);
                }
                Err(e) => {
                    warn!(path = %self.path.display(), lineno = lineno + 1, error = %e, "skipping corrupt session record");
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }

    /// Append a record. Takes the store lock, rewrites via a sidecar, and
    /// renames over the log so the append is atomic.
    pub fn append(&self, record: &SessionRecord) -> Result<()> {
        let _lock = FileLock::acquire(self.lock_path(), &LockOptions::default())?;

        let mut body = match std::fs::read(&self.path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut line = serde_json::to_vec(record).map_err(|source| StorageError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        line.push(b'\n');
        body.extend_from_slice(&line);
        atomic_write(&self.path, &body)?;
        debug!(id = %record.id, status = ?record.status, "session record appended");
        Ok(())
    }

    /// The most recent record for `(workspace, branch)`, if any.
    pub fn latest_for(&self, workspace: &Path, branch: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.workspace == workspace && r.branch == branch)
            .max_by_key(|r| r.started_at))
    }

    /// Mark running sessions whose container handle is no longer alive as
    /// incomplete. `live_handles` comes from the container runtime; sessions
    /// without a handle never started a container and are marked too.
    ///
    /// Returns the sessions that were transitioned.
    pub fn reconcile(&self, live_handles: &HashSet<String>) -> Result<Vec<SessionRecord>> {
        let mut transitioned = Vec::new();
        for record in self.load()? {
            if record.status != SessionStatus::Running {
                continue;
            }
            let alive = record
                .container_handle
                .as_ref()
                .is_some_and(|h| live_handles.contains(h));
            if !alive {
                let updated = record.incomplete();
                self.append(&updated)?;
                transitioned.push(updated);
            }
        }
        Ok(transitioned)
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::open(dir.path().join("sessions.jsonl"))
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn append_then_supersede_keeps_last_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let record = SessionRecord::start("/work/repo", "scc/fix", "platform", 3600);
        store.append(&record).unwrap();
        store.append(&record.clone().stopped(Utc::now())).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, SessionStatus::Stopped);
        assert!(loaded[0].ended_at.is_some());
    }

    #[test]
    fn corrupt_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let record = SessionRecord::start("/work/repo", "scc/fix", "platform", 3600);
        store.append(&record).unwrap();
        // Simulate a crashed writer.
        let path = dir.path().join("sessions.jsonl");
        let mut body = std::fs::read(&path).unwrap();
        body.extend_from_slice(b"{\"id\": \"trunc");
        std::fs::write(&path, body).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, record.id);
    }

    #[test]
    fn reconcile_marks_dead_sessions_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut with_handle = SessionRecord::start("/work/repo", "scc/fix", "platform", 7200);
        with_handle.container_handle = Some("c0ffee".to_string());
        store.append(&with_handle).unwrap();

        let headless = SessionRecord::start("/work/repo", "scc/other", "platform", 7200);
        store.append(&headless).unwrap();

        // Only the first container is still alive.
        let live: HashSet<String> = ["c0ffee".to_string()].into();
        let transitioned = store.reconcile(&live).unwrap();
        assert_eq!(transitioned.len(), 1);
        assert_eq!(transitioned[0].id, headless.id);
        assert_eq!(transitioned[0].status, SessionStatus::Incomplete);
        assert_eq!(
            transitioned[0].ended_at.unwrap(),
            transitioned[0].started_at + ChronoDuration::seconds(7200)
        );

        let loaded = store.load().unwrap();
        let still_running = loaded.iter().find(|r| r.id == with_handle.id).unwrap();
        assert_eq!(still_running.status, SessionStatus::Running);
    }

    #[test]
    fn latest_for_picks_most_recent_on_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut older = SessionRecord::start("/work/repo", "scc/fix", "platform", 3600);
        older.started_at = Utc::now() - ChronoDuration::hours(2);
        store.append(&older).unwrap();
        let newer = SessionRecord::start("/work/repo", "scc/fix", "platform", 3600);
        store.append(&newer).unwrap();

        let found = store
            .latest_for(Path::new("/work/repo"), "scc/fix")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
        assert!(
            store
                .latest_for(Path::new("/work/other"), "scc/fix")
                .unwrap()
                .is_none()
        );
    }
}
