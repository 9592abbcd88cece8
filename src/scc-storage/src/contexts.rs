//! Work-context list backing `sessions resume` and the worktree picker.
//!
//! Contexts are a bounded list (50 entries). Display order is pinned entries
//! first, then most recently used. "Resume" picks the most recent context
//! whose workspace still exists; branch divergence is reported, not decided,
//! here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use scc_common::file_locking::atomic_write_json;

use crate::error::Result;

/// Maximum number of contexts retained.
pub const MAX_CONTEXTS: usize = 50;

/// One remembered place of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkContext {
    pub team: String,
    pub repository_root: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    #[serde(default)]
    pub last_session_id: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextsFile {
    #[serde(default)]
    contexts: Vec<WorkContext>,
}

/// Handle to `contexts.json`.
#[derive(Debug, Clone)]
pub struct ContextStore {
    path: PathBuf,
}

impl ContextStore {
    /// Open the store at `path`. The file may not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all contexts. A corrupt file logs a warning and reads empty;
    /// contexts are a cache, not a source of truth.
    pub fn load(&self) -> Result<Vec<WorkContext>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<ContextsFile>(&raw) {
            Ok(file) => Ok(file.contexts),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "contexts file corrupt, starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Insert or refresh the context for `(worktree_path, branch)` and trim
    /// the list to [`MAX_CONTEXTS`], dropping the oldest unpinned entries.
    pub fn touch(&self, context: WorkContext) -> Result<()> {
        let mut contexts = self.load()?;
        contexts.retain(|c| {
            !(c.worktree_path == context.worktree_path && c.branch == context.branch)
        });
        contexts.push(context);

        if contexts.len() > MAX_CONTEXTS {
            contexts.sort_by_key(|c| (!c.pinned, std::cmp::Reverse(c.last_used_at)));
            // Sorted pinned-first/newest-first, overflow falls off the tail.
            contexts.truncate(MAX_CONTEXTS);
        }

        self.save(&contexts)
    }

    /// Pin or unpin the context for `(worktree_path, branch)`.
    pub fn set_pinned(&self, worktree_path: &Path, branch: &str, pinned: bool) -> Result<bool> {
        let mut contexts = self.load()?;
        let mut found = false;
        for context in &mut contexts {
            if context.worktree_path == worktree_path && context.branch == branch {
                context.pinned = pinned;
                found = true;
            }
        }
        if found {
            self.save(&contexts)?;
        }
        Ok(found)
    }

    /// Contexts in display order: pinned first, then most recently used.
    pub fn sorted(&self) -> Result<Vec<WorkContext>> {
        let mut contexts = self.load()?;
        contexts.sort_by_key(|c| (!c.pinned, std::cmp::Reverse(c.last_used_at)));
        Ok(contexts)
    }

    /// The most recent context whose worktree path still exists on disk.
    pub fn resume_candidate(&self) -> Result<Option<WorkContext>> {
        let mut contexts = self.load()?;
        contexts.sort_by_key(|c| std::cmp::Reverse(c.last_used_at));
        Ok(contexts.into_iter().find(|c| c.worktree_path.is_dir()))
    }

    fn save(&self, contexts: &[WorkContext]) -> Result<()> {
        let file = ContextsFile {
            contexts: contexts.to_vec(),
        };
        atomic_write_json(&self.path, &file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn context(branch: &str, age_mins: i64, pinned: bool) -> WorkContext {
        WorkContext {
            team: "platform".to_string(),
            repository_root: PathBuf::from("/work/repo"),
            worktree_path: PathBuf::from(format!("/work/repo/.scc/worktrees/{branch}")),
            branch: branch.to_string(),
            last_session_id: None,
            pinned,
            last_used_at: Utc::now() - ChronoDuration::minutes(age_mins),
        }
    }

    #[test]
    fn sorted_puts_pinned_first_then_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path().join("contexts.json"));

        store.touch(context("old", 120, false)).unwrap();
        store.touch(context("pinned-old", 600, true)).unwrap();
        store.touch(context("fresh", 1, false)).unwrap();

        let sorted = store.sorted().unwrap();
        assert_eq!(sorted[0].branch, "pinned-old");
        assert_eq!(sorted[1].branch, "fresh");
        assert_eq!(sorted[2].branch, "old");
    }

    #[test]
    fn touch_replaces_same_worktree_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path().join("contexts.json"));

        store.touch(context("fix", 60, false)).unwrap();
        store.touch(context("fix", 0, false)).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn list_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path().join("contexts.json"));

        for i in 0..(MAX_CONTEXTS + 5) {
            store
                .touch(context(&format!("branch-{i}"), i as i64, false))
                .unwrap();
        }
        assert_eq!(store.load().unwrap().len(), MAX_CONTEXTS);
    }

    #[test]
    fn resume_picks_existing_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContextStore::open(dir.path().join("contexts.json"));

        let missing = context("gone", 0, false);
        store.touch(missing).unwrap();

        let mut present = context("here", 30, false);
        present.worktree_path = dir.path().to_path_buf();
        store.touch(present).unwrap();

        let candidate = store.resume_candidate().unwrap().unwrap();
        assert_eq!(candidate.branch, "here");
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contexts.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = ContextStore::open(&path);
        assert!(store.load().unwrap().is_empty());
    }
}
