//! Worktree management.
//!
//! Worktrees live under `<repo>/.scc/worktrees/<name>` on branches with a
//! fixed `scc/` prefix, so they never collide with the user's own branch
//! namespace. Switch resolution understands literal `-` (previous), literal
//! `^` (the main worktree), exact names, and fuzzy matches.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use scc_common::fuzzy::fuzzy_filter;

use crate::error::{Result, WorkspaceError};
use crate::git;

/// Branch prefix enforced for all worktree branches.
pub const WORKTREE_BRANCH_PREFIX: &str = "scc/";

/// Directory under the repo root holding worktrees.
const WORKTREES_DIR: &str = ".scc/worktrees";

/// Sanitize a user-supplied worktree name: path separators and whitespace
/// become hyphens, runs collapse, edges trim. Idempotent.
pub fn sanitize_worktree_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_hyphen = false;
    for c in name.trim().chars() {
        let mapped = if c == '/' || c == '\\' || c.is_whitespace() {
            '-'
        } else {
            c
        };
        if mapped == '-' {
            if !last_was_hyphen {
                out.push('-');
            }
            last_was_hyphen = true;
        } else {
            out.push(mapped);
            last_was_hyphen = false;
        }
    }
    out.trim_matches('-').to_string()
}

/// One worktree as listed.
#[derive(Debug, Clone, Serialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: PathBuf,
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    /// Populated when the listing was asked to include status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
}

/// Result of switch resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchTarget {
    /// The main worktree (the repository root).
    Main(PathBuf),
    /// A managed worktree.
    Worktree(PathBuf),
}

impl SwitchTarget {
    /// The path to change into.
    pub fn path(&self) -> &Path {
        match self {
            SwitchTarget::Main(p) | SwitchTarget::Worktree(p) => p,
        }
    }
}

/// Manages worktrees of one repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_root: PathBuf,
}

impl WorktreeManager {
    /// Manager for the repository at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// The directory new worktrees are created under.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.repo_root.join(WORKTREES_DIR)
    }

    /// Create a worktree named `name` (sanitized) on branch
    /// `scc/<name>`, optionally starting from `base`.
    pub fn create(&self, name: &str, base: Option<&str>) -> Result<WorktreeInfo> {
        let name = sanitize_worktree_name(name);
        if name.is_empty() {
            return Err(WorkspaceError::git("worktree add", "empty worktree name"));
        }
        let path = self.worktrees_dir().join(&name);
        if path.exists() {
            return Err(WorkspaceError::WorktreeExists(name));
        }
        std::fs::create_dir_all(self.worktrees_dir())?;

        let branch = format!("{WORKTREE_BRANCH_PREFIX}{name}");
        let path_str = path.display().to_string();

        if git::branch_exists(&self.repo_root, &branch) {
            // Re-attach the existing branch instead of failing.
            git::git_run(
                &["worktree", "add", path_str.as_str(), branch.as_str()],
                &self.repo_root,
            )?;
        } else {
            let mut args = vec!["worktree", "add", "-b", branch.as_str(), path_str.as_str()];
            if let Some(base) = base {
                args.push(base);
            }
            git::git_run(&args, &self.repo_root)?;
        }
        info!(worktree = %name, branch = %branch, "worktree created");

        Ok(WorktreeInfo {
            name,
            path,
            branch: Some(branch),
            head: None,
            dirty: None,
        })
    }

    /// List managed worktrees, optionally with a dirty flag per tree.
    pub fn list(&self, with_status: bool) -> Result<Vec<WorktreeInfo>> {
        let worktrees_dir = self.worktrees_dir();
        let mut infos = Vec::new();
        for entry in git::worktree_list(&self.repo_root)? {
            if !entry.path.starts_with(&worktrees_dir) {
                continue;
            }
            let name = entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dirty = if with_status {
                git::has_uncommitted_changes(&entry.path)
            } else {
                None
            };
            infos.push(WorktreeInfo {
                name,
                path: entry.path,
                branch: entry.branch,
                head: entry.head,
                dirty,
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Resolve a switch query. `previous` is the caller's last-used
    /// worktree name (from the context store), backing the literal `-`.
    pub fn resolve_switch(&self, query: &str, previous: Option<&str>) -> Result<SwitchTarget> {
        if query == "^" {
            return Ok(SwitchTarget::Main(self.repo_root.clone()));
        }
        let query = if query == "-" {
            previous.ok_or_else(|| WorkspaceError::UnknownWorktree("-".to_string()))?
        } else {
            query
        };

        let worktrees = self.list(false)?;
        if let Some(exact) = worktrees.iter().find(|w| w.name == query) {
            return Ok(SwitchTarget::Worktree(exact.path.clone()));
        }
        let scored = fuzzy_filter(&worktrees, query, |w| &w.name);
        match scored.first() {
            Some((index, score)) if *score > 0 => {
                debug!(query, matched = %worktrees[*index].name, score, "fuzzy switch match");
                Ok(SwitchTarget::Worktree(worktrees[*index].path.clone()))
            }
            _ => Err(WorkspaceError::UnknownWorktree(query.to_string())),
        }
    }

    /// Remove a worktree. Uncommitted work requires `force`.
    pub fn remove(&self, name: &str, force: bool) -> Result<()> {
        let name = sanitize_worktree_name(name);
        let path = self.worktrees_dir().join(&name);
        if !path.exists() {
            return Err(WorkspaceError::UnknownWorktree(name));
        }
        if !force && git::has_uncommitted_changes(&path).unwrap_or(true) {
            return Err(WorkspaceError::WorktreeDirty(name));
        }

        let path_str = path.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str.as_str());
        git::git_run(&args, &self.repo_root)?;
        info!(worktree = %name, "worktree removed");
        Ok(())
    }

    /// Drop stale state: directories git no longer tracks and registrations
    /// whose directory is gone.
    pub fn prune(&self) -> Result<Vec<String>> {
        git::git_run(&["worktree", "prune"], &self.repo_root)?;

        let mut removed = Vec::new();
        let tracked: Vec<PathBuf> = git::worktree_list(&self.repo_root)?
            .into_iter()
            .map(|e| e.path)
            .collect();
        let worktrees_dir = self.worktrees_dir();
        let entries = match std::fs::read_dir(&worktrees_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && !tracked.iter().any(|t| t == &path) {
                std::fs::remove_dir_all(&path)?;
                removed.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        git::git_run(&["init", "-q", "-b", "main"], &root).unwrap();
        git::git_run(&["config", "user.email", "test@example.com"], &root).unwrap();
        git::git_run(&["config", "user.name", "Test"], &root).unwrap();
        std::fs::write(root.join("README.md"), "hello\n").unwrap();
        git::git_run(&["add", "."], &root).unwrap();
        git::git_run(&["commit", "-q", "-m", "init"], &root).unwrap();
        (dir, root)
    }

    #[test]
    fn sanitization_is_idempotent() {
        assert_eq!(sanitize_worktree_name("fix/login bug"), "fix-login-bug");
        assert_eq!(sanitize_worktree_name("fix-login-bug"), "fix-login-bug");
        assert_eq!(
            sanitize_worktree_name(sanitize_worktree_name("a//b  c\\d").as_str()),
            "a-b-c-d"
        );
        assert_eq!(sanitize_worktree_name("  --edge--  "), "edge");
    }

    #[test]
    fn create_list_switch_remove_cycle() {
        if !git::git_available() {
            return;
        }
        let (_guard, root) = init_repo();
        let manager = WorktreeManager::new(&root);

        let info = manager.create("fix/login", None).unwrap();
        assert_eq!(info.name, "fix-login");
        assert_eq!(info.branch.as_deref(), Some("scc/fix-login"));
        assert!(info.path.is_dir());

        let listed = manager.list(true).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "fix-login");
        assert_eq!(listed[0].dirty, Some(false));

        // Exact, fuzzy, main, and previous resolution.
        let target = manager.resolve_switch("fix-login", None).unwrap();
        assert_eq!(target.path(), info.path.as_path());
        let target = manager.resolve_switch("login", None).unwrap();
        assert_eq!(target.path(), info.path.as_path());
        let target = manager.resolve_switch("^", None).unwrap();
        assert_eq!(target.path(), root.as_path());
        let target = manager.resolve_switch("-", Some("fix-login")).unwrap();
        assert_eq!(target.path(), info.path.as_path());
        assert!(manager.resolve_switch("-", None).is_err());
        assert!(manager.resolve_switch("zzz", None).is_err());

        manager.remove("fix-login", false).unwrap();
        assert!(manager.list(false).unwrap().is_empty());
    }

    #[test]
    fn dirty_worktree_needs_force() {
        if !git::git_available() {
            return;
        }
        let (_guard, root) = init_repo();
        let manager = WorktreeManager::new(&root);

        let info = manager.create("experiment", None).unwrap();
        std::fs::write(info.path.join("scratch.txt"), "wip").unwrap();

        assert!(matches!(
            manager.remove("experiment", false),
            Err(WorkspaceError::WorktreeDirty(_))
        ));
        manager.remove("experiment", true).unwrap();
    }

    #[test]
    fn duplicate_create_is_refused() {
        if !git::git_available() {
            return;
        }
        let (_guard, root) = init_repo();
        let manager = WorktreeManager::new(&root);
        manager.create("dup", None).unwrap();
        assert!(matches!(
            manager.create("dup", None),
            Err(WorkspaceError::WorktreeExists(_))
        ));
    }

    #[test]
    fn prune_drops_untracked_directories() {
        if !git::git_available() {
            return;
        }
        let (_guard, root) = init_repo();
        let manager = WorktreeManager::new(&root);
        manager.create("real", None).unwrap();

        let stale = manager.worktrees_dir().join("stale");
        std::fs::create_dir_all(&stale).unwrap();

        let removed = manager.prune().unwrap();
        assert_eq!(removed, vec!["stale"]);
        assert!(!stale.exists());
        assert!(manager.worktrees_dir().join("real").exists());
    }
}
