//! Git subprocess helpers.
//!
//! Queries return `Option` (absence of git or of a repo is not an error for
//! callers probing state); mutations return `Result`. Every invocation has a
//! timeout so a hung credential helper cannot hang the CLI.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::{Result, WorkspaceError};

/// Default timeout for git operations in seconds.
const DEFAULT_GIT_TIMEOUT_SECS: u64 = 30;

/// The configured git timeout.
fn git_timeout() -> Duration {
    std::env::var("SCC_GIT_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS))
}

/// Execute a prepared command, killing it past the timeout.
fn run_with_timeout(mut command: Command, timeout: Duration) -> Option<std::process::Output> {
    let mut child = command
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .ok()?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return child.wait_with_output().ok(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

fn git_output(args: &[&str], cwd: &Path) -> Option<std::process::Output> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(cwd);
    run_with_timeout(cmd, git_timeout())
}

/// Run git for its side effects, surfacing stderr on failure.
pub fn git_run(args: &[&str], cwd: &Path) -> Result<String> {
    let operation = args.first().copied().unwrap_or("git").to_string();
    let output = git_output(args, cwd)
        .ok_or_else(|| WorkspaceError::git(&operation, "git did not start or timed out"))?;
    if !output.status.success() {
        return Err(WorkspaceError::git(
            operation,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// True if git is on the PATH.
pub fn git_available() -> bool {
    let mut cmd = Command::new("git");
    cmd.arg("--version");
    matches!(run_with_timeout(cmd, git_timeout()), Some(o) if o.status.success())
}

/// The current branch name, if `cwd` is inside a repo.
pub fn current_branch(cwd: &Path) -> Option<String> {
    let output = git_output(&["rev-parse", "--abbrev-ref", "HEAD"], cwd)?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// The repository toplevel for `cwd`.
pub fn repo_root(cwd: &Path) -> Option<PathBuf> {
    let output = git_output(&["rev-parse", "--show-toplevel"], cwd)?;
    if output.status.success() {
        Some(PathBuf::from(
            String::from_utf8_lossy(&output.stdout).trim(),
        ))
    } else {
        None
    }
}

/// The current HEAD commit, if any.
pub fn head_commit(cwd: &Path) -> Option<String> {
    let output = git_output(&["rev-parse", "HEAD"], cwd)?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// True if the tree at `cwd` has uncommitted changes (staged, unstaged, or
/// untracked).
pub fn has_uncommitted_changes(cwd: &Path) -> Option<bool> {
    let output = git_output(&["status", "--porcelain"], cwd)?;
    if output.status.success() {
        Some(!output.stdout.is_empty())
    } else {
        None
    }
}

/// True if `branch` exists locally.
pub fn branch_exists(cwd: &Path, branch: &str) -> bool {
    let reference = format!("refs/heads/{branch}");
    matches!(
        git_output(&["show-ref", "--verify", "--quiet", &reference], cwd),
        Some(o) if o.status.success()
    )
}

/// One line of `git worktree list --porcelain` output, assembled.
#[derive(Debug, Clone)]
pub struct WorktreeListEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    pub branch: Option<String>,
}

/// Parse `git worktree list --porcelain`.
pub fn worktree_list(repo: &Path) -> Result<Vec<WorktreeListEntry>> {
    let stdout = git_run(&["worktree", "list", "--porcelain"], repo)?;
    let mut entries = Vec::new();
    let mut current: Option<WorktreeListEntry> = None;
    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeListEntry {
                path: PathBuf::from(path),
                head: None,
                branch: None,
            });
        } else if let Some(head) = line.strip_prefix("HEAD ")
            && let Some(entry) = current.as_mut()
        {
            entry.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ")
            && let Some(entry) = current.as_mut()
        {
            entry.branch = Some(
                branch
                    .strip_prefix("refs/heads/")
                    .unwrap_or(branch)
                    .to_string(),
            );
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        git_run(&["init", "-q", "-b", "main"], dir).unwrap();
        git_run(&["config", "user.email", "test@example.com"], dir).unwrap();
        git_run(&["config", "user.name", "Test"], dir).unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        git_run(&["add", "."], dir).unwrap();
        git_run(&["commit", "-q", "-m", "init"], dir).unwrap();
    }

    #[test]
    fn queries_against_a_real_repo() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        assert_eq!(current_branch(dir.path()).unwrap(), "main");
        assert!(head_commit(dir.path()).is_some());
        assert!(branch_exists(dir.path(), "main"));
        assert!(!branch_exists(dir.path(), "nope"));
        assert_eq!(has_uncommitted_changes(dir.path()), Some(false));

        std::fs::write(dir.path().join("dirty.txt"), "x").unwrap();
        assert_eq!(has_uncommitted_changes(dir.path()), Some(true));

        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(repo_root(dir.path()).unwrap().canonicalize().unwrap(), canonical);
    }

    #[test]
    fn worktree_list_parses_porcelain() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());

        let entries = worktree_list(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
    }
}
