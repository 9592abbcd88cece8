//! The single authoritative workspace resolver.
//!
//! Output depends only on the entry directory, the optional explicit path,
//! and filesystem state. The resolver never prompts: it flags suspicious or
//! slow workspaces and leaves the decision to the caller.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, WorkspaceError};

/// Project marker file recognized next to `.git`.
const PROJECT_MARKER: &str = ".scc.yaml";

/// Where a launch will run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceDecision {
    /// The resolved workspace root.
    pub workspace_root: PathBuf,
    /// Where the user invoked the command.
    pub entry_dir: PathBuf,
    /// The host path mounted into the container. Differs from the
    /// workspace root for worktrees, whose `gitdir:` pointer must stay
    /// resolvable in-container.
    pub mount_root: PathBuf,
    /// Working directory inside the mount.
    pub container_workdir: PathBuf,
    /// True when the root was found by the ancestor search rather than
    /// given explicitly.
    pub is_auto_detected: bool,
    /// Home, filesystem root, or a system directory.
    pub is_suspicious: bool,
    /// On a mount point known to be slow (WSL-style `/mnt/...`).
    pub is_slow: bool,
    pub warnings: Vec<String>,
}

/// Resolve the workspace for `entry_dir`, honoring an explicit path.
pub fn resolve_workspace(entry_dir: &Path, explicit: Option<&Path>) -> Result<WorkspaceDecision> {
    let entry_dir = entry_dir.to_path_buf();

    let (workspace_root, is_auto_detected) = match explicit {
        Some(path) => {
            if !path.is_dir() {
                return Err(WorkspaceError::NotADirectory(path.to_path_buf()));
            }
            (path.canonicalize()?, false)
        }
        None => match search_ancestors(&entry_dir) {
            Some(root) => (root, true),
            None => (entry_dir.clone(), false),
        },
    };

    let mut warnings = Vec::new();

    // Worktrees mount the main repository so the worktree's `gitdir:`
    // pointer resolves inside the container.
    let mount_root = match main_repo_of_worktree(&workspace_root) {
        Some(main) if workspace_root.starts_with(&main) => main,
        Some(main) => {
            warnings.push(format!(
                "worktree {} lives outside its main repository {}; git metadata will not resolve in the sandbox",
                workspace_root.display(),
                main.display()
            ));
            workspace_root.clone()
        }
        None => workspace_root.clone(),
    };

    let container_workdir = workspace_root
        .strip_prefix(&mount_root)
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let is_suspicious = classify_suspicious(&workspace_root);
    if is_suspicious {
        warnings.push(format!(
            "{} looks like a personal or system directory, not a project",
            workspace_root.display()
        ));
    }
    let is_slow = classify_slow(&workspace_root);
    if is_slow {
        warnings.push(format!(
            "{} is on a /mnt filesystem; file operations in the sandbox may be slow",
            workspace_root.display()
        ));
    }

    debug!(
        workspace = %workspace_root.display(),
        mount = %mount_root.display(),
        auto = is_auto_detected,
        "workspace resolved"
    );

    Ok(WorkspaceDecision {
        workspace_root,
        entry_dir,
        mount_root,
        container_workdir,
        is_auto_detected,
        is_suspicious,
        is_slow,
        warnings,
    })
}

/// Walk ancestors looking for a repository root or a project marker. A
/// repository root anywhere wins over a nearer marker.
fn search_ancestors(start: &Path) -> Option<PathBuf> {
    let mut nearest_marker: Option<PathBuf> = None;
    for dir in start.ancestors() {
        if is_repo_root(dir) {
            return Some(dir.to_path_buf());
        }
        if nearest_marker.is_none() && dir.join(PROJECT_MARKER).is_file() {
            nearest_marker = Some(dir.to_path_buf());
        }
    }
    nearest_marker
}

/// `.git` directory, or a `.git` file carrying a `gitdir:` pointer
/// (worktrees and submodules).
fn is_repo_root(dir: &Path) -> bool {
    let dot_git = dir.join(".git");
    if dot_git.is_dir() {
        return true;
    }
    if dot_git.is_file()
        && let Ok(contents) = std::fs::read_to_string(&dot_git)
    {
        return contents.trim_start().starts_with("gitdir:");
    }
    false
}

/// For a worktree root, the main repository root; `None` otherwise.
fn main_repo_of_worktree(root: &Path) -> Option<PathBuf> {
    let dot_git = root.join(".git");
    if !dot_git.is_file() {
        return None;
    }
    let contents = std::fs::read_to_string(&dot_git).ok()?;
    let gitdir = contents.trim_start().strip_prefix("gitdir:")?.trim();
    // `<main>/.git/worktrees/<name>` points back at the main repository.
    let gitdir = Path::new(gitdir);
    let worktrees = gitdir.parent()?; // .../.git/worktrees
    if worktrees.file_name()? != "worktrees" {
        return None;
    }
    let git_dir = worktrees.parent()?; // .../.git
    if git_dir.file_name()? != ".git" {
        return None;
    }
    git_dir.parent().map(Path::to_path_buf)
}

fn classify_suspicious(root: &Path) -> bool {
    if let Some(home) = dirs::home_dir()
        && root == home
    {
        return true;
    }
    if root == Path::new("/") {
        return true;
    }
    const SYSTEM_DIRS: &[&str] = &[
        "/etc", "/usr", "/bin", "/sbin", "/var", "/tmp", "/opt", "/lib", "/boot",
    ];
    if SYSTEM_DIRS.iter().any(|d| root == Path::new(d)) {
        return true;
    }
    #[cfg(windows)]
    {
        let lossy = root.to_string_lossy().to_lowercase();
        if lossy.starts_with("c:\\windows") || lossy == "c:\\" {
            return true;
        }
    }
    false
}

fn classify_slow(root: &Path) -> bool {
    root.starts_with("/mnt")
}
