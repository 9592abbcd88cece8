//! Workspace error types.

use std::path::PathBuf;

use thiserror::Error;

use scc_common::{ErrorKind, SccError};

/// Errors from workspace resolution and worktree management.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// An explicit workspace path does not exist or is not a directory.
    #[error("workspace path {0} does not exist or is not a directory")]
    NotADirectory(PathBuf),

    /// A git subprocess failed.
    #[error("git {operation} failed: {message}")]
    Git { operation: String, message: String },

    /// The worktree has uncommitted work and `--force` was not given.
    #[error("worktree '{0}' has uncommitted changes")]
    WorktreeDirty(String),

    /// No worktree matches the switch query.
    #[error("no worktree matches '{0}'")]
    UnknownWorktree(String),

    /// A worktree with this name already exists.
    #[error("worktree '{0}' already exists")]
    WorktreeExists(String),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    pub fn git(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<WorkspaceError> for SccError {
    fn from(err: WorkspaceError) -> Self {
        let kind = match &err {
            WorkspaceError::Git { .. } => ErrorKind::Tool,
            WorkspaceError::Io(_) => ErrorKind::State,
            _ => ErrorKind::Usage,
        };
        let suggestion = match &err {
            WorkspaceError::WorktreeDirty(_) => {
                Some("commit or stash the changes, or pass --force to discard them".to_string())
            }
            _ => None,
        };
        let mut scc = SccError::new(kind, err.to_string());
        scc.suggestion = suggestion;
        scc
    }
}

/// Result type alias for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;
