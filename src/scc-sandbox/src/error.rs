//! Sandbox error types.

use thiserror::Error;

use scc_common::{ErrorKind, SccError};

/// Errors from the container runtime and launch orchestration.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No container runtime on the PATH.
    #[error("no container runtime found (tried docker, podman)")]
    RuntimeMissing,

    /// The runtime exists but is too old.
    #[error("{program} {version} is too old (need {minimum}+)")]
    RuntimeTooOld {
        program: String,
        version: String,
        minimum: String,
    },

    /// A runtime subprocess failed or timed out.
    #[error("{program} {operation} failed: {message}")]
    Runtime {
        program: String,
        operation: String,
        message: String,
    },

    /// Another session already runs on this workspace and branch.
    #[error("a session is already running for {workspace} on branch '{branch}'")]
    SessionActive { workspace: String, branch: String },

    /// The image was refused by org policy.
    #[error("image '{image}' is blocked by org policy (pattern '{pattern}')")]
    ImageBlocked { image: String, pattern: String },

    /// The user interrupted the launch before the agent attached.
    #[error("launch cancelled")]
    Cancelled,

    /// Session bookkeeping failed.
    #[error(transparent)]
    Storage(#[from] scc_storage::StorageError),

    /// Lock handling failed.
    #[error(transparent)]
    Lock(#[from] scc_common::file_locking::FileLockError),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub fn runtime(
        program: impl Into<String>,
        operation: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Runtime {
            program: program.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

impl From<SandboxError> for SccError {
    fn from(err: SandboxError) -> Self {
        let kind = match &err {
            SandboxError::RuntimeMissing | SandboxError::RuntimeTooOld { .. } => {
                ErrorKind::Prerequisite
            }
            SandboxError::Runtime { .. } => ErrorKind::Tool,
            SandboxError::SessionActive { .. } => ErrorKind::Usage,
            SandboxError::ImageBlocked { .. } => ErrorKind::Policy,
            SandboxError::Cancelled => ErrorKind::Cancelled,
            SandboxError::Storage(_) | SandboxError::Io(_) => ErrorKind::State,
            SandboxError::Lock(_) => ErrorKind::Usage,
        };
        let suggestion = match &err {
            SandboxError::RuntimeMissing => {
                Some("install Docker or Podman and ensure it is on your PATH".to_string())
            }
            SandboxError::SessionActive { .. } => {
                Some("finish or stop the running session, or switch to another branch".to_string())
            }
            SandboxError::ImageBlocked { .. } => {
                Some("pick an approved base image, or ask an org admin for a policy exception".to_string())
            }
            _ => None,
        };
        let mut scc = SccError::new(kind, err.to_string());
        scc.suggestion = suggestion;
        scc
    }
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
