//! Storage error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from persistent state access.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Home directory could not be determined.
    #[error("could not determine the user home directory")]
    HomeDirNotFound,

    /// A store file is locked by another command.
    #[error(transparent)]
    Lock(#[from] scc_common::file_locking::FileLockError),

    /// Serialization failure.
    #[error("failed to encode {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for scc_common::SccError {
    fn from(err: StorageError) -> Self {
        let kind = match &err {
            StorageError::Lock(_) => scc_common::ErrorKind::Usage,
            _ => scc_common::ErrorKind::State,
        };
        scc_common::SccError::new(kind, err.to_string())
    }
}

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
