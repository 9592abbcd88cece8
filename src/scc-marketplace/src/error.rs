//! Marketplace error types.

use thiserror::Error;

use scc_common::{ErrorKind, SccError};

/// Errors from materialization and settings management.
#[derive(Debug, Error)]
pub enum MarketplaceError {
    /// Marketplace is not declared in the org config.
    #[error("marketplace '{0}' is not declared in the org config")]
    Unknown(String),

    /// The fetched tree has no valid marketplace manifest.
    #[error("marketplace '{name}' has an invalid layout: {message}")]
    InvalidLayout { name: String, message: String },

    /// A remote fetch failed.
    #[error("failed to fetch marketplace '{name}': {message}")]
    Fetch { name: String, message: String },

    /// git clone or related subprocess failed.
    #[error("git operation failed for marketplace '{name}': {message}")]
    Git { name: String, message: String },

    /// Tarball extraction refused the archive.
    #[error("unsafe archive for marketplace '{name}': {message}")]
    UnsafeArchive { name: String, message: String },

    /// Settings or managed-state files could not be processed.
    #[error("settings error: {0}")]
    Settings(String),

    /// The cache lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] scc_common::file_locking::FileLockError),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MarketplaceError {
    pub fn fetch(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_layout(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidLayout {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn git(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Git {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl From<MarketplaceError> for SccError {
    fn from(err: MarketplaceError) -> Self {
        let kind = match &err {
            MarketplaceError::Unknown(_) | MarketplaceError::InvalidLayout { .. } => {
                ErrorKind::Config
            }
            MarketplaceError::Fetch { .. } => ErrorKind::Network,
            MarketplaceError::Git { .. } => ErrorKind::Tool,
            MarketplaceError::UnsafeArchive { .. } => ErrorKind::Policy,
            MarketplaceError::Settings(_) => ErrorKind::State,
            MarketplaceError::Lock(_) => ErrorKind::Usage,
            MarketplaceError::Io(_) => ErrorKind::State,
        };
        SccError::new(kind, err.to_string())
    }
}

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketplaceError>;
