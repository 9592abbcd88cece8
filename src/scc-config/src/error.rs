//! Configuration error types.

use thiserror::Error;

use scc_common::{ErrorKind, SccError};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config body could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// The config parsed but violates the schema.
    #[error("invalid configuration: {0}")]
    Schema(String),

    /// A remote source is not HTTPS.
    #[error("refusing to load org config from non-HTTPS source: {0}")]
    HttpsRequired(String),

    /// An auth spec could not be parsed or resolved.
    #[error("auth spec error: {0}")]
    Auth(String),

    /// The remote rejected our credentials.
    #[error("access denied fetching {url} (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    /// The remote config does not exist.
    #[error("org config not found at {0} (HTTP 404)")]
    NotFound(String),

    /// A remote fetch failed and no cached copy exists.
    #[error("failed to fetch {url}: {message}")]
    Network { url: String, message: String },

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn parse(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

impl From<ConfigError> for SccError {
    fn from(err: ConfigError) -> Self {
        let kind = match &err {
            ConfigError::Network { .. } => ErrorKind::Network,
            _ => ErrorKind::Config,
        };
        let suggestion = match &err {
            ConfigError::Unauthorized { .. } => {
                Some("check the auth spec in your scc config (env:VAR or command:...)".to_string())
            }
            ConfigError::HttpsRequired(_) => {
                Some("org configs must be served over HTTPS; use a directory/file source for local testing".to_string())
            }
            ConfigError::Network { .. } => {
                Some("check connectivity, or retry once the config server is reachable".to_string())
            }
            _ => None,
        };
        let mut scc = SccError::new(kind, err.to_string());
        scc.suggestion = suggestion;
        scc
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
