//! Policy error types.

use thiserror::Error;

use scc_common::{ErrorKind, SccError};

/// Errors from normalization and effective-config computation.
///
/// Normalization errors are fatal to the whole command; they surface with a
/// config exit code because the fix is in configuration, not policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A plugin reference could not be parsed.
    #[error("invalid plugin reference '{reference}': {message}")]
    InvalidRef { reference: String, message: String },

    /// A bare reference could not be resolved to a single marketplace.
    #[error(
        "ambiguous plugin reference '{reference}': specify a marketplace (available: {})",
        available.join(", ")
    )]
    AmbiguousRef {
        reference: String,
        available: Vec<String>,
    },

    /// The referenced marketplace is not configured.
    #[error("plugin '{reference}' names unknown marketplace '{marketplace}'")]
    UnknownMarketplace {
        reference: String,
        marketplace: String,
    },

    /// The implicit marketplace is blocked by org security.
    #[error("plugin '{reference}' uses implicit marketplace '{marketplace}', which is blocked by org policy")]
    ImplicitBlocked {
        reference: String,
        marketplace: String,
    },

    /// The exception store could not be read or written.
    #[error("exception store error: {0}")]
    Store(String),

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<PolicyError> for SccError {
    fn from(err: PolicyError) -> Self {
        let kind = match &err {
            PolicyError::InvalidRef { .. }
            | PolicyError::AmbiguousRef { .. }
            | PolicyError::UnknownMarketplace { .. } => ErrorKind::Config,
            PolicyError::ImplicitBlocked { .. } => ErrorKind::Policy,
            PolicyError::Store(_) | PolicyError::Io(_) => ErrorKind::State,
        };
        let suggestion = match &err {
            PolicyError::AmbiguousRef { available, .. } => Some(format!(
                "write the reference as name@marketplace, e.g. name@{}",
                available.first().map(String::as_str).unwrap_or("internal")
            )),
            PolicyError::ImplicitBlocked { .. } => {
                Some("ask an org admin for a policy-scope exception".to_string())
            }
            _ => None,
        };
        let mut scc = SccError::new(kind, err.to_string());
        scc.suggestion = suggestion;
        scc
    }
}

/// Result type alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
