//! Error taxonomy shared by all SCC crates.
//!
//! Every error in SCC maps to one of the kinds below, each with a stable
//! exit code. Crate-local error enums convert into [`SccError`] at the CLI
//! boundary; the core only ever surfaces errors upward.

use thiserror::Error;

/// Machine-readable error kind with a stable exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed arguments or missing required values.
    Usage,
    /// Container runtime or git absent or too old.
    Prerequisite,
    /// Unparseable config, HTTPS required, invalid auth spec, schema violation.
    Config,
    /// Blocked by org policy with no applicable exception.
    Policy,
    /// An addition was not delegated.
    Delegation,
    /// External subprocess returned non-zero or timed out.
    Tool,
    /// Remote fetch failed with no usable fallback.
    Network,
    /// Invariant violation that should not occur in a correct deployment.
    State,
    /// The user interrupted the command.
    Cancelled,
}

impl ErrorKind {
    /// The process exit code for this kind. Part of the CLI contract.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Usage => 2,
            ErrorKind::Prerequisite | ErrorKind::Config | ErrorKind::Network => 3,
            ErrorKind::Policy | ErrorKind::Delegation => 6,
            ErrorKind::Tool => 4,
            ErrorKind::State => 5,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Usage => "usage",
            ErrorKind::Prerequisite => "prerequisite",
            ErrorKind::Config => "config",
            ErrorKind::Policy => "policy",
            ErrorKind::Delegation => "delegation",
            ErrorKind::Tool => "tool",
            ErrorKind::Network => "network",
            ErrorKind::State => "state",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Top-level SCC error: a kind, a human message, and an optional
/// suggested action rendered below the message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SccError {
    /// Machine-readable kind (determines the exit code).
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Suggested action, if there is a concrete one.
    pub suggestion: Option<String>,
}

impl SccError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Attach a suggested action.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Malformed arguments or missing required values.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    /// Missing or outdated external prerequisite.
    pub fn prerequisite(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Prerequisite, message)
    }

    /// Configuration problem.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Blocked by org policy.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, message)
    }

    /// Missing delegation.
    pub fn delegation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Delegation, message)
    }

    /// External tool failure.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tool, message)
    }

    /// Network failure without fallback.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Internal invariant violation.
    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, message)
    }

    /// User cancellation.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by user")
    }

    /// The process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

/// Result alias for operations that surface [`SccError`] directly.
pub type SccResult<T> = Result<T, SccError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ErrorKind::Usage.exit_code(), 2);
        assert_eq!(ErrorKind::Prerequisite.exit_code(), 3);
        assert_eq!(ErrorKind::Config.exit_code(), 3);
        assert_eq!(ErrorKind::Policy.exit_code(), 6);
        assert_eq!(ErrorKind::Delegation.exit_code(), 6);
        assert_eq!(ErrorKind::Tool.exit_code(), 4);
        assert_eq!(ErrorKind::Network.exit_code(), 3);
        assert_eq!(ErrorKind::State.exit_code(), 5);
        assert_eq!(ErrorKind::Cancelled.exit_code(), 130);
    }

    #[test]
    fn suggestion_is_attached() {
        let err = SccError::usage("branch is protected").with_suggestion("pass --yes");
        assert_eq!(err.kind, ErrorKind::Usage);
        assert_eq!(err.suggestion.as_deref(), Some("pass --yes"));
        assert_eq!(err.to_string(), "branch is protected");
    }
}
