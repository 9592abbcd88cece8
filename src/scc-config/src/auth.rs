//! Auth spec resolution for remote config sources.
//!
//! Grammar on fields that accept `auth`:
//! - `env:VARNAME` reads the environment variable (error if unset)
//! - `command:...` executes the remainder; trimmed stdout is the token
//! - absent means no auth
//!
//! Resolution happens on the host, once per command. Tokens travel in
//! memory and container env only; they are never persisted to disk.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// A parsed auth spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "Option<String>")]
pub enum AuthSpec {
    /// Read the token from this environment variable.
    Env(String),
    /// Run this command; stdout is the token.
    Command(String),
    /// No authentication.
    None,
}

impl Default for AuthSpec {
    fn default() -> Self {
        AuthSpec::None
    }
}

impl AuthSpec {
    /// Parse the textual form.
    pub fn parse(spec: Option<&str>) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(AuthSpec::None);
        };
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(AuthSpec::None);
        }
        if let Some(var) = spec.strip_prefix("env:") {
            if var.trim().is_empty() {
                return Err(ConfigError::Auth("env: spec names no variable".to_string()));
            }
            return Ok(AuthSpec::Env(var.trim().to_string()));
        }
        if let Some(cmd) = spec.strip_prefix("command:") {
            if cmd.trim().is_empty() {
                return Err(ConfigError::Auth(
                    "command: spec names no command".to_string(),
                ));
            }
            return Ok(AuthSpec::Command(cmd.trim().to_string()));
        }
        Err(ConfigError::Auth(format!(
            "unrecognized auth spec '{spec}' (expected env:VAR or command:...)"
        )))
    }

    /// Resolve to a bearer token, or `None` for unauthenticated sources.
    pub fn resolve(&self) -> Result<Option<String>> {
        match self {
            AuthSpec::None => Ok(None),
            AuthSpec::Env(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => Ok(Some(value)),
                _ => Err(ConfigError::Auth(format!(
                    "environment variable ${var} is not set"
                ))),
            },
            AuthSpec::Command(cmdline) => {
                let argv = shlex::split(cmdline).ok_or_else(|| {
                    ConfigError::Auth(format!("cannot parse auth command '{cmdline}'"))
                })?;
                let (program, args) = argv.split_first().ok_or_else(|| {
                    ConfigError::Auth("auth command is empty after parsing".to_string())
                })?;
                debug!(program, "resolving auth token via command");
                let output = Command::new(program).args(args).output().map_err(|e| {
                    ConfigError::Auth(format!("auth command '{program}' failed to start: {e}"))
                })?;
                if !output.status.success() {
                    return Err(ConfigError::Auth(format!(
                        "auth command '{program}' exited with {}",
                        output.status
                    )));
                }
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if token.is_empty() {
                    return Err(ConfigError::Auth(format!(
                        "auth command '{program}' produced no token"
                    )));
                }
                Ok(Some(token))
            }
        }
    }
}

impl TryFrom<Option<String>> for AuthSpec {
    type Error = ConfigError;

    fn try_from(value: Option<String>) -> Result<Self> {
        AuthSpec::parse(value.as_deref())
    }
}

impl From<AuthSpec> for Option<String> {
    fn from(spec: AuthSpec) -> Self {
        match spec {
            AuthSpec::None => None,
            AuthSpec::Env(var) => Some(format!("env:{var}")),
            AuthSpec::Command(cmd) => Some(format!("command:{cmd}")),
        }
    }
}
