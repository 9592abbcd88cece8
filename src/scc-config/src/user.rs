//! User-level configuration (`config.json` in the user config dir).
//!
//! Holds where the org config comes from, the selected team, the auth spec,
//! and small preferences. Co-owned with the user: written only through
//! explicit commands, read at the start of every command.

use std::path::Path;

use serde::{Deserialize, Serialize};

use scc_common::file_locking::atomic_write_json;

use crate::auth::AuthSpec;
use crate::error::{ConfigError, Result};

/// `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// HTTPS URL or local path of the org config.
    #[serde(default)]
    pub org_config_url: Option<String>,
    /// Selected team profile name.
    #[serde(default)]
    pub team: Option<String>,
    /// Auth spec for fetching the org config.
    #[serde(default)]
    pub auth: AuthSpec,
    /// Container image override, if the user pinned one.
    #[serde(default)]
    pub image: Option<String>,
    /// Branch names gated at start.
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
}

fn default_protected_branches() -> Vec<String> {
    ["main", "master", "develop", "production", "staging"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl UserConfig {
    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    protected_branches: default_protected_branches(),
                    ..Self::default()
                });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| ConfigError::parse("user config", e))
    }

    /// Persist atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)?;
        Ok(())
    }

    /// True if `branch` is in the protected set (case-sensitive, exact).
    pub fn is_protected_branch(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = UserConfig::load(&dir.path().join("config.json")).unwrap();
        assert!(config.org_config_url.is_none());
        assert!(config.is_protected_branch("main"));
        assert!(!config.is_protected_branch("scc/fix"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = UserConfig {
            org_config_url: Some("https://config.acme.dev/org.json".to_string()),
            team: Some("platform".to_string()),
            auth: AuthSpec::Env("ORG_TOKEN".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let back = UserConfig::load(&path).unwrap();
        assert_eq!(back.team.as_deref(), Some("platform"));
        assert_eq!(back.auth, AuthSpec::Env("ORG_TOKEN".to_string()));
    }
}
