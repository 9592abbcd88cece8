//! Repo-local project configuration (`.scc.yaml` at the workspace root).
//!
//! Optional, and only honored when the team grants
//! `delegation.allow_project_overrides`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::model::{McpServer, SessionSettings};

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = ".scc.yaml";

/// `.scc.yaml` contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub additional_plugins: Vec<String>,
    #[serde(default)]
    pub additional_mcp_servers: Vec<McpServer>,
    #[serde(default)]
    pub session: SessionSettings,
}

impl ProjectConfig {
    /// Load from `<workspace>/.scc.yaml`; absent file means no project layer.
    pub fn load(workspace: &Path) -> Result<Option<Self>> {
        let path = workspace.join(PROJECT_CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config: ProjectConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::parse(path.display().to_string(), e))?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn yaml_parses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            concat!(
                "additional_plugins:\n",
                "  - api-tools@internal\n",
                "session:\n",
                "  timeout_hours: 4\n",
            ),
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.additional_plugins, vec!["api-tools@internal"]);
        assert_eq!(config.session.timeout_hours, Some(4));
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "{not yaml").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }
}
