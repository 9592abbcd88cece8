//! Sandbox specification types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label key stamped on every container we create, so prune operations act
/// only on managed containers.
pub const MANAGED_LABEL_KEY: &str = "scc.managed";

/// Fixed in-container mount point for the workspace.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Named persistent volume holding agent credentials.
pub const AGENT_DATA_VOLUME: &str = "agent-data";

/// Fixed in-container mount point for the credentials volume.
pub const AGENT_DATA_MOUNT: &str = "/mnt/agent-data";

/// A bind mount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Container network policy. Traffic is not restricted; this only selects
/// the runtime network mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// Runtime default (bridge).
    #[default]
    Default,
    /// Share the host network namespace.
    Host,
}

/// Everything needed to create the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Image reference, always tagged by the time it reaches the runtime.
    pub image_ref: String,
    /// Workspace bind mount (the mount root, not necessarily the workspace
    /// root, for worktrees).
    pub workspace_mount: Mount,
    pub env: BTreeMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: String,
    #[serde(default)]
    pub extra_mounts: Vec<Mount>,
    #[serde(default)]
    pub user_group: Option<String>,
    #[serde(default)]
    pub network_policy: NetworkPolicy,
}

/// Opaque identifier of a running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl SandboxHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Created,
    Running,
    Stopped,
    /// A handle exists but the runtime reports no matching container.
    Unknown,
}

/// A status observation with its timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: SandboxStatus,
    pub observed_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn now(status: SandboxStatus) -> Self {
        Self {
            status,
            observed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_short_form_truncates() {
        let handle = SandboxHandle("0123456789abcdef0123".to_string());
        assert_eq!(handle.short(), "0123456789ab");
        let tiny = SandboxHandle("abc".to_string());
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn spec_serializes() {
        let spec = SandboxSpec {
            image_ref: "registry.acme.dev/agent:1.2".to_string(),
            workspace_mount: Mount {
                host: PathBuf::from("/home/dev/repo"),
                container: WORKSPACE_MOUNT.to_string(),
                readonly: false,
            },
            env: BTreeMap::new(),
            working_dir: WORKSPACE_MOUNT.to_string(),
            extra_mounts: vec![],
            user_group: None,
            network_policy: NetworkPolicy::Default,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["image_ref"], "registry.acme.dev/agent:1.2");
        assert_eq!(json["network_policy"], "default");
    }
}
