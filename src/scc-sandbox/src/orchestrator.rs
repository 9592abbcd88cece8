//! The launch orchestrator: detach→symlink→exec.
//!
//! Failure semantics:
//! - The launch lock failing is a user error with no side effects.
//! - A failed container create reports a runtime error; if a container was
//!   created it is deleted.
//! - A failed provisioning exec is non-fatal: the agent still starts.
//! - The agent's exit code becomes the command's exit code.
//!
//! The container keeps running after the agent exits so the credential
//! symlinks on the persistent volume survive into the next launch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use scc_common::file_locking::FileLock;
use scc_config::SafetyNet;
use scc_policy::{image_matches_any, normalize_image};
use scc_storage::{SessionRecord, SessionStore};

use crate::error::{Result, SandboxError};
use crate::runtime::ContainerRuntime;
use crate::spec::{AGENT_DATA_VOLUME, Mount, SandboxHandle, SandboxSpec};

/// In-container path of the read-only safety-net policy.
const SAFETY_NET_MOUNT: &str = "/etc/scc/safety-net.json";

/// Credential provisioning script run via the first exec. Symlinks, never
/// copies: copying would fan the credentials out into each container layer.
const PROVISION_SCRIPT: &str = concat!(
    "mkdir -p /mnt/agent-data/home/.claude",
    " && ln -sfn /mnt/agent-data/home/.claude \"$HOME/.claude\"",
);

/// One launch request.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub spec: SandboxSpec,
    pub workspace_root: PathBuf,
    pub branch: String,
    pub team: String,
    /// From the resolved session settings; estimates the end of sessions
    /// that never record one.
    pub expected_duration_secs: u64,
    pub safety_net: Option<SafetyNet>,
    /// Patterns re-checked after tag normalization.
    pub blocked_base_images: Vec<String>,
    /// The agent binary and arguments run by the attached exec.
    pub agent_command: Vec<String>,
}

/// What a launch produced.
#[derive(Debug)]
pub struct LaunchResult {
    pub exit_code: i32,
    pub session: SessionRecord,
    pub handle: SandboxHandle,
    pub warnings: Vec<String>,
}

/// Drives the container lifecycle for agent sessions.
pub struct Orchestrator {
    runtime: ContainerRuntime,
    sessions: SessionStore,
}

impl Orchestrator {
    pub fn new(runtime: ContainerRuntime, sessions: SessionStore) -> Self {
        Self { runtime, sessions }
    }

    /// The runtime in use.
    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    /// Run the full launch sequence. Blocks until the agent exits.
    pub async fn launch(&self, mut options: LaunchOptions) -> Result<LaunchResult> {
        let mut warnings = Vec::new();

        // 1. Single session per (workspace, branch). No waiting: a held
        // lock means a live session, which is a user decision, not a queue.
        let lock_path = launch_lock_path(&options.workspace_root, &options.branch);
        let _lock = FileLock::try_acquire(&lock_path)?.ok_or_else(|| {
            SandboxError::SessionActive {
                workspace: options.workspace_root.display().to_string(),
                branch: options.branch.clone(),
            }
        })?;

        // 2. Credentials volume.
        self.runtime.ensure_volume(AGENT_DATA_VOLUME).await?;

        // 4. Safety-net policy as a read-only mount. (Step 3, the managed
        // settings write, happens in the start command before launch.)
        if let Some(safety_net) = &options.safety_net {
            let host_path = write_safety_net(safety_net)?;
            options.spec.extra_mounts.push(Mount {
                host: host_path,
                container: SAFETY_NET_MOUNT.to_string(),
                readonly: true,
            });
        }

        // 5. Tag-normalize the image and re-check blocks: `ubuntu` and
        // `ubuntu:latest` must behave identically.
        options.spec.image_ref = normalize_image(&options.spec.image_ref);
        if let Some(pattern) =
            image_matches_any(&options.spec.image_ref, &options.blocked_base_images)
        {
            return Err(SandboxError::ImageBlocked {
                image: options.spec.image_ref.clone(),
                pattern: pattern.to_string(),
            });
        }

        // 6. Detached start. Interrupting here must leave no container
        // behind; the image pull can take minutes and is the natural place
        // for a user to change their mind.
        let handle = tokio::select! {
            result = self.runtime.create_container(
                &options.spec,
                &options.workspace_root,
                &options.branch,
            ) => result?,
            _ = tokio::signal::ctrl_c() => {
                // kill_on_drop reaps the in-flight `run` subprocess.
                return Err(SandboxError::Cancelled);
            }
        };
        info!(container = %handle, image = %options.spec.image_ref, "sandbox started");

        let mut session = SessionRecord::start(
            options.workspace_root.clone(),
            options.branch.clone(),
            options.team.clone(),
            options.expected_duration_secs,
        );
        session.container_handle = Some(handle.as_str().to_string());
        if let Err(e) = self.sessions.append(&session) {
            // Bookkeeping failed before the agent ran: remove the container
            // rather than leak an unrecorded sandbox.
            let _ = self.runtime.remove_container(&handle).await;
            return Err(e.into());
        }

        // 7. Credential symlink provisioning, non-fatal.
        if let Err(e) = self
            .runtime
            .exec(&handle, &["sh", "-c", PROVISION_SCRIPT])
            .await
        {
            warn!(error = %e, "credential provisioning failed; agent may prompt to log in again");
            warnings.push(format!("credential provisioning failed: {e}"));
        }

        // 8. Attach the agent. Its exit code is ours.
        let command: Vec<&str> = options.agent_command.iter().map(String::as_str).collect();
        let exit_code = match self.runtime.exec_interactive(&handle, &command).await {
            Ok(code) => code,
            Err(e) => {
                let stopped = session.clone().incomplete();
                let _ = self.sessions.append(&stopped);
                return Err(e);
            }
        };

        let session = session.stopped(Utc::now());
        self.sessions.append(&session)?;
        debug!(container = %handle, exit_code, "agent exited; sandbox kept for credential persistence");

        Ok(LaunchResult {
            exit_code,
            session,
            handle,
            warnings,
        })
    }

    /// Live managed container ids, for session reconciliation.
    pub async fn live_handles(&self) -> Result<HashSet<String>> {
        Ok(self.runtime.list_managed().await?.into_iter().collect())
    }
}

/// Lock file enforcing the single-session-per-branch invariant.
fn launch_lock_path(workspace: &Path, branch: &str) -> PathBuf {
    let safe_branch: String = branch
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect();
    workspace
        .join(".scc")
        .join("locks")
        .join(format!("launch-{safe_branch}.lock"))
}

/// Write the safety-net policy to a host temp file for the ro bind mount.
fn write_safety_net(safety_net: &SafetyNet) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("scc-safety-net-{}.json", std::process::id()));
    let body = serde_json::to_vec_pretty(safety_net)
        .map_err(|e| SandboxError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scc_config::SafetyNetAction;

    #[test]
    fn lock_path_flattens_branch_separators() {
        let path = launch_lock_path(Path::new("/work/repo"), "scc/fix/login");
        assert_eq!(
            path,
            PathBuf::from("/work/repo/.scc/locks/launch-scc-fix-login.lock")
        );
    }

    #[test]
    fn safety_net_file_is_valid_json() {
        let safety_net = SafetyNet {
            action: SafetyNetAction::Block,
            extra: serde_json::Map::new(),
        };
        let path = write_safety_net(&safety_net).unwrap();
        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["action"], "block");
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn second_launch_on_same_branch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = launch_lock_path(dir.path(), "main");
        let _held = FileLock::try_acquire(&lock_path).unwrap().unwrap();

        // A second acquisition attempt must observe the held lock.
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_none());
    }
}
