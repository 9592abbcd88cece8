//! Container runtime adapter.
//!
//! Wraps docker or podman behind one interface. Every call is a subprocess
//! with a timeout; non-zero exits surface as `SandboxError::Runtime` with
//! the captured stderr.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};
use crate::spec::{
    AGENT_DATA_MOUNT, AGENT_DATA_VOLUME, MANAGED_LABEL_KEY, NetworkPolicy, SandboxHandle,
    SandboxSpec, SandboxStatus, StatusReport,
};

/// Timeout for quick runtime queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for container creation (may pull the image).
const CREATE_TIMEOUT: Duration = Duration::from_secs(600);

/// Minimum supported major versions.
const MIN_DOCKER_MAJOR: u32 = 20;
const MIN_PODMAN_MAJOR: u32 = 3;

/// A detected container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    program: String,
}

impl ContainerRuntime {
    /// Probe for docker, then podman, enforcing a version floor.
    pub async fn detect() -> Result<Self> {
        for (program, minimum) in [("docker", MIN_DOCKER_MAJOR), ("podman", MIN_PODMAN_MAJOR)] {
            let Some(version) = probe_version(program).await else {
                continue;
            };
            let major = version
                .split('.')
                .next()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(0);
            if major < minimum {
                return Err(SandboxError::RuntimeTooOld {
                    program: program.to_string(),
                    version,
                    minimum: format!("{minimum}.0"),
                });
            }
            debug!(program, version, "container runtime detected");
            return Ok(Self {
                program: program.to_string(),
            });
        }
        Err(SandboxError::RuntimeMissing)
    }

    /// Adapter over an explicit program name (tests).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The underlying program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Ensure the named credentials volume exists.
    pub async fn ensure_volume(&self, name: &str) -> Result<()> {
        let exists = self
            .capture(&["volume", "inspect", name], QUERY_TIMEOUT)
            .await
            .is_ok();
        if exists {
            return Ok(());
        }
        self.capture(&["volume", "create", name], QUERY_TIMEOUT)
            .await?;
        debug!(volume = name, "credentials volume created");
        Ok(())
    }

    /// Start a detached container for `spec`, labeled as managed.
    ///
    /// The container runs an idle process so it outlives the agent.
    pub async fn create_container(
        &self,
        spec: &SandboxSpec,
        workspace: &Path,
        branch: &str,
    ) -> Result<SandboxHandle> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--label".into(),
            format!("{MANAGED_LABEL_KEY}=true"),
            "--label".into(),
            format!("scc.workspace={}", workspace.display()),
            "--label".into(),
            format!("scc.branch={branch}"),
            "--volume".into(),
            format!(
                "{}:{}",
                spec.workspace_mount.host.display(),
                spec.workspace_mount.container
            ),
            "--volume".into(),
            format!("{AGENT_DATA_VOLUME}:{AGENT_DATA_MOUNT}"),
            "--workdir".into(),
            spec.working_dir.clone(),
        ];
        for mount in &spec.extra_mounts {
            let mut flag = format!("{}:{}", mount.host.display(), mount.container);
            if mount.readonly {
                // The ro flag is kernel-enforced: the agent cannot edit the
                // safety-net policy from inside the sandbox.
                flag.push_str(":ro");
            }
            args.push("--volume".into());
            args.push(flag);
        }
        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        if let Some(user) = &spec.user_group {
            args.push("--user".into());
            args.push(user.clone());
        }
        if spec.network_policy == NetworkPolicy::Host {
            args.push("--network".into());
            args.push("host".into());
        }
        args.push(spec.image_ref.clone());
        args.extend(["sleep".into(), "infinity".into()]);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.capture(&arg_refs, CREATE_TIMEOUT).await?;
        let id = stdout.trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::runtime(
                &self.program,
                "run",
                "runtime returned no container id",
            ));
        }
        Ok(SandboxHandle(id))
    }

    /// Run a command inside the container, capturing output.
    pub async fn exec(&self, handle: &SandboxHandle, command: &[&str]) -> Result<String> {
        let mut args = vec!["exec", handle.as_str()];
        args.extend_from_slice(command);
        self.capture(&args, QUERY_TIMEOUT).await
    }

    /// Run a command inside the container attached to the user's terminal.
    /// Returns the command's exit code.
    pub async fn exec_interactive(
        &self,
        handle: &SandboxHandle,
        command: &[&str],
    ) -> Result<i32> {
        let mut args = vec!["exec", "--interactive", "--tty", handle.as_str()];
        args.extend_from_slice(command);

        debug!(program = %self.program, ?args, "attaching interactive exec");
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| SandboxError::runtime(&self.program, "exec", e))?;
        Ok(status.code().unwrap_or(1))
    }

    /// Remove a container, forcefully.
    pub async fn remove_container(&self, handle: &SandboxHandle) -> Result<()> {
        self.capture(&["rm", "--force", handle.as_str()], QUERY_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Observe a container's state. A handle the runtime no longer knows
    /// reports `Unknown`.
    pub async fn status(&self, handle: &SandboxHandle) -> StatusReport {
        let result = self
            .capture(
                &["inspect", "--format", "{{.State.Status}}", handle.as_str()],
                QUERY_TIMEOUT,
            )
            .await;
        let status = match result {
            Ok(out) => match out.trim() {
                "created" => SandboxStatus::Created,
                "running" => SandboxStatus::Running,
                "exited" | "dead" | "paused" => SandboxStatus::Stopped,
                _ => SandboxStatus::Unknown,
            },
            Err(_) => SandboxStatus::Unknown,
        };
        StatusReport::now(status)
    }

    /// Ids of live managed containers.
    pub async fn list_managed(&self) -> Result<Vec<String>> {
        let stdout = self
            .capture(
                &[
                    "ps",
                    "--filter",
                    &format!("label={MANAGED_LABEL_KEY}=true"),
                    "--format",
                    "{{.ID}}",
                ],
                QUERY_TIMEOUT,
            )
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Remove all managed containers (and only those).
    pub async fn prune_managed(&self) -> Result<usize> {
        let stdout = self
            .capture(
                &[
                    "ps",
                    "--all",
                    "--filter",
                    &format!("label={MANAGED_LABEL_KEY}=true"),
                    "--format",
                    "{{.ID}}",
                ],
                QUERY_TIMEOUT,
            )
            .await?;
        let ids: Vec<&str> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        for id in &ids {
            if let Err(e) = self.capture(&["rm", "--force", id], QUERY_TIMEOUT).await {
                warn!(container = %id, error = %e, "failed to remove managed container");
            }
        }
        Ok(ids.len())
    }

    async fn capture(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let operation = args.first().copied().unwrap_or("").to_string();
        debug!(program = %self.program, ?args, "runtime call");

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                SandboxError::runtime(
                    &self.program,
                    &operation,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| SandboxError::runtime(&self.program, &operation, e))?;

        if !output.status.success() {
            return Err(SandboxError::runtime(
                &self.program,
                &operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

async fn probe_version(program: &str) -> Option<String> {
    let output = tokio::time::timeout(
        QUERY_TIMEOUT,
        Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // "Docker version 24.0.7, build afdd53b" / "podman version 4.9.3"
    parse_version(&text)
}

fn parse_version(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| {
            token
                .trim_end_matches(',')
                .split('.')
                .next()
                .is_some_and(|major| !major.is_empty() && major.chars().all(|c| c.is_ascii_digit()))
                && token.contains('.')
        })
        .map(|token| token.trim_end_matches(',').to_string())
}
