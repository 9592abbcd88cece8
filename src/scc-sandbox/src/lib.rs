//! SCC Sandbox - container lifecycle for agent sessions.
//!
//! The orchestrator runs a detach→symlink→exec sequence:
//! start the container detached, provision credential symlinks onto the
//! persistent volume via a first `exec`, then attach the agent via a second
//! interactive `exec`. The container outlives the agent so credentials
//! survive across launches.

mod error;
mod orchestrator;
mod runtime;
mod spec;

pub use error::{Result, SandboxError};
pub use orchestrator::{LaunchOptions, LaunchResult, Orchestrator};
pub use runtime::ContainerRuntime;
pub use spec::{
    AGENT_DATA_MOUNT, AGENT_DATA_VOLUME, MANAGED_LABEL_KEY, Mount, NetworkPolicy, SandboxHandle,
    SandboxSpec, SandboxStatus, StatusReport, WORKSPACE_MOUNT,
};
