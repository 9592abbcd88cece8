//! The start command: config resolution → materialization → settings merge
//! → sandbox launch.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, warn};

use scc_common::interaction::InteractionOption;
use scc_common::{InteractionRequest, SccError, SccResult};
use scc_config::{ProjectConfig, RefreshMode};
use scc_marketplace::{Materializer, SettingsMerger, render_fragment};
use scc_policy::{PolicyInput, compute_effective_config, collect_active, ExceptionStore};
use scc_sandbox::{
    ContainerRuntime, LaunchOptions, Mount, Orchestrator, SandboxSpec, WORKSPACE_MOUNT,
};
use scc_storage::{ContextStore, SccPaths, SessionStore, UsageEvent, WorkContext, append_usage};
use scc_workspace::{WorktreeManager, git, resolve_workspace};

use crate::cli::args::StartArgs;
use crate::context::CliContext;
use crate::interact::{AnswerMode, resolve as answer};

/// Fallback image when neither the user config nor --image names one.
const DEFAULT_IMAGE: &str = "scc-sandbox:latest";

/// The agent binary run inside the sandbox.
const AGENT_COMMAND: &str = "claude";

pub async fn run(args: StartArgs) -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let mode = AnswerMode::from_flags(args.yes, args.non_interactive);

    // Workspace resolution, before anything touches the network.
    let entry_dir = std::env::current_dir().map_err(|e| SccError::state(e.to_string()))?;
    let mut decision = resolve_workspace(&entry_dir, args.path.as_deref())?;
    for warning in &decision.warnings {
        eprintln!("warning: {warning}");
    }
    if decision.is_suspicious {
        let request = InteractionRequest::confirm(
            "suspicious-workspace",
            format!(
                "{} does not look like a project directory. Launch anyway?",
                decision.workspace_root.display()
            ),
        )
        .with_default("no");
        if answer(&request, mode)? != "yes" {
            return Err(SccError::usage("refusing to launch in a suspicious directory")
                .with_suggestion("pass an explicit project path: scc start <path>"));
        }
    }

    if !git::git_available() {
        return Err(SccError::prerequisite("git is not installed or not on PATH"));
    }

    // Governance: org config and team profile.
    let (org, _freshness) = ctx.load_org(RefreshMode::Auto).await?;
    let team_name = ctx.team_name(args.team.as_deref())?;
    let team = ctx.resolve_profile(&org, &team_name).await?;

    // Optional worktree preparation.
    if let Some(name) = &args.worktree {
        let repo_root = git::repo_root(&decision.workspace_root)
            .unwrap_or_else(|| decision.workspace_root.clone());
        let manager = WorktreeManager::new(&repo_root);
        let existing = manager
            .list(false)?
            .into_iter()
            .find(|w| w.name == scc_workspace::sanitize_worktree_name(name));
        let info = match existing {
            Some(info) => info,
            None => manager.create(name, None)?,
        };
        decision = resolve_workspace(&entry_dir, Some(&info.path))?;
    }

    // Project overrides come from the final workspace (the worktree, when
    // one is in play).
    let project = ProjectConfig::load(&decision.workspace_root)?;

    // Protected-branch gate, on start rather than on worktree creation.
    let mut branch = git::current_branch(&decision.workspace_root)
        .unwrap_or_else(|| "detached".to_string());
    let mut block_pushes = false;
    if ctx.user.is_protected_branch(&branch) {
        let request = InteractionRequest::select(
            "protected-branch",
            format!("Branch '{branch}' is protected"),
            vec![
                InteractionOption::new("create-branch", "Create a branch for this session"),
                InteractionOption::new("continue-blocked", "Continue with pushes blocked"),
                InteractionOption::new("cancel", "Cancel"),
            ],
        )
        .with_default("create-branch");
        match answer(&request, mode)?.as_str() {
            "create-branch" => {
                let new_branch =
                    format!("scc/session-{}", Utc::now().format("%Y%m%d-%H%M%S"));
                git::git_run(
                    &["checkout", "-b", new_branch.as_str()],
                    &decision.workspace_root,
                )?;
                eprintln!("created branch {new_branch}");
                branch = new_branch;
            }
            "continue-blocked" => block_pushes = true,
            _ => return Err(SccError::cancelled()),
        }
    }

    // Exceptions: policy scope from the org config, local scope from the
    // user and repo stores.
    let user_store = ExceptionStore::open(ctx.paths.user_exceptions_file());
    let repo_store_path = SccPaths::workspace_exceptions_file(&decision.workspace_root);
    let repo_store = repo_store_path
        .is_file()
        .then(|| ExceptionStore::open(repo_store_path));
    let now = Utc::now();
    let exceptions = collect_active(&org.exceptions, &user_store, repo_store.as_ref(), now)?;

    // Effective config.
    let image = args
        .image
        .or_else(|| ctx.user.image.clone())
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let effective = compute_effective_config(PolicyInput {
        org: &org,
        team_name: &team_name,
        team: &team,
        project: project.as_ref(),
        exceptions: &exceptions,
        image: Some(&image),
        now,
    })?;
    if let Some(block) = effective.image_blocked() {
        return Err(SccError::policy(format!(
            "image '{}' is blocked by org policy (pattern '{}', {} layer)",
            block.item, block.pattern, block.layer
        ))
        .with_suggestion("pick an approved base image, or ask an org admin for a policy exception"));
    }
    for denial in &effective.denied {
        eprintln!("denied: {} ({})", denial.item, denial.reason);
    }
    for block in &effective.blocked {
        eprintln!(
            "blocked: {} (pattern '{}', {} layer; plugins are atomic, so blocking the whole plugin is the only lever)",
            block.item, block.pattern, block.layer
        );
    }

    // Materialize the required marketplaces into the project cache.
    let materializer = Materializer::new(&decision.workspace_root)?;
    let report = materializer
        .materialize(&effective.required_marketplaces(), &org, args.fresh)
        .await?;
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    // Marketplaces backing enabled plugins are hard requirements; extras
    // are not.
    let hard: BTreeSet<String> = effective
        .enabled
        .iter()
        .map(|r| r.marketplace().to_lowercase())
        .collect();
    for (name, error) in &report.failures {
        if hard.contains(&name.to_lowercase()) {
            return Err(SccError::config(format!(
                "required marketplace '{name}' failed to materialize: {error}"
            )));
        }
        eprintln!("warning: optional marketplace '{name}' unavailable: {error}");
    }

    // Merge settings non-destructively; managed state tracks our keys.
    let fragment = render_fragment(&effective, &report.entries())?;
    let merger = SettingsMerger::for_workspace(&decision.workspace_root);
    merger.apply(&fragment, &team_name)?;

    // Container runtime, session bookkeeping, launch.
    let runtime = ContainerRuntime::detect().await?;
    let sessions = SessionStore::open(ctx.paths.sessions_log());
    let orchestrator = Orchestrator::new(runtime, sessions.clone());

    // Mark sessions whose container is gone before starting a new one.
    let live = orchestrator.live_handles().await.unwrap_or_default();
    let _ = sessions.reconcile(&live);

    let mut env: BTreeMap<String, String> = BTreeMap::new();
    env.insert("SCC_TEAM".to_string(), team_name.clone());
    env.insert("SCC_SESSION_BRANCH".to_string(), branch.clone());
    if block_pushes {
        env.insert("SCC_BLOCK_PUSH".to_string(), "1".to_string());
    }

    let working_dir = if decision.container_workdir.as_os_str().is_empty() {
        WORKSPACE_MOUNT.to_string()
    } else {
        format!(
            "{WORKSPACE_MOUNT}/{}",
            decision.container_workdir.display()
        )
    };
    let spec = SandboxSpec {
        image_ref: image,
        workspace_mount: Mount {
            host: decision.mount_root.clone(),
            container: WORKSPACE_MOUNT.to_string(),
            readonly: false,
        },
        env,
        working_dir,
        extra_mounts: Vec::new(),
        user_group: None,
        network_policy: Default::default(),
    };

    let expected_duration_secs = u64::from(effective.session.expected_duration_hours) * 3600;
    let options = LaunchOptions {
        spec,
        workspace_root: decision.workspace_root.clone(),
        branch: branch.clone(),
        team: team_name.clone(),
        expected_duration_secs,
        safety_net: org.security.safety_net.clone(),
        blocked_base_images: org.security.blocked_base_images.clone(),
        agent_command: vec![AGENT_COMMAND.to_string()],
    };

    debug!(workspace = %decision.workspace_root.display(), branch = %branch, "launching sandbox");
    let result = orchestrator.launch(options).await?;
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }

    // Remember this place of work and record usage, best-effort.
    let contexts = ContextStore::open(ctx.paths.contexts_file());
    let touch = contexts.touch(WorkContext {
        team: team_name.clone(),
        repository_root: decision.mount_root.clone(),
        worktree_path: decision.workspace_root.clone(),
        branch: branch.clone(),
        last_session_id: Some(result.session.id.clone()),
        pinned: false,
        last_used_at: Utc::now(),
    });
    if let Err(e) = touch {
        warn!(error = %e, "failed to update work contexts");
    }
    append_usage(
        &ctx.paths.usage_log(),
        &UsageEvent::session_started(
            result.session.id.clone(),
            team_name.clone(),
            decision.workspace_root.clone(),
        ),
    );
    if let Some(ended_at) = result.session.ended_at {
        let duration = (ended_at - result.session.started_at).num_seconds().max(0) as u64;
        append_usage(
            &ctx.paths.usage_log(),
            &UsageEvent::session_ended(
                result.session.id.clone(),
                team_name,
                decision.workspace_root.clone(),
                duration,
            ),
        );
    }

    Ok(result.exit_code)
}

/// Re-entry point used by `sessions resume`.
pub async fn run_at(path: PathBuf, team: Option<String>, yes: bool) -> SccResult<i32> {
    run(StartArgs {
        path: Some(path),
        team,
        image: None,
        worktree: None,
        fresh: false,
        yes,
        non_interactive: false,
    })
    .await
}
