//! Session subcommands.

use scc_common::{SccError, SccResult};
use scc_sandbox::{ContainerRuntime, SandboxHandle};
use scc_storage::{ContextStore, SessionStatus, SessionStore};
use scc_workspace::git;

use crate::cli::args::SessionsCommand;
use crate::context::CliContext;

pub async fn run(command: SessionsCommand) -> SccResult<i32> {
    match command {
        SessionsCommand::List => list().await,
        SessionsCommand::Resume { yes } => resume(yes).await,
    }
}

async fn list() -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let store = SessionStore::open(ctx.paths.sessions_log());
    let mut sessions = store.load()?;
    sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));

    if sessions.is_empty() {
        println!("no recorded sessions");
        return Ok(0);
    }

    // Best-effort container status; listing works without a runtime.
    let runtime = ContainerRuntime::detect().await.ok();

    for session in sessions.iter().take(20) {
        let ended = session
            .ended_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut container = String::new();
        if session.status == SessionStatus::Running
            && let (Some(runtime), Some(handle)) = (&runtime, &session.container_handle)
        {
            let report = runtime
                .status(&SandboxHandle(handle.clone()))
                .await;
            container = format!("  container {:?}", report.status);
        }
        println!(
            "{}  {:?}  {}  {}  started {}  ended {}{container}",
            &session.id[..8.min(session.id.len())],
            session.status,
            session.branch,
            session.workspace.display(),
            session.started_at.format("%Y-%m-%d %H:%M"),
            ended,
        );
    }
    Ok(0)
}

async fn resume(yes: bool) -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let store = ContextStore::open(ctx.paths.contexts_file());
    let Some(context) = store.resume_candidate()? else {
        return Err(SccError::usage("no resumable work context")
            .with_suggestion("start a session first: scc start"));
    };

    println!(
        "resuming in {} (team {}, branch {})",
        context.worktree_path.display(),
        context.team,
        context.branch
    );
    // The branch may have moved since; the launch pipeline re-runs its own
    // protected-branch and policy checks, so only report the divergence.
    if let Some(current) = git::current_branch(&context.worktree_path)
        && current != context.branch
    {
        eprintln!(
            "note: workspace is now on branch '{current}' (was '{}')",
            context.branch
        );
    }

    crate::start_cmd::run_at(context.worktree_path, Some(context.team), yes).await
}
