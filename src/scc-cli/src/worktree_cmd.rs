//! Worktree subcommands.

use scc_common::{SccError, SccResult};
use scc_workspace::{SwitchTarget, WorktreeManager, git, resolve_workspace};

use crate::cli::args::WorktreeCommand;
use crate::context::CliContext;

pub fn run(command: WorktreeCommand) -> SccResult<i32> {
    let manager = manager_for_cwd()?;
    match command {
        WorktreeCommand::Create { name, base } => {
            let info = manager.create(&name, base.as_deref())?;
            println!(
                "created {} on branch {} at {}",
                info.name,
                info.branch.as_deref().unwrap_or("?"),
                info.path.display()
            );
        }
        WorktreeCommand::List { status } => {
            let worktrees = manager.list(status)?;
            if worktrees.is_empty() {
                println!("no worktrees (create one with: scc worktree create <name>)");
            }
            for info in worktrees {
                let dirty = match info.dirty {
                    Some(true) => " [dirty]",
                    Some(false) => " [clean]",
                    None => "",
                };
                println!(
                    "{:<24} {}{dirty}  {}",
                    info.name,
                    info.branch.as_deref().unwrap_or("?"),
                    info.path.display()
                );
            }
        }
        WorktreeCommand::Switch { query } => {
            let previous = previous_worktree_name()?;
            let target = manager.resolve_switch(&query, previous.as_deref())?;
            match &target {
                SwitchTarget::Main(path) => println!("{}", path.display()),
                SwitchTarget::Worktree(path) => println!("{}", path.display()),
            }
        }
        WorktreeCommand::Remove { name, force } => {
            manager.remove(&name, force)?;
            println!("removed {name}");
        }
        WorktreeCommand::Prune => {
            let removed = manager.prune()?;
            if removed.is_empty() {
                println!("nothing to prune");
            } else {
                println!("pruned: {}", removed.join(", "));
            }
        }
    }
    Ok(0)
}

fn manager_for_cwd() -> SccResult<WorktreeManager> {
    let entry_dir = std::env::current_dir().map_err(|e| SccError::state(e.to_string()))?;
    let decision = resolve_workspace(&entry_dir, None)?;
    let repo_root = git::repo_root(&decision.workspace_root).ok_or_else(|| {
        SccError::usage(format!(
            "{} is not inside a git repository",
            decision.workspace_root.display()
        ))
    })?;
    Ok(WorktreeManager::new(repo_root))
}

/// The most recently used worktree name from the context store, backing the
/// literal `-` switch target.
fn previous_worktree_name() -> SccResult<Option<String>> {
    let ctx = CliContext::load()?;
    let store = scc_storage::ContextStore::open(ctx.paths.contexts_file());
    let contexts = store.sorted()?;
    Ok(contexts
        .into_iter()
        .filter_map(|c| {
            c.worktree_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .next())
}
