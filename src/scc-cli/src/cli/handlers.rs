//! Command dispatch.

use scc_common::SccResult;

use crate::cli::args::{Cli, Commands};
use crate::{config_cmd, exceptions_cmd, sandbox_cmd, sessions_cmd, start_cmd, worktree_cmd};

/// Dispatch the parsed command, returning the process exit code.
pub async fn dispatch_command(cli: Cli) -> SccResult<i32> {
    match cli.command {
        Commands::Start(args) => start_cmd::run(args).await,
        Commands::Worktree(command) => worktree_cmd::run(command),
        Commands::Sessions(command) => sessions_cmd::run(command).await,
        Commands::Config(command) => config_cmd::run(command).await,
        Commands::Exceptions(command) => exceptions_cmd::run(command),
        Commands::Sandbox(command) => sandbox_cmd::run(command).await,
    }
}
