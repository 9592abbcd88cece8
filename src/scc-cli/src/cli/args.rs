//! Command-line argument structures.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Color output mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorMode {
    /// Detect whether output is a terminal.
    #[default]
    Auto,
    /// Always emit colors.
    Always,
    /// Never emit colors.
    Never,
}

/// Launch an AI coding agent in a per-workspace container sandbox governed
/// by your organization's policy.
#[derive(Debug, Parser)]
#[command(name = "scc", version, about, max_term_width = 100)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug-level logs.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Show trace-level logs.
    #[arg(long, global = true)]
    pub trace: bool,

    /// Color output mode.
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorMode,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start an agent session in a sandboxed workspace.
    Start(StartArgs),
    /// Manage auxiliary worktrees.
    #[command(subcommand)]
    Worktree(WorktreeCommand),
    /// List and resume recorded sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Inspect and update the effective configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Manage local policy exceptions.
    #[command(subcommand)]
    Exceptions(ExceptionsCommand),
    /// Inspect and clean up managed sandbox containers.
    #[command(subcommand)]
    Sandbox(SandboxCommand),
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Workspace path (default: resolved from the current directory).
    pub path: Option<PathBuf>,

    /// Team profile to use (default: from user config).
    #[arg(long)]
    pub team: Option<String>,

    /// Container image override.
    #[arg(long)]
    pub image: Option<String>,

    /// Create or reuse a worktree with this name and run there.
    #[arg(long)]
    pub worktree: Option<String>,

    /// Refetch marketplaces even if the cache is fresh.
    #[arg(long)]
    pub fresh: bool,

    /// Answer every confirmation with its default.
    #[arg(long)]
    pub yes: bool,

    /// Fail instead of prompting.
    #[arg(long)]
    pub non_interactive: bool,
}

#[derive(Debug, Subcommand)]
pub enum WorktreeCommand {
    /// Create a worktree (branch prefix enforced).
    Create {
        name: String,
        /// Base ref for the new branch.
        #[arg(long)]
        base: Option<String>,
    },
    /// List worktrees.
    List {
        /// Include git status per worktree.
        #[arg(long)]
        status: bool,
    },
    /// Resolve a worktree by name, fuzzy match, `-` (previous) or `^` (main).
    Switch { query: String },
    /// Remove a worktree.
    Remove {
        name: String,
        /// Discard uncommitted work.
        #[arg(long)]
        force: bool,
    },
    /// Drop stale worktree state.
    Prune,
}

#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List recorded sessions for this workspace.
    List,
    /// Start a session in the most recent usable work context.
    Resume {
        /// Answer every confirmation with its default.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the loaded org config and selected team.
    Show,
    /// Refetch the org config ignoring the cache TTL.
    Update,
    /// Explain the effective config: decisions, blocks, denials.
    Explain {
        /// Team to explain (default: from user config).
        #[arg(long)]
        team: Option<String>,
    },
    /// Point scc at an org config URL or file.
    SetUrl { url: String },
    /// Select the team profile.
    SetTeam { team: String },
}

#[derive(Debug, Subcommand)]
pub enum SandboxCommand {
    /// List live managed containers.
    List,
    /// Remove all managed containers. Never touches unmanaged workloads.
    Prune,
}

#[derive(Debug, Subcommand)]
pub enum ExceptionsCommand {
    /// List local exceptions.
    List,
    /// Add a local exception (delegation denials only).
    Add {
        /// Exception id.
        id: String,
        /// Plugin patterns to allow.
        #[arg(long = "plugin")]
        plugins: Vec<String>,
        /// MCP server patterns to allow.
        #[arg(long = "mcp-server")]
        mcp_servers: Vec<String>,
        /// Base image patterns to allow.
        #[arg(long = "image")]
        base_images: Vec<String>,
        /// Hours until expiry.
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Why this exception exists.
        #[arg(long)]
        reason: String,
    },
    /// Remove a local exception.
    Remove { id: String },
}
