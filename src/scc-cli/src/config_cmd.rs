//! Config subcommands: show, update, explain, and user-config setters.

use chrono::Utc;

use scc_common::SccResult;
use scc_config::{
    ConfigLocation, Materialization, MarketplaceSource, ProjectConfig, RefreshMode,
};
use scc_policy::{ExceptionStore, PolicyInput, collect_active, compute_effective_config};
use scc_storage::SccPaths;
use scc_workspace::resolve_workspace;

use crate::cli::args::ConfigCommand;
use crate::context::CliContext;

pub async fn run(command: ConfigCommand) -> SccResult<i32> {
    match command {
        ConfigCommand::Show => show().await,
        ConfigCommand::Update => update().await,
        ConfigCommand::Explain { team } => explain(team).await,
        ConfigCommand::SetUrl { url } => set_url(url),
        ConfigCommand::SetTeam { team } => set_team(team),
    }
}

async fn show() -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let (org, _) = ctx.load_org(RefreshMode::Auto).await?;

    println!("organization: {} ({})", org.organization.name, org.organization.id);
    println!(
        "team:         {}",
        ctx.user.team.as_deref().unwrap_or("(not selected)")
    );
    println!("marketplaces:");
    for (name, entry) in &org.marketplaces {
        println!("  {:<20} {}", name, entry.source.display_id());
    }
    println!("profiles:     {}", org.profiles.keys().cloned().collect::<Vec<_>>().join(", "));
    if !org.security.blocked_plugins.is_empty() {
        println!("blocked plugins: {}", org.security.blocked_plugins.join(", "));
    }
    Ok(0)
}

async fn update() -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let (org, _) = ctx.load_org(RefreshMode::Force).await?;
    println!(
        "refreshed org config for {} ({} marketplaces, {} profiles)",
        org.organization.name,
        org.marketplaces.len(),
        org.profiles.len()
    );
    Ok(0)
}

async fn explain(team_override: Option<String>) -> SccResult<i32> {
    let ctx = CliContext::load()?;
    let (org, _) = ctx.load_org(RefreshMode::Auto).await?;
    let team_name = ctx.team_name(team_override.as_deref())?;
    let team = ctx.resolve_profile(&org, &team_name).await?;

    let entry_dir = std::env::current_dir()
        .map_err(|e| scc_common::SccError::state(e.to_string()))?;
    let decision = resolve_workspace(&entry_dir, None)?;
    let project = ProjectConfig::load(&decision.workspace_root)?;

    let user_store = ExceptionStore::open(ctx.paths.user_exceptions_file());
    let repo_store_path = SccPaths::workspace_exceptions_file(&decision.workspace_root);
    let repo_store = repo_store_path
        .is_file()
        .then(|| ExceptionStore::open(repo_store_path));
    let now = Utc::now();
    let exceptions = collect_active(&org.exceptions, &user_store, repo_store.as_ref(), now)?;

    let effective = compute_effective_config(PolicyInput {
        org: &org,
        team_name: &team_name,
        team: &team,
        project: project.as_ref(),
        exceptions: &exceptions,
        image: ctx.user.image.as_deref(),
        now,
    })?;

    println!("effective config for team '{team_name}'");
    println!();
    println!("enabled plugins:");
    for plugin in &effective.enabled {
        println!("  {plugin}");
    }
    if !effective.blocked.is_empty() {
        println!("blocked:");
        for block in &effective.blocked {
            println!(
                "  {} (pattern '{}', {} layer)",
                block.item, block.pattern, block.layer
            );
        }
    }
    if !effective.denied.is_empty() {
        println!("denied:");
        for denial in &effective.denied {
            println!("  {} ({})", denial.item, denial.reason);
        }
    }
    if !effective.mcp_servers.is_empty() {
        println!("mcp servers:");
        for server in &effective.mcp_servers {
            println!("  {}", server.name);
        }
    }
    if !effective.exceptions_applied.is_empty() {
        println!("exceptions applied: {}", effective.exceptions_applied.join(", "));
    }
    println!(
        "session: timeout {}h, expected duration {}h, auto-resume {}",
        effective.session.timeout_hours,
        effective.session.expected_duration_hours,
        effective.session.auto_resume
    );
    for warning in metadata_only_warnings(&org) {
        println!("warning: {warning}");
    }
    println!();
    println!("decision log:");
    for record in &effective.decisions {
        println!("  [{:<14}] {} <- {}", record.field, record.value, record.source);
    }
    Ok(0)
}

fn set_url(url: String) -> SccResult<i32> {
    let mut ctx = CliContext::load()?;
    // Classify now so a typo'd URL fails here, not mid-launch.
    if let ConfigLocation::Url(remote) = ConfigLocation::parse(&url)
        && !remote.starts_with("https://")
    {
        return Err(scc_common::SccError::config(format!(
            "org config URLs must be HTTPS, got '{remote}'"
        )));
    }
    ctx.user.org_config_url = Some(url.clone());
    ctx.user.save(&ctx.paths.user_config_file())?;
    println!("org config source set to {url}");
    Ok(0)
}

fn set_team(team: String) -> SccResult<i32> {
    let mut ctx = CliContext::load()?;
    ctx.user.team = Some(team.clone());
    ctx.user.save(&ctx.paths.user_config_file())?;
    println!("team set to {team} (takes effect on the next start)");
    Ok(0)
}

/// A `url` marketplace kept metadata-only means the agent must fetch
/// plugin artifacts itself, with credentials available inside the sandbox.
fn metadata_only_warnings(org: &scc_config::OrganizationConfig) -> Vec<String> {
    org.marketplaces
        .iter()
        .filter_map(|(name, entry)| match &entry.source {
            MarketplaceSource::Url {
                materialization: Materialization::MetadataOnly,
                ..
            } => Some(format!(
                "marketplace '{name}' is metadata-only: the agent needs credentials inside the sandbox to fetch its plugins"
            )),
            _ => None,
        })
        .collect()
}
