//! Effective-config computation.
//!
//! The pipeline runs in a fixed order; every retention and removal is
//! appended to the decision log with its source layer. Errors in the
//! normalization and allow-list stages are fatal; later stages mark
//! individual items denied or blocked and keep going.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use scc_config::{
    Exception, ExceptionScope, McpServer, McpTransport, OrganizationConfig, ProjectConfig,
    ResolvedSessionSettings, SessionSettings, TeamProfile, is_implicit_marketplace,
};

use crate::error::Result;
use crate::mcp::{normalize_command_path, path_under_prefixes, url_host};
use crate::pattern::{image_matches_any, matches_any, matches_any_str, normalize_image};
use crate::plugin_ref::{PluginRef, normalize};

/// Which configuration layer a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Org,
    Team,
    Project,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Org => write!(f, "org"),
            Layer::Team => write!(f, "team"),
            Layer::Project => write!(f, "project"),
        }
    }
}

/// What kind of item a security block hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Plugin,
    McpServer,
    BaseImage,
}

/// A security block: the item, the pattern that matched, and the layer the
/// pattern was declared at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedItem {
    pub item: String,
    pub pattern: String,
    pub layer: Layer,
    pub kind: BlockKind,
}

/// Why an item was denied (not blocked): the distinction matters because
/// local exceptions may clear delegation denials but never security blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    Delegation,
    NotAllowed,
    StdioDisabled,
    PathPrefix,
    InvalidRef,
}

/// A per-item denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniedItem {
    pub item: String,
    pub reason: String,
    pub kind: DenyKind,
}

/// One entry in the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub field: String,
    pub value: String,
    pub source: String,
}

/// The policy-resolved configuration for a single launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub enabled: BTreeSet<PluginRef>,
    pub blocked: Vec<BlockedItem>,
    pub denied: Vec<DeniedItem>,
    pub extra_marketplaces: BTreeSet<String>,
    pub mcp_servers: Vec<McpServer>,
    pub decisions: Vec<DecisionRecord>,
    pub exceptions_applied: Vec<String>,
    pub session: ResolvedSessionSettings,
}

impl EffectiveConfig {
    /// Marketplaces a launch must materialize: those referenced by enabled
    /// plugins plus the extra set, minus the implicit built-ins.
    pub fn required_marketplaces(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self
            .enabled
            .iter()
            .map(|r| r.marketplace().to_string())
            .collect();
        names.extend(self.extra_marketplaces.iter().cloned());
        names.retain(|n| !is_implicit_marketplace(n));
        names
    }

    /// True if the launch image was refused.
    pub fn image_blocked(&self) -> Option<&BlockedItem> {
        self.blocked.iter().find(|b| b.kind == BlockKind::BaseImage)
    }
}

/// Everything one evaluation consumes. The team profile arrives already
/// federation-resolved; exceptions arrive already scope-filtered per source.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub org: &'a OrganizationConfig,
    pub team_name: &'a str,
    pub team: &'a TeamProfile,
    pub project: Option<&'a ProjectConfig>,
    pub exceptions: &'a [Exception],
    /// The image the sandbox spec chose, if already known.
    pub image: Option<&'a str>,
    pub now: DateTime<Utc>,
}

struct Evaluation<'a> {
    input: PolicyInput<'a>,
    enabled: BTreeSet<PluginRef>,
    blocked: Vec<BlockedItem>,
    denied: Vec<DeniedItem>,
    decisions: Vec<DecisionRecord>,
    exceptions_applied: Vec<String>,
}

/// Compute the effective config. See the module docs for ordering.
pub fn compute_effective_config(input: PolicyInput<'_>) -> Result<EffectiveConfig> {
    let mut eval = Evaluation {
        input,
        enabled: BTreeSet::new(),
        blocked: Vec::new(),
        denied: Vec::new(),
        decisions: Vec::new(),
        exceptions_applied: Vec::new(),
    };

    // Steps 1-2: normalize org defaults and team additions (fatal), union.
    let default_refs = eval.normalize_all(&input.org.defaults.enabled_plugins)?;
    let team_refs = eval.normalize_all(&input.team.additional_plugins)?;
    for r in &default_refs {
        if eval.enabled.insert(r.clone()) {
            eval.decide("enabled_plugins", r.to_string(), "org.defaults");
        }
    }
    for r in &team_refs {
        if eval.enabled.insert(r.clone()) {
            eval.decide("enabled_plugins", r.to_string(), eval.team_source());
        }
    }

    // Step 3: team-disabled patterns.
    eval.apply_disabled_patterns();

    // Step 4: org allowed-plugins restriction.
    eval.apply_allowed_set()?;

    // Step 5: delegation for team and project additions.
    let delegated = Delegated::compute(&input);
    eval.enforce_team_delegation(&delegated, &default_refs, &team_refs);
    eval.apply_project_plugins(&delegated);
    let extra_marketplaces = eval.collect_extra_marketplaces(&delegated);

    // Step 6: security blocks (plugins and the chosen image).
    eval.apply_security_blocks();

    // Step 7: exception overlay, policy scope before local.
    eval.apply_exceptions();

    // Steps 8-9: MCP server union with stdio and blocklist gates.
    let mcp_servers = eval.build_mcp_servers(&delegated);

    // Session settings: last-wins precedence, with the project layer only
    // honored when the team grants project overrides.
    let project_session = if delegated.project_overrides {
        input.project.map(|p| &p.session)
    } else {
        None
    };
    let session = SessionSettings::layered(
        &input.org.defaults.session,
        &input.team.session,
        project_session,
    );
    let session_source = if project_session.is_some_and(|s| s.timeout_hours.is_some()) {
        "project".to_string()
    } else if input.team.session.timeout_hours.is_some() {
        eval.team_source()
    } else {
        "org.defaults".to_string()
    };
    eval.decide(
        "session.timeout_hours",
        session.timeout_hours.to_string(),
        session_source,
    );

    debug!(
        enabled = eval.enabled.len(),
        blocked = eval.blocked.len(),
        denied = eval.denied.len(),
        "effective config computed"
    );

    Ok(EffectiveConfig {
        enabled: eval.enabled,
        blocked: eval.blocked,
        denied: eval.denied,
        extra_marketplaces,
        mcp_servers,
        decisions: eval.decisions,
        exceptions_applied: eval.exceptions_applied,
        session,
    })
}

/// Delegation grants resolved once per evaluation.
struct Delegated {
    team_plugins: bool,
    team_mcp: bool,
    team_marketplaces: bool,
    project_overrides: bool,
}

impl Delegated {
    fn compute(input: &PolicyInput<'_>) -> Self {
        let lists = &input.org.delegation.teams;
        let team_plugins =
            matches_any_str(input.team_name, &lists.allow_additional_plugins).is_some();
        let team_mcp =
            matches_any_str(input.team_name, &lists.allow_additional_mcp_servers).is_some();
        let team_marketplaces =
            matches_any_str(input.team_name, &lists.allow_additional_marketplaces).is_some();
        Self {
            team_plugins,
            team_mcp,
            team_marketplaces,
            project_overrides: input.team.delegation.allow_project_overrides,
        }
    }
}

impl<'a> Evaluation<'a> {
    fn org_marketplace_names(&self) -> Vec<String> {
        self.input.org.marketplaces.keys().cloned().collect()
    }

    fn team_source(&self) -> String {
        format!("team.{}", self.input.team_name)
    }

    fn decide(&mut self, field: &str, value: impl Into<String>, source: impl Into<String>) {
        self.decisions.push(DecisionRecord {
            field: field.to_string(),
            value: value.into(),
            source: source.into(),
        });
    }

    fn deny(&mut self, item: impl Into<String>, reason: impl Into<String>, kind: DenyKind) {
        self.denied.push(DeniedItem {
            item: item.into(),
            reason: reason.into(),
            kind,
        });
    }

    fn normalize_all(&self, raw: &[String]) -> Result<Vec<PluginRef>> {
        let names = self.org_marketplace_names();
        let blocked_implicit = self.input.org.security.block_implicit_marketplaces;
        raw.iter()
            .map(|r| normalize(r, &names, blocked_implicit))
            .collect()
    }

    fn apply_disabled_patterns(&mut self) {
        let patterns = self.input.team.disabled_plugins.clone();
        if patterns.is_empty() {
            return;
        }
        let removed: Vec<(PluginRef, String)> = self
            .enabled
            .iter()
            .filter_map(|r| matches_any(r, &patterns).map(|p| (r.clone(), p.to_string())))
            .collect();
        for (r, pattern) in removed {
            self.enabled.remove(&r);
            let source = self.team_source();
            self.decide("disabled_plugins", format!("{r} (pattern {pattern})"), source);
        }
    }

    fn apply_allowed_set(&mut self) -> Result<()> {
        let allowed = self.input.org.defaults.allowed_plugins.clone();
        if allowed.is_empty() {
            return Ok(());
        }
        let removed: Vec<PluginRef> = self
            .enabled
            .iter()
            .filter(|r| matches_any(r, &allowed).is_none())
            .cloned()
            .collect();
        for r in removed {
            self.enabled.remove(&r);
            self.deny(r.to_string(), "not in allowed set", DenyKind::NotAllowed);
            self.decide("allowed_plugins", format!("{r} removed"), "org.defaults");
        }
        Ok(())
    }

    fn enforce_team_delegation(
        &mut self,
        delegated: &Delegated,
        default_refs: &[PluginRef],
        team_refs: &[PluginRef],
    ) {
        if delegated.team_plugins {
            return;
        }
        for r in team_refs {
            // Entries also present in the org defaults stay.
            if default_refs.contains(r) || !self.enabled.contains(r) {
                continue;
            }
            self.enabled.remove(r);
            self.deny(
                r.to_string(),
                format!(
                    "missing delegation: team '{}' is not in delegation.teams.allow_additional_plugins",
                    self.input.team_name
                ),
                DenyKind::Delegation,
            );
        }
    }

    fn apply_project_plugins(&mut self, delegated: &Delegated) {
        let Some(project) = self.input.project else {
            return;
        };
        let allowed = delegated.project_overrides && delegated.team_plugins;
        for raw in project.additional_plugins.clone() {
            if !allowed {
                let reason = if !delegated.project_overrides {
                    format!(
                        "missing delegation: team '{}' does not grant project overrides",
                        self.input.team_name
                    )
                } else {
                    format!(
                        "missing delegation: team '{}' may not add plugins, so neither may its projects",
                        self.input.team_name
                    )
                };
                self.deny(raw, reason, DenyKind::Delegation);
                continue;
            }
            let names = self.org_marketplace_names();
            let blocked_implicit = self.input.org.security.block_implicit_marketplaces;
            match normalize(&raw, &names, blocked_implicit) {
                Ok(r) => {
                    if self.enabled.insert(r.clone()) {
                        self.decide("enabled_plugins", r.to_string(), "project");
                    }
                }
                // Past the fatal stages: an invalid project ref is denied,
                // not fatal.
                Err(e) => self.deny(raw, format!("invalid reference: {e}"), DenyKind::InvalidRef),
            }
        }
    }

    fn collect_extra_marketplaces(&mut self, delegated: &Delegated) -> BTreeSet<String> {
        let mut extra = BTreeSet::new();
        for name in self.input.org.defaults.extra_marketplaces.clone() {
            self.decide("extra_marketplaces", &name, "org.defaults");
            extra.insert(name);
        }
        for name in self.input.team.extra_marketplaces.clone() {
            if delegated.team_marketplaces {
                let source = self.team_source();
                self.decide("extra_marketplaces", &name, source);
                extra.insert(name);
            } else {
                self.deny(
                    name,
                    format!(
                        "missing delegation: team '{}' is not in delegation.teams.allow_additional_marketplaces",
                        self.input.team_name
                    ),
                    DenyKind::Delegation,
                );
            }
        }
        extra
    }

    fn apply_security_blocks(&mut self) {
        let patterns = self.input.org.security.blocked_plugins.clone();
        if !patterns.is_empty() {
            let hits: Vec<(PluginRef, String)> = self
                .enabled
                .iter()
                .filter_map(|r| matches_any(r, &patterns).map(|p| (r.clone(), p.to_string())))
                .collect();
            for (r, pattern) in hits {
                self.enabled.remove(&r);
                self.decide(
                    "blocked_plugins",
                    format!("{r} (pattern {pattern})"),
                    "org.security",
                );
                self.blocked.push(BlockedItem {
                    item: r.to_string(),
                    pattern,
                    layer: Layer::Org,
                    kind: BlockKind::Plugin,
                });
            }
        }

        if let Some(image) = self.input.image
            && let Some(pattern) =
                image_matches_any(image, &self.input.org.security.blocked_base_images)
        {
            let normalized = normalize_image(image);
            self.decide(
                "blocked_base_images",
                format!("{normalized} (pattern {pattern})"),
                "org.security",
            );
            self.blocked.push(BlockedItem {
                item: normalized,
                pattern: pattern.to_string(),
                layer: Layer::Org,
                kind: BlockKind::BaseImage,
            });
        }
    }

    /// Active exceptions of `scope` whose plugin allow-list matches `item`.
    fn exception_for(
        &self,
        scope: ExceptionScope,
        matches_allow: impl Fn(&Exception) -> bool,
    ) -> Option<String> {
        self.input
            .exceptions
            .iter()
            .filter(|e| e.scope == scope && !e.is_expired(self.input.now))
            .find(|e| matches_allow(e))
            .map(|e| e.id.clone())
    }

    fn record_exception(&mut self, id: String) {
        if !self.exceptions_applied.contains(&id) {
            self.exceptions_applied.push(id);
        }
    }

    fn apply_exceptions(&mut self) {
        // Policy scope clears any block.
        let mut kept = Vec::new();
        for block in std::mem::take(&mut self.blocked) {
            let cleared = match block.kind {
                BlockKind::Plugin => self.exception_for(ExceptionScope::Policy, |e| {
                    plugin_allow_matches(&e.allow.plugins, &block.item)
                }),
                BlockKind::BaseImage => self.exception_for(ExceptionScope::Policy, |e| {
                    e.allow
                        .base_images
                        .iter()
                        .any(|p| crate::pattern::image_matches(&block.item, p))
                }),
                BlockKind::McpServer => self.exception_for(ExceptionScope::Policy, |e| {
                    mcp_allow_matches(&e.allow.mcp_servers, &block.item)
                }),
            };
            match cleared {
                Some(id) => {
                    self.decide(
                        "exception",
                        format!("unblocked {}", block.item),
                        format!("exception:{id}"),
                    );
                    if block.kind == BlockKind::Plugin
                        && let Ok(r) = PluginRef::try_from(block.item.clone())
                    {
                        self.enabled.insert(r);
                    }
                    self.record_exception(id);
                }
                None => kept.push(block),
            }
        }
        self.blocked = kept;

        // Both scopes clear delegation denials; local scope clears nothing else.
        let mut kept = Vec::new();
        for denial in std::mem::take(&mut self.denied) {
            if denial.kind != DenyKind::Delegation {
                kept.push(denial);
                continue;
            }
            let cleared = self
                .exception_for(ExceptionScope::Policy, |e| {
                    plugin_allow_matches(&e.allow.plugins, &denial.item)
                })
                .or_else(|| {
                    self.exception_for(ExceptionScope::Local, |e| {
                        plugin_allow_matches(&e.allow.plugins, &denial.item)
                    })
                });
            match cleared {
                Some(id) => {
                    // A restored plugin is still subject to security blocks:
                    // an exception on the delegation denial is not an
                    // exception on the block.
                    if let Ok(r) = PluginRef::try_from(denial.item.clone()) {
                        if let Some(pattern) =
                            matches_any(&r, &self.input.org.security.blocked_plugins)
                        {
                            let pattern = pattern.to_string();
                            self.decide(
                                "blocked_plugins",
                                format!("{r} (pattern {pattern})"),
                                "org.security",
                            );
                            self.blocked.push(BlockedItem {
                                item: r.to_string(),
                                pattern,
                                layer: Layer::Org,
                                kind: BlockKind::Plugin,
                            });
                        } else {
                            self.enabled.insert(r);
                        }
                    }
                    self.decide(
                        "exception",
                        format!("restored {}", denial.item),
                        format!("exception:{id}"),
                    );
                    self.record_exception(id);
                }
                None => kept.push(denial),
            }
        }
        self.denied = kept;
    }

    fn build_mcp_servers(&mut self, delegated: &Delegated) -> Vec<McpServer> {
        let mut accepted: Vec<McpServer> = Vec::new();

        let org_servers = self.input.org.defaults.additional_mcp_servers.clone();
        let team_servers = self.input.team.additional_mcp_servers.clone();
        let project_servers = self
            .input
            .project
            .map(|p| p.additional_mcp_servers.clone())
            .unwrap_or_default();

        let layers: [(Vec<McpServer>, Layer, bool); 3] = [
            (org_servers, Layer::Org, true),
            (team_servers, Layer::Team, delegated.team_mcp),
            (
                project_servers,
                Layer::Project,
                delegated.project_overrides && delegated.team_mcp,
            ),
        ];

        for (servers, layer, layer_delegated) in layers {
            for server in servers {
                if !layer_delegated {
                    // An exception naming the server can stand in for the
                    // missing delegation (policy or local scope).
                    let exception = self
                        .exception_for(ExceptionScope::Policy, |e| {
                            mcp_allow_matches(&e.allow.mcp_servers, &server.name)
                        })
                        .or_else(|| {
                            self.exception_for(ExceptionScope::Local, |e| {
                                mcp_allow_matches(&e.allow.mcp_servers, &server.name)
                            })
                        });
                    match exception {
                        Some(id) => self.record_exception(id),
                        None => {
                            self.deny(
                                server.name.clone(),
                                format!(
                                    "missing delegation: {layer} layer may not add MCP servers"
                                ),
                                DenyKind::Delegation,
                            );
                            continue;
                        }
                    }
                }
                if self.admit_mcp_server(&server, layer) {
                    accepted.retain(|s| s.name != server.name);
                    self.decide("mcp_servers", server.name.clone(), layer.to_string());
                    accepted.push(server);
                }
            }
        }
        accepted
    }

    /// Stdio and blocklist gates for a single server. Returns whether the
    /// server is admitted.
    fn admit_mcp_server(&mut self, server: &McpServer, _layer: Layer) -> bool {
        let security = &self.input.org.security;
        match &server.transport {
            McpTransport::Stdio { command, .. } => {
                if !security.allow_stdio_mcp {
                    if let Some(id) = self.exception_for(ExceptionScope::Policy, |e| {
                        mcp_allow_matches(&e.allow.mcp_servers, &server.name)
                    }) {
                        self.record_exception(id);
                        return true;
                    }
                    self.deny(server.name.clone(), "stdio disabled", DenyKind::StdioDisabled);
                    return false;
                }
                let path = normalize_command_path(command);
                if !path_under_prefixes(&path, &security.allowed_stdio_prefixes) {
                    if let Some(id) = self.exception_for(ExceptionScope::Policy, |e| {
                        mcp_allow_matches(&e.allow.mcp_servers, &server.name)
                    }) {
                        self.record_exception(id);
                        return true;
                    }
                    self.deny(
                        server.name.clone(),
                        "path outside allowed prefix",
                        DenyKind::PathPrefix,
                    );
                    return false;
                }
                true
            }
            McpTransport::Http { url, .. } | McpTransport::Sse { url, .. } => {
                let name_hit = matches_any_str(&server.name, &security.blocked_mcp_servers);
                let host_hit = url_host(url)
                    .and_then(|h| {
                        matches_any_str(&h, &security.blocked_mcp_servers).map(str::to_string)
                    });
                if let Some(pattern) = name_hit.map(str::to_string).or(host_hit) {
                    if let Some(id) = self.exception_for(ExceptionScope::Policy, |e| {
                        mcp_allow_matches(&e.allow.mcp_servers, &server.name)
                    }) {
                        self.record_exception(id);
                        return true;
                    }
                    self.decide(
                        "blocked_mcp_servers",
                        format!("{} (pattern {pattern})", server.name),
                        "org.security",
                    );
                    self.blocked.push(BlockedItem {
                        item: server.name.clone(),
                        pattern,
                        layer: Layer::Org,
                        kind: BlockKind::McpServer,
                    });
                    return false;
                }
                true
            }
        }
    }
}

/// Match an exception's plugin allow-list against a `name@marketplace` item.
fn plugin_allow_matches(patterns: &[String], item: &str) -> bool {
    let Ok(r) = PluginRef::try_from(item.to_string()) else {
        return false;
    };
    matches_any(&r, patterns).is_some()
}

/// Match an exception's MCP allow-list against a server name.
fn mcp_allow_matches(patterns: &[String], name: &str) -> bool {
    matches_any_str(name, patterns).is_some()
}
