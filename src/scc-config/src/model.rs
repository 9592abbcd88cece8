//! The typed configuration model.
//!
//! `OrganizationConfig` is immutable after load. Validation happens here, at
//! the loader boundary, so the policy engine downstream never sees an
//! untyped or malformed shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Top-level organization configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationConfig {
    pub organization: OrganizationInfo,
    #[serde(default)]
    pub marketplaces: BTreeMap<String, MarketplaceEntry>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub profiles: BTreeMap<String, TeamProfile>,
    #[serde(default)]
    pub security: SecurityPolicy,
    #[serde(default)]
    pub delegation: Delegation,
    /// Policy-scope exceptions committed to the config repo.
    #[serde(default)]
    pub exceptions: Vec<Exception>,
}

/// Identity block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationInfo {
    pub name: String,
    #[serde(default)]
    pub id: String,
}

/// A named marketplace with its source and optional description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceEntry {
    pub source: MarketplaceSource,
    #[serde(default)]
    pub description: Option<String>,
}

/// Where a marketplace (or federated team profile) comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MarketplaceSource {
    Github {
        /// `owner/name`.
        repo: String,
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Git {
        url: String,
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
        #[serde(default)]
        materialization: Materialization,
    },
    Directory {
        path: String,
    },
    File {
        path: String,
    },
    Npm {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
}

impl MarketplaceSource {
    /// The source type name, as recorded in cache manifests.
    pub fn source_type(&self) -> &'static str {
        match self {
            MarketplaceSource::Github { .. } => "github",
            MarketplaceSource::Git { .. } => "git",
            MarketplaceSource::Url { .. } => "url",
            MarketplaceSource::Directory { .. } => "directory",
            MarketplaceSource::File { .. } => "file",
            MarketplaceSource::Npm { .. } => "npm",
        }
    }

    /// A short display form used in trust-pattern matching and messages,
    /// e.g. `github:acme/plugins` or `https://plugins.acme.dev/m.json`.
    pub fn display_id(&self) -> String {
        match self {
            MarketplaceSource::Github { repo, .. } => format!("github:{repo}"),
            MarketplaceSource::Git { url, .. } => url.clone(),
            MarketplaceSource::Url { url, .. } => url.clone(),
            MarketplaceSource::Directory { path } => format!("directory:{path}"),
            MarketplaceSource::File { path } => format!("file:{path}"),
            MarketplaceSource::Npm { package, .. } => format!("npm:{package}"),
        }
    }

    /// Enforce source invariants: HTTPS for remote URLs, `owner/name` repos.
    pub fn validate(&self) -> Result<()> {
        match self {
            MarketplaceSource::Github { repo, .. } => {
                let mut parts = repo.split('/');
                let owner = parts.next().unwrap_or_default();
                let name = parts.next().unwrap_or_default();
                if owner.is_empty() || name.is_empty() || parts.next().is_some() {
                    return Err(ConfigError::Schema(format!(
                        "github repo must be 'owner/name', got '{repo}'"
                    )));
                }
                Ok(())
            }
            MarketplaceSource::Git { url, .. } | MarketplaceSource::Url { url, .. } => {
                require_https(url)
            }
            MarketplaceSource::Directory { .. }
            | MarketplaceSource::File { .. }
            | MarketplaceSource::Npm { .. } => Ok(()),
        }
    }
}

/// How a `url` marketplace is brought into the project cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    /// Fetch the manifest and every referenced plugin artifact; rewrite
    /// plugin sources to local relative paths.
    #[default]
    SelfContained,
    /// Cache the manifest alone; the agent fetches artifacts itself.
    MetadataOnly,
    /// Self-contained where possible, falling back per plugin.
    BestEffort,
}

/// Org-wide defaults applied before team and project layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub enabled_plugins: Vec<String>,
    /// Non-empty list restricts `enabled` to matching refs.
    #[serde(default)]
    pub allowed_plugins: Vec<String>,
    #[serde(default)]
    pub extra_marketplaces: Vec<String>,
    #[serde(default)]
    pub additional_mcp_servers: Vec<McpServer>,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Per-team profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamProfile {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub additional_plugins: Vec<String>,
    /// Patterns removing org-default plugins for this team.
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    #[serde(default)]
    pub additional_mcp_servers: Vec<McpServer>,
    #[serde(default)]
    pub extra_marketplaces: Vec<String>,
    /// When set, the profile is federated: its authoritative content is
    /// fetched from this source, gated by `trust`.
    #[serde(default)]
    pub config_source: Option<MarketplaceSource>,
    #[serde(default)]
    pub trust: TrustPolicy,
    #[serde(default)]
    pub delegation: TeamDelegation,
    #[serde(default)]
    pub session: SessionSettings,
}

/// What a federated team profile is allowed to bring in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    #[serde(default = "default_true")]
    pub inherit_org_marketplaces: bool,
    #[serde(default)]
    pub allow_additional_marketplaces: bool,
    /// Glob patterns a federated source id must match.
    #[serde(default)]
    pub marketplace_source_patterns: Vec<String>,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            inherit_org_marketplaces: true,
            allow_additional_marketplaces: false,
            marketplace_source_patterns: Vec::new(),
        }
    }
}

/// What a team lets its projects do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamDelegation {
    #[serde(default)]
    pub allow_project_overrides: bool,
}

/// Session behavior knobs, layered last-wins (project > team > defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default)]
    pub expected_duration_hours: Option<u32>,
    #[serde(default)]
    pub auto_resume: Option<bool>,
}

/// Fully resolved session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSessionSettings {
    pub timeout_hours: u32,
    pub expected_duration_hours: u32,
    pub auto_resume: bool,
}

impl SessionSettings {
    /// Resolve with last-wins precedence: `project` over `team` over
    /// `defaults`, with built-in fallbacks.
    pub fn layered(
        defaults: &SessionSettings,
        team: &SessionSettings,
        project: Option<&SessionSettings>,
    ) -> ResolvedSessionSettings {
        let pick_u32 = |get: fn(&SessionSettings) -> Option<u32>, fallback: u32| {
            project
                .and_then(get)
                .or_else(|| get(team))
                .or_else(|| get(defaults))
                .unwrap_or(fallback)
        };
        let auto_resume = project
            .and_then(|s| s.auto_resume)
            .or(team.auto_resume)
            .or(defaults.auto_resume)
            .unwrap_or(false);
        ResolvedSessionSettings {
            timeout_hours: pick_u32(|s| s.timeout_hours, 8),
            expected_duration_hours: pick_u32(|s| s.expected_duration_hours, 2),
            auto_resume,
        }
    }
}

/// An MCP server granted to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
}

/// MCP transport variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
}

/// Security blocks no team or project can override locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub blocked_plugins: Vec<String>,
    #[serde(default)]
    pub blocked_mcp_servers: Vec<String>,
    #[serde(default)]
    pub blocked_base_images: Vec<String>,
    #[serde(default)]
    pub allow_stdio_mcp: bool,
    /// With stdio MCP allowed, commands must real-path under one of these.
    #[serde(default)]
    pub allowed_stdio_prefixes: Vec<String>,
    #[serde(default)]
    pub safety_net: Option<SafetyNet>,
    /// Refuse the built-in implicit marketplaces.
    #[serde(default)]
    pub block_implicit_marketplaces: bool,
}

/// Safety-net policy injected read-only into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyNet {
    pub action: SafetyNetAction,
    /// Runtime-specific policy body, passed through verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// What the safety net does on a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyNetAction {
    Block,
    Warn,
    Allow,
}

/// Delegation the org grants to teams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(default)]
    pub teams: TeamDelegationLists,
}

/// Team-name patterns (wildcard `*` allowed) naming who may add what.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamDelegationLists {
    #[serde(default)]
    pub allow_additional_plugins: Vec<String>,
    #[serde(default)]
    pub allow_additional_mcp_servers: Vec<String>,
    #[serde(default)]
    pub allow_additional_marketplaces: Vec<String>,
}

/// Scope of an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionScope {
    /// User- or repo-stored; may only clear delegation denials.
    Local,
    /// Committed to the config repo; may clear any block.
    Policy,
}

/// A time-bounded override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub id: String,
    pub scope: ExceptionScope,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub allow: ExceptionAllow,
}

/// What the exception re-allows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionAllow {
    #[serde(default)]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub base_images: Vec<String>,
}

impl Exception {
    /// True once `expires_at` has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Enforce `expires_at > created_at`.
    pub fn validate(&self) -> Result<()> {
        if self.expires_at <= self.created_at {
            return Err(ConfigError::Schema(format!(
                "exception '{}' expires before it was created",
                self.id
            )));
        }
        Ok(())
    }
}

impl OrganizationConfig {
    /// Parse and validate an org config JSON document.
    pub fn from_json(body: &str) -> Result<Self> {
        let config: OrganizationConfig = serde_json::from_str(body)
            .map_err(|e| ConfigError::parse("org config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Schema validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.organization.name.trim().is_empty() {
            return Err(ConfigError::Schema(
                "organization.name must not be empty".to_string(),
            ));
        }
        for (name, entry) in &self.marketplaces {
            if name.trim().is_empty() {
                return Err(ConfigError::Schema(
                    "marketplace names must not be empty".to_string(),
                ));
            }
            entry.source.validate()?;
        }
        for (team, profile) in &self.profiles {
            if let Some(source) = &profile.config_source {
                source.validate().map_err(|e| {
                    ConfigError::Schema(format!("profile '{team}' config_source: {e}"))
                })?;
            }
        }
        for exception in &self.exceptions {
            exception.validate()?;
            if exception.scope != ExceptionScope::Policy {
                return Err(ConfigError::Schema(format!(
                    "exception '{}' in the org config must have policy scope",
                    exception.id
                )));
            }
        }
        Ok(())
    }

    /// The profile for `team`, if declared.
    pub fn profile(&self, team: &str) -> Option<&TeamProfile> {
        self.profiles.get(team)
    }
}

fn require_https(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| ConfigError::Schema(format!("invalid URL '{url}': {e}")))?;
    if parsed.scheme() != "https" {
        return Err(ConfigError::HttpsRequired(url.to_string()));
    }
    Ok(())
}

fn default_true() -> bool {
    true
}
