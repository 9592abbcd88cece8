//! SCC Config - organization governance configuration.
//!
//! This crate owns:
//! - The typed configuration model (`OrganizationConfig`, `TeamProfile`,
//!   `ProjectConfig`, `MarketplaceSource`, MCP servers, exceptions)
//! - Schema validation at the load boundary
//! - The caching loader: HTTPS-only fetch with ETag/TTL revalidation and
//!   stale-cache fallback
//! - `env:` / `command:` auth spec resolution
//! - The user-level `config.json`
//!
//! Dynamic shapes stop here: everything downstream of this crate works with
//! explicit types and exhaustive matches.

mod auth;
mod error;
mod loader;
mod model;
mod project;
mod user;

pub use auth::AuthSpec;
pub use error::{ConfigError, Result};
pub use loader::{CacheMeta, ConfigLoader, ConfigLocation, Freshness, RefreshMode};
pub use model::{
    Defaults, Delegation, Exception, ExceptionAllow, ExceptionScope, Materialization,
    MarketplaceEntry, MarketplaceSource, McpServer, McpTransport, OrganizationConfig,
    OrganizationInfo, ResolvedSessionSettings, SafetyNet, SafetyNetAction, SecurityPolicy,
    SessionSettings, TeamDelegation, TeamDelegationLists, TeamProfile, TrustPolicy,
};
pub use project::ProjectConfig;
pub use user::UserConfig;

/// Marketplace names that are always available without configuration.
pub const IMPLICIT_MARKETPLACES: &[&str] = &["claude-plugins-official"];

/// True if `name` is one of the implicit marketplaces.
pub fn is_implicit_marketplace(name: &str) -> bool {
    IMPLICIT_MARKETPLACES
        .iter()
        .any(|m| m.eq_ignore_ascii_case(name))
}
