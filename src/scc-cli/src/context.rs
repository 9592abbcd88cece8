//! Shared command setup.
//!
//! Every command starts here: storage paths, the user config, and (for
//! commands that need governance) the org config through the caching
//! loader.

use scc_common::{SccError, SccResult};
use scc_config::{
    AuthSpec, ConfigLoader, ConfigLocation, Freshness, OrganizationConfig, RefreshMode,
    TeamProfile, UserConfig,
};
use scc_storage::SccPaths;

/// Paths plus user config, loaded once per command.
pub struct CliContext {
    pub paths: SccPaths,
    pub user: UserConfig,
}

impl CliContext {
    /// Load paths and the user config.
    pub fn load() -> SccResult<Self> {
        let paths = SccPaths::new()?;
        paths.ensure_dirs()?;
        let user = UserConfig::load(&paths.user_config_file())?;
        Ok(Self { paths, user })
    }

    /// The configured org config location.
    pub fn org_location(&self) -> SccResult<ConfigLocation> {
        let url = self.user.org_config_url.as_deref().ok_or_else(|| {
            SccError::config("no org config URL is configured")
                .with_suggestion("run: scc config set-url https://config.example.com/org.json")
        })?;
        Ok(ConfigLocation::parse(url))
    }

    /// Load the org config through the cache.
    pub async fn load_org(&self, refresh: RefreshMode) -> SccResult<(OrganizationConfig, Freshness)> {
        let location = self.org_location()?;
        let loader = ConfigLoader::new(&self.paths.cache_dir)?;
        let result = loader
            .load_org_config(&location, &self.user.auth, refresh)
            .await?;
        if result.1 == Freshness::Stale {
            eprintln!("warning: org config server unreachable, using a stale cached copy");
        }
        Ok(result)
    }

    /// The selected team name, with an optional per-command override.
    pub fn team_name(&self, override_team: Option<&str>) -> SccResult<String> {
        override_team
            .map(String::from)
            .or_else(|| self.user.team.clone())
            .ok_or_else(|| {
                SccError::config("no team is selected")
                    .with_suggestion("run: scc config set-team <name>")
            })
    }

    /// Resolve the (possibly federated) team profile.
    pub async fn resolve_profile(
        &self,
        org: &OrganizationConfig,
        team: &str,
    ) -> SccResult<TeamProfile> {
        let loader = ConfigLoader::new(&self.paths.cache_dir)?;
        Ok(loader.resolve_team_profile(org, team, &self.user.auth).await?)
    }

    /// The auth spec for remote sources.
    pub fn auth(&self) -> &AuthSpec {
        &self.user.auth
    }
}
