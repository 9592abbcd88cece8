//! The caching config loader.
//!
//! Org configs load from an HTTPS URL or a local file. Remote bodies are
//! cached (`org_config.json` + `cache_meta.json`) with a one hour TTL and
//! ETag/Last-Modified revalidation; a network failure falls back to the
//! stale cache with a warning. Only idempotent reads are retried.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use scc_common::file_locking::{atomic_write, atomic_write_json};
use scc_common::http::create_default_client;

use crate::auth::AuthSpec;
use crate::error::{ConfigError, Result};
use crate::model::{MarketplaceSource, OrganizationConfig, TeamProfile};

/// TTL for the cached org config.
pub const ORG_CONFIG_TTL: Duration = Duration::from_secs(60 * 60);

/// Retry schedule for idempotent reads: attempts, base backoff, cap.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_CAP: Duration = Duration::from_secs(2);

/// Where an org config lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Remote HTTPS document.
    Url(String),
    /// Local file, for admins and tests.
    File(PathBuf),
}

impl ConfigLocation {
    /// Classify a user-supplied location string.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            ConfigLocation::Url(raw.to_string())
        } else {
            ConfigLocation::File(PathBuf::from(raw))
        }
    }
}

/// Whether to consult the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Use the cache within TTL, revalidate past it.
    Auto,
    /// Skip the freshness check and refetch.
    Force,
}

/// How fresh the returned config is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Fetched (or revalidated) from the remote just now.
    Fresh,
    /// Served from a cache within its TTL.
    Cached,
    /// Served from an expired cache because the remote is unreachable.
    Stale,
}

/// Sidecar metadata for the cached org config body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheMeta {
    fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn is_fresh(&self, url: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.url == url
            && now.signed_duration_since(self.fetched_at).num_seconds()
                < ttl.as_secs().min(i64::MAX as u64) as i64
    }
}

/// The caching loader.
pub struct ConfigLoader {
    client: reqwest::Client,
    body_path: PathBuf,
    meta_path: PathBuf,
    ttl: Duration,
}

impl ConfigLoader {
    /// A loader caching under `cache_dir`.
    pub fn new(cache_dir: &Path) -> Result<Self> {
        let client = create_default_client().map_err(std::io::Error::other)?;
        Ok(Self {
            client,
            body_path: cache_dir.join("org_config.json"),
            meta_path: cache_dir.join("cache_meta.json"),
            ttl: ORG_CONFIG_TTL,
        })
    }

    /// Override the TTL (tests).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Load, parse, and validate the org config.
    pub async fn load_org_config(
        &self,
        location: &ConfigLocation,
        auth: &AuthSpec,
        refresh: RefreshMode,
    ) -> Result<(OrganizationConfig, Freshness)> {
        let (body, freshness) = match location {
            ConfigLocation::File(path) => {
                let body = std::fs::read_to_string(path)?;
                (body, Freshness::Fresh)
            }
            ConfigLocation::Url(url) => self.fetch_remote(url, auth, refresh).await?,
        };
        let config = OrganizationConfig::from_json(&body)?;
        Ok((config, freshness))
    }

    async fn fetch_remote(
        &self,
        url: &str,
        auth: &AuthSpec,
        refresh: RefreshMode,
    ) -> Result<(String, Freshness)> {
        if !url.starts_with("https://") {
            return Err(ConfigError::HttpsRequired(url.to_string()));
        }

        let now = Utc::now();
        let meta = CacheMeta::load(&self.meta_path);
        let cached_body = std::fs::read_to_string(&self.body_path).ok();

        if refresh == RefreshMode::Auto
            && let (Some(meta), Some(body)) = (&meta, &cached_body)
            && meta.is_fresh(url, self.ttl, now)
        {
            debug!(url, "org config served from cache within TTL");
            return Ok((body.clone(), Freshness::Cached));
        }

        // Token resolution happens once, on the host.
        let token = auth.resolve()?;

        let mut request = self.client.get(url);
        if let Some(token) = &token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let (Some(meta), Some(_)) = (&meta, &cached_body)
            && meta.url == url
        {
            if let Some(etag) = &meta.etag {
                request = request.header(header::IF_NONE_MATCH, etag.clone());
            }
            if let Some(lm) = &meta.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, lm.clone());
            }
        }

        let response = match self.send_with_retry(request, url).await {
            Ok(response) => response,
            Err(err) => {
                // Unreachable remote: fall back to a stale cache if we have one.
                if let Some(body) = cached_body {
                    warn!(url, error = %err, "org config fetch failed, using stale cache");
                    return Ok((body, Freshness::Stale));
                }
                return Err(err);
            }
        };

        match response.status() {
            StatusCode::NOT_MODIFIED => {
                let body = cached_body.ok_or_else(|| ConfigError::Network {
                    url: url.to_string(),
                    message: "304 received without a cached body".to_string(),
                })?;
                self.store_meta(url, meta.as_ref().and_then(|m| m.etag.clone()), meta.and_then(|m| m.last_modified))?;
                debug!(url, "org config revalidated (304)");
                Ok((body, Freshness::Fresh))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConfigError::Unauthorized {
                url: url.to_string(),
                status: response.status().as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(ConfigError::NotFound(url.to_string())),
            status if status.is_success() => {
                let etag = header_string(&response, header::ETAG);
                let last_modified = header_string(&response, header::LAST_MODIFIED);
                let body = response.text().await.map_err(|e| ConfigError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
                atomic_write(&self.body_path, body.as_bytes())?;
                self.store_meta(url, etag, last_modified)?;
                debug!(url, "org config fetched");
                Ok((body, Freshness::Fresh))
            }
            status => Err(ConfigError::Network {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            }),
        }
    }

    /// GET with retries on connection errors and 5xx, exponential backoff.
    async fn send_with_retry(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response> {
        let mut last_error = String::new();
        for attempt in 0..RETRY_ATTEMPTS {
            if attempt > 0 {
                let backoff = RETRY_BASE
                    .saturating_mul(2u32.saturating_pow(attempt - 1))
                    .min(RETRY_CAP);
                tokio::time::sleep(backoff).await;
            }
            let Some(request) = request.try_clone() else {
                break;
            };
            match request.send().await {
                Ok(response) if response.status().is_server_error() => {
                    last_error = format!("HTTP {}", response.status());
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    return Err(ConfigError::Network {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
            }
            debug!(url, attempt = attempt + 1, error = %last_error, "org config fetch retrying");
        }
        Err(ConfigError::Network {
            url: url.to_string(),
            message: last_error,
        })
    }

    fn store_meta(
        &self,
        url: &str,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<()> {
        let meta = CacheMeta {
            url: url.to_string(),
            etag,
            last_modified,
            fetched_at: Utc::now(),
        };
        atomic_write_json(&self.meta_path, &meta)?;
        Ok(())
    }

    /// Resolve a team profile, fetching its federated content if
    /// `config_source` is set.
    ///
    /// Trust gates apply to the *source*: when the team declares
    /// `marketplace_source_patterns`, the federated source id must match one
    /// of them. Fetched content never replaces the org-side `trust`,
    /// `delegation`, or `config_source` fields.
    pub async fn resolve_team_profile(
        &self,
        org: &OrganizationConfig,
        team: &str,
        auth: &AuthSpec,
    ) -> Result<TeamProfile> {
        let profile = org.profile(team).cloned().ok_or_else(|| {
            ConfigError::Schema(format!(
                "team '{team}' is not declared in the org config (profiles: {})",
                org.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let Some(source) = profile.config_source.clone() else {
            return Ok(profile);
        };

        if !profile.trust.marketplace_source_patterns.is_empty() {
            let id = source.display_id();
            let trusted = profile.trust.marketplace_source_patterns.iter().any(|p| {
                glob::Pattern::new(&p.to_lowercase())
                    .map(|g| g.matches(&id.to_lowercase()))
                    .unwrap_or(false)
            });
            if !trusted {
                return Err(ConfigError::Schema(format!(
                    "federated profile source '{id}' for team '{team}' matches no trusted pattern"
                )));
            }
        }

        let body = match &source {
            MarketplaceSource::Url { url, .. } => {
                require_https_url(url)?;
                let token = auth.resolve()?;
                let mut request = self.client.get(url);
                if let Some(token) = &token {
                    request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
                }
                let response = self.send_with_retry(request, url).await?;
                if !response.status().is_success() {
                    return Err(ConfigError::Network {
                        url: url.clone(),
                        message: format!("HTTP {}", response.status()),
                    });
                }
                response.text().await.map_err(|e| ConfigError::Network {
                    url: url.clone(),
                    message: e.to_string(),
                })?
            }
            MarketplaceSource::File { path } => std::fs::read_to_string(path)?,
            other => {
                return Err(ConfigError::Schema(format!(
                    "federated team profiles support url/file sources, not {}",
                    other.source_type()
                )));
            }
        };

        let fetched: TeamProfile = serde_json::from_str(&body)
            .map_err(|e| ConfigError::parse(format!("federated profile for '{team}'"), e))?;

        Ok(TeamProfile {
            trust: profile.trust,
            delegation: profile.delegation,
            config_source: profile.config_source,
            ..fetched
        })
    }
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn require_https_url(url: &str) -> Result<()> {
    if url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::HttpsRequired(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_location_loads_directly() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("org.json");
        std::fs::write(
            &config_path,
            r#"{"organization": {"name": "Acme"}}"#,
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let (config, freshness) = loader
            .load_org_config(
                &ConfigLocation::File(config_path),
                &AuthSpec::None,
                RefreshMode::Auto,
            )
            .await
            .unwrap();
        assert_eq!(config.organization.name, "Acme");
        assert_eq!(freshness, Freshness::Fresh);
    }

    #[tokio::test]
    async fn plain_http_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let err = loader
            .load_org_config(
                &ConfigLocation::Url("http://config.acme.dev/org.json".to_string()),
                &AuthSpec::None,
                RefreshMode::Auto,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::HttpsRequired(_)));
    }

    #[tokio::test]
    async fn fresh_cache_avoids_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://config.invalid/org.json";

        std::fs::write(
            dir.path().join("org_config.json"),
            r#"{"organization": {"name": "Cached Acme"}}"#,
        )
        .unwrap();
        let meta = CacheMeta {
            url: url.to_string(),
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            fetched_at: Utc::now(),
        };
        std::fs::write(
            dir.path().join("cache_meta.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        // `.invalid` never resolves, so a hit on the network would fail.
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let (config, freshness) = loader
            .load_org_config(
                &ConfigLocation::Url(url.to_string()),
                &AuthSpec::None,
                RefreshMode::Auto,
            )
            .await
            .unwrap();
        assert_eq!(config.organization.name, "Cached Acme");
        assert_eq!(freshness, Freshness::Cached);
    }

    #[tokio::test]
    async fn expired_cache_falls_back_stale_when_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://config.invalid/org.json";

        std::fs::write(
            dir.path().join("org_config.json"),
            r#"{"organization": {"name": "Stale Acme"}}"#,
        )
        .unwrap();
        let meta = CacheMeta {
            url: url.to_string(),
            etag: None,
            last_modified: None,
            fetched_at: Utc::now() - chrono::Duration::hours(3),
        };
        std::fs::write(
            dir.path().join("cache_meta.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let (config, freshness) = loader
            .load_org_config(
                &ConfigLocation::Url(url.to_string()),
                &AuthSpec::None,
                RefreshMode::Auto,
            )
            .await
            .unwrap();
        assert_eq!(config.organization.name, "Stale Acme");
        assert_eq!(freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn unreachable_without_cache_is_a_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let err = loader
            .load_org_config(
                &ConfigLocation::Url("https://config.invalid/org.json".to_string()),
                &AuthSpec::None,
                RefreshMode::Force,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Network { .. }));
    }

    #[tokio::test]
    async fn federated_profile_requires_trusted_source() {
        let dir = tempfile::tempdir().unwrap();
        let profile_path = dir.path().join("team.json");
        std::fs::write(
            &profile_path,
            r#"{"additional_plugins": ["api-tools@internal"]}"#,
        )
        .unwrap();

        let raw = format!(
            r#"{{
                "organization": {{"name": "Acme"}},
                "profiles": {{
                    "platform": {{
                        "config_source": {{"source": "file", "path": {path:?}}},
                        "trust": {{"marketplace_source_patterns": ["file:*"]}},
                        "delegation": {{"allow_project_overrides": true}}
                    }},
                    "untrusted": {{
                        "config_source": {{"source": "file", "path": {path:?}}},
                        "trust": {{"marketplace_source_patterns": ["github:acme/*"]}}
                    }}
                }}
            }}"#,
            path = profile_path.display().to_string()
        );
        let org = OrganizationConfig::from_json(&raw).unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();

        let resolved = loader
            .resolve_team_profile(&org, "platform", &AuthSpec::None)
            .await
            .unwrap();
        assert_eq!(resolved.additional_plugins, vec!["api-tools@internal"]);
        // Org-side delegation survives federation.
        assert!(resolved.delegation.allow_project_overrides);

        let err = loader
            .resolve_team_profile(&org, "untrusted", &AuthSpec::None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no trusted pattern"));
    }
}
