//! The marketplace materializer.
//!
//! Only `start`-class operations materialize. For each required marketplace
//! the pipeline is: reuse a fresh cache entry, or fetch by source type into
//! a staging directory, validate the layout, and promote with a rename so a
//! cancelled or failed fetch never corrupts the cache. Independent sources
//! fetch concurrently with a small bound; failures are collected per source.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use scc_common::file_locking::{FileLock, LockOptions};
use scc_common::http::create_download_client;
use scc_config::{Materialization, MarketplaceSource, OrganizationConfig};

use crate::error::{MarketplaceError, Result};
use crate::manifest::{
    CacheManifest, MarketplaceManifest, MaterializationMode, MaterializedMarketplace,
};
use crate::npm;

/// Reuse window before a cheap freshness re-check.
const MARKETPLACE_TTL: Duration = Duration::from_secs(60 * 60);

/// Timeout for git clone and related subprocesses.
const GIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Concurrent fetch bound.
const MAX_PARALLEL_FETCHES: usize = 4;

/// How one marketplace was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeOutcome {
    /// A fresh cache entry was reused.
    Reused,
    /// The source was fetched (or refetched).
    Fetched,
}

/// The result of one materialization run.
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub materialized: Vec<(MaterializedMarketplace, MaterializeOutcome)>,
    pub failures: Vec<(String, MarketplaceError)>,
    pub warnings: Vec<String>,
}

impl MaterializeReport {
    /// True if every required marketplace is available.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// The ledger entries, without outcomes.
    pub fn entries(&self) -> Vec<MaterializedMarketplace> {
        self.materialized.iter().map(|(m, _)| m.clone()).collect()
    }
}

/// Materializes marketplaces into the project-local cache.
pub struct Materializer {
    cache_root: PathBuf,
    client: reqwest::Client,
    ttl: Duration,
}

impl Materializer {
    /// A materializer for `workspace`.
    pub fn new(workspace: &Path) -> Result<Self> {
        let client = create_download_client().map_err(std::io::Error::other)?;
        Ok(Self {
            cache_root: workspace.join(crate::CACHE_DIR_RELATIVE),
            client,
            ttl: MARKETPLACE_TTL,
        })
    }

    /// The on-disk cache root.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Materialize every marketplace in `required`.
    ///
    /// Holds the cache lock for the whole run so concurrent launches against
    /// the same project serialize; readers after the lock releases see a
    /// consistent manifest.
    pub async fn materialize(
        &self,
        required: &BTreeSet<String>,
        org: &OrganizationConfig,
        force: bool,
    ) -> Result<MaterializeReport> {
        std::fs::create_dir_all(&self.cache_root)?;
        let _lock = FileLock::acquire(self.cache_root.join(".lock"), &LockOptions::default())?;

        let mut manifest = CacheManifest::load(&self.cache_root);
        let mut report = MaterializeReport::default();
        let mut to_fetch: Vec<(String, MarketplaceSource)> = Vec::new();

        for name in required {
            let Some((canonical, entry)) = lookup_marketplace(org, name) else {
                report
                    .failures
                    .push((name.clone(), MarketplaceError::Unknown(name.clone())));
                continue;
            };
            let source = entry.source.clone();
            if !force
                && let Some(cached) = manifest.marketplaces.get(&canonical)
                && self.reusable(cached, &source)
            {
                debug!(marketplace = %canonical, "reusing cached marketplace");
                report
                    .materialized
                    .push((cached.clone(), MaterializeOutcome::Reused));
                continue;
            }
            to_fetch.push((canonical, source));
        }

        let bound = to_fetch.len().min(MAX_PARALLEL_FETCHES).max(1);
        let mut results = futures::stream::iter(to_fetch.into_iter().map(|(name, source)| {
            let this = &*self;
            async move {
                let result = this.fetch_one(&name, &source).await;
                (name, result)
            }
        }))
        .buffer_unordered(bound);

        while let Some((name, result)) = results.next().await {
            match result {
                Ok((entry, mut warnings)) => {
                    report.warnings.append(&mut warnings);
                    manifest.marketplaces.insert(name, entry.clone());
                    report
                        .materialized
                        .push((entry, MaterializeOutcome::Fetched));
                }
                Err(e) => {
                    warn!(marketplace = %name, error = %e, "marketplace materialization failed");
                    report.failures.push((name, e));
                }
            }
        }

        manifest.save(&self.cache_root)?;
        Ok(report)
    }

    /// Cheap freshness check: same source identity, tree present, within TTL.
    fn reusable(&self, cached: &MaterializedMarketplace, source: &MarketplaceSource) -> bool {
        if cached.source_id != source.display_id() {
            return false;
        }
        let tree = self.cache_root.join(&cached.name);
        if MarketplaceManifest::load(&cached.name, &tree).is_err() {
            return false;
        }
        let age = Utc::now().signed_duration_since(cached.fetched_at);
        age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.ttl.as_secs()
    }

    /// Fetch one marketplace into a staging dir, validate, and promote.
    async fn fetch_one(
        &self,
        name: &str,
        source: &MarketplaceSource,
    ) -> Result<(MaterializedMarketplace, Vec<String>)> {
        let staging = self
            .cache_root
            .join(format!(".staging-{name}-{}", std::process::id()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let fetched = self.fetch_into(name, source, &staging).await;
        let fetched = match fetched {
            Ok(f) => f,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        // Validate the staged tree before it can become visible.
        let manifest = match MarketplaceManifest::load(name, &staging) {
            Ok(m) => m,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e);
            }
        };
        if fetched.mode != MaterializationMode::MetadataOnly
            && let Err(e) = manifest.validate_local_sources(name)
        {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        // Promote atomically: the old tree disappears and the new one lands
        // under the cache lock, so readers never see a partial tree.
        let target = self.cache_root.join(name);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(&staging, &target)?;
        info!(marketplace = %name, source = %source.display_id(), "marketplace materialized");

        let entry = MaterializedMarketplace {
            name: name.to_string(),
            source_type: source.source_type().to_string(),
            source_id: source.display_id(),
            relative_path: format!("{}/{name}", crate::CACHE_DIR_RELATIVE),
            plugins_included: manifest.plugin_names(),
            mode: fetched.mode,
            fetched_at: Utc::now(),
            etag: fetched.etag,
            commit_sha: fetched.commit_sha,
        };
        Ok((entry, fetched.warnings))
    }

    async fn fetch_into(
        &self,
        name: &str,
        source: &MarketplaceSource,
        staging: &Path,
    ) -> Result<Fetched> {
        match source {
            MarketplaceSource::Github {
                repo,
                git_ref,
                path,
            } => {
                let url = format!("https://github.com/{repo}.git");
                self.clone_into(name, &url, git_ref.as_deref(), path.as_deref(), staging)
                    .await
            }
            MarketplaceSource::Git { url, git_ref, path } => {
                self.clone_into(name, url, git_ref.as_deref(), path.as_deref(), staging)
                    .await
            }
            MarketplaceSource::Url {
                url,
                headers,
                materialization,
            } => {
                self.fetch_url_marketplace(name, url, headers.as_ref(), *materialization, staging)
                    .await
            }
            MarketplaceSource::Directory { path } => {
                let src = Path::new(path);
                if !src
                    .join(crate::MARKETPLACE_MANIFEST_RELATIVE)
                    .is_file()
                {
                    return Err(MarketplaceError::invalid_layout(
                        name,
                        format!("{path} does not contain {}", crate::MARKETPLACE_MANIFEST_RELATIVE),
                    ));
                }
                copy_dir(src, staging)?;
                Ok(Fetched::complete())
            }
            MarketplaceSource::File { path } => {
                let body = std::fs::read_to_string(path)?;
                MarketplaceManifest::parse(name, &body)?;
                let manifest_path = staging.join(crate::MARKETPLACE_MANIFEST_RELATIVE);
                std::fs::create_dir_all(manifest_path.parent().expect("manifest has a parent"))?;
                std::fs::write(&manifest_path, body)?;
                Ok(Fetched::complete())
            }
            MarketplaceSource::Npm { package, version } => {
                self.fetch_npm(name, package, version.as_deref(), staging).await
            }
        }
    }

    async fn clone_into(
        &self,
        name: &str,
        url: &str,
        git_ref: Option<&str>,
        subtree: Option<&str>,
        staging: &Path,
    ) -> Result<Fetched> {
        let clone_dir = staging.join(".git-clone");
        let mut args: Vec<String> = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
        ];
        if let Some(git_ref) = git_ref {
            args.push("--branch".to_string());
            args.push(git_ref.to_string());
        }
        args.push(url.to_string());
        args.push(clone_dir.display().to_string());
        run_git(name, &args, None).await?;

        let commit = run_git(
            name,
            &["rev-parse".to_string(), "HEAD".to_string()],
            Some(&clone_dir),
        )
        .await?;
        let commit_sha = commit.trim().to_string();

        let src = match subtree {
            Some(path) => {
                let sub = clone_dir.join(path);
                if !sub.is_dir() {
                    return Err(MarketplaceError::invalid_layout(
                        name,
                        format!("path '{path}' does not exist in {url}"),
                    ));
                }
                sub
            }
            None => clone_dir.clone(),
        };
        copy_dir(&src, staging)?;
        std::fs::remove_dir_all(&clone_dir)?;
        Ok(Fetched {
            mode: MaterializationMode::Complete,
            etag: None,
            commit_sha: Some(commit_sha),
            warnings: Vec::new(),
        })
    }

    async fn fetch_url_marketplace(
        &self,
        name: &str,
        url: &str,
        headers: Option<&std::collections::BTreeMap<String, String>>,
        materialization: Materialization,
        staging: &Path,
    ) -> Result<Fetched> {
        let mut request = self.client.get(url);
        if let Some(headers) = headers {
            for (key, value) in headers {
                let value = expand_env(name, value)?;
                request = request.header(key.as_str(), value);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;
        if !response.status().is_success() {
            return Err(MarketplaceError::fetch(
                name,
                format!("HTTP {} from {url}", response.status()),
            ));
        }
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .text()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;
        let mut manifest = MarketplaceManifest::parse(name, &body)?;

        let mut warnings = Vec::new();
        let mode = match materialization {
            Materialization::MetadataOnly => {
                warnings.push(format!(
                    "marketplace '{name}' is metadata-only: the agent will need credentials inside the sandbox to fetch its plugins"
                ));
                MaterializationMode::MetadataOnly
            }
            Materialization::SelfContained | Materialization::BestEffort => {
                let best_effort = materialization == Materialization::BestEffort;
                self.localize_plugins(name, &mut manifest, staging, best_effort, &mut warnings)
                    .await?;
                MaterializationMode::SelfContained
            }
        };

        let manifest_path = staging.join(crate::MARKETPLACE_MANIFEST_RELATIVE);
        std::fs::create_dir_all(manifest_path.parent().expect("manifest has a parent"))?;
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| MarketplaceError::invalid_layout(name, e))?;
        std::fs::write(&manifest_path, body)?;

        Ok(Fetched {
            mode,
            etag,
            commit_sha: None,
            warnings,
        })
    }

    /// Download each plugin's remote artifact and rewrite its source to a
    /// local relative path.
    async fn localize_plugins(
        &self,
        name: &str,
        manifest: &mut MarketplaceManifest,
        staging: &Path,
        best_effort: bool,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        for plugin in &mut manifest.plugins {
            let source = plugin.source.clone();
            if !source.starts_with("http://") && !source.starts_with("https://") {
                continue;
            }
            let file_name = source
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("artifact");
            let relative = format!("artifacts/{}/{file_name}", plugin.name);
            let target = staging.join(&relative);

            match self.download(name, &source, &target).await {
                Ok(()) => {
                    plugin.source = relative;
                }
                Err(e) if best_effort => {
                    warnings.push(format!(
                        "marketplace '{name}': plugin '{}' stays remote ({e})",
                        plugin.name
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn download(&self, name: &str, url: &str, target: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;
        if !response.status().is_success() {
            return Err(MarketplaceError::fetch(
                name,
                format!("HTTP {} from {url}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &bytes)?;
        Ok(())
    }

    async fn fetch_npm(
        &self,
        name: &str,
        package: &str,
        version: Option<&str>,
        staging: &Path,
    ) -> Result<Fetched> {
        let (tarball_url, resolved) =
            npm::resolve_tarball_url(&self.client, name, package, version).await?;
        let response = self
            .client
            .get(&tarball_url)
            .send()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;
        if !response.status().is_success() {
            return Err(MarketplaceError::fetch(
                name,
                format!("HTTP {} fetching {package}@{resolved}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MarketplaceError::fetch(name, e))?;

        let unpack = staging.join(".npm-unpack");
        std::fs::create_dir_all(&unpack)?;
        let package_root = npm::extract_tarball(name, &bytes, &unpack)?;
        copy_dir(&package_root, staging)?;
        std::fs::remove_dir_all(&unpack)?;
        Ok(Fetched::complete())
    }
}

struct Fetched {
    mode: MaterializationMode,
    etag: Option<String>,
    commit_sha: Option<String>,
    warnings: Vec<String>,
}

impl Fetched {
    fn complete() -> Self {
        Self {
            mode: MaterializationMode::Complete,
            etag: None,
            commit_sha: None,
            warnings: Vec::new(),
        }
    }
}

/// Case-insensitive marketplace lookup returning the canonical name.
fn lookup_marketplace<'a>(
    org: &'a OrganizationConfig,
    name: &str,
) -> Option<(String, &'a scc_config::MarketplaceEntry)> {
    org.marketplaces
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(key, entry)| (key.clone(), entry))
}

/// Recursive copy, skipping `.git` directories.
fn copy_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == ".git" {
            continue;
        }
        let target = dest.join(&file_name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Expand `${VAR}` references from the host environment.
fn expand_env(marketplace: &str, value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(MarketplaceError::fetch(
                marketplace,
                format!("unterminated ${{...}} in header value '{value}'"),
            ));
        };
        let var = &after[..end];
        let resolved = std::env::var(var).map_err(|_| {
            MarketplaceError::fetch(
                marketplace,
                format!("environment variable ${var} referenced by a header is not set"),
            )
        })?;
        out.push_str(&resolved);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Run a git subprocess with a timeout, returning trimmed stdout.
async fn run_git(marketplace: &str, args: &[String], cwd: Option<&Path>) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    command.kill_on_drop(true);

    let output = tokio::time::timeout(GIT_TIMEOUT, command.output())
        .await
        .map_err(|_| {
            MarketplaceError::git(
                marketplace,
                format!("git {} timed out after {}s", args.join(" "), GIT_TIMEOUT.as_secs()),
            )
        })?
        .map_err(|e| MarketplaceError::git(marketplace, e))?;

    if !output.status.success() {
        return Err(MarketplaceError::git(
            marketplace,
            format!(
                "git {} exited with {}: {}",
                args.first().map(String::as_str).unwrap_or(""),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scc_config::OrganizationConfig;

    fn org_with_directory_market(dir: &Path) -> OrganizationConfig {
        let raw = format!(
            r#"{{
                "organization": {{"name": "Acme"}},
                "marketplaces": {{
                    "internal": {{"source": {{"source": "directory", "path": {:?}}}}}
                }}
            }}"#,
            dir.display().to_string()
        );
        OrganizationConfig::from_json(&raw).unwrap()
    }

    fn write_marketplace_tree(dir: &Path) {
        let manifest_dir = dir.join(".claude-plugin");
        std::fs::create_dir_all(&manifest_dir).unwrap();
        std::fs::write(
            manifest_dir.join("marketplace.json"),
            r#"{
                "name": "internal",
                "owner": {"name": "Platform"},
                "plugins": [{"name": "api-tools", "source": "plugins/api-tools"}]
            }"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.join("plugins/api-tools")).unwrap();
        std::fs::write(dir.join("plugins/api-tools/plugin.json"), "{}").unwrap();
    }

    #[tokio::test]
    async fn directory_source_materializes_and_reuses() {
        let source_dir = tempfile::tempdir().unwrap();
        write_marketplace_tree(source_dir.path());
        let workspace = tempfile::tempdir().unwrap();
        let org = org_with_directory_market(source_dir.path());

        let materializer = Materializer::new(workspace.path()).unwrap();
        let required: BTreeSet<String> = ["internal".to_string()].into();

        let report = materializer.materialize(&required, &org, false).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.materialized.len(), 1);
        let (entry, outcome) = &report.materialized[0];
        assert_eq!(*outcome, MaterializeOutcome::Fetched);
        assert_eq!(entry.relative_path, ".claude/.scc-marketplaces/internal");
        assert_eq!(entry.plugins_included, vec!["api-tools"]);
        assert!(
            workspace
                .path()
                .join(".claude/.scc-marketplaces/internal/.claude-plugin/marketplace.json")
                .is_file()
        );

        // Second run reuses the fresh entry.
        let report = materializer.materialize(&required, &org, false).await.unwrap();
        assert_eq!(report.materialized[0].1, MaterializeOutcome::Reused);

        // Force refetches.
        let report = materializer.materialize(&required, &org, true).await.unwrap();
        assert_eq!(report.materialized[0].1, MaterializeOutcome::Fetched);
    }

    #[tokio::test]
    async fn unknown_marketplace_is_a_per_source_failure() {
        let workspace = tempfile::tempdir().unwrap();
        let org = OrganizationConfig::from_json(r#"{"organization": {"name": "Acme"}}"#).unwrap();
        let materializer = Materializer::new(workspace.path()).unwrap();
        let required: BTreeSet<String> = ["ghost".to_string()].into();

        let report = materializer.materialize(&required, &org, false).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, MarketplaceError::Unknown(_)));
    }

    #[tokio::test]
    async fn file_source_wraps_bare_manifest() {
        let source_dir = tempfile::tempdir().unwrap();
        let manifest_file = source_dir.path().join("marketplace.json");
        std::fs::write(
            &manifest_file,
            r#"{"name": "files", "owner": {"name": "O"}, "plugins": []}"#,
        )
        .unwrap();

        let raw = format!(
            r#"{{
                "organization": {{"name": "Acme"}},
                "marketplaces": {{
                    "files": {{"source": {{"source": "file", "path": {:?}}}}}
                }}
            }}"#,
            manifest_file.display().to_string()
        );
        let org = OrganizationConfig::from_json(&raw).unwrap();
        let workspace = tempfile::tempdir().unwrap();
        let materializer = Materializer::new(workspace.path()).unwrap();
        let required: BTreeSet<String> = ["files".to_string()].into();

        let report = materializer.materialize(&required, &org, false).await.unwrap();
        assert!(report.is_complete());
        assert!(
            workspace
                .path()
                .join(".claude/.scc-marketplaces/files/.claude-plugin/marketplace.json")
                .is_file()
        );
    }

    #[tokio::test]
    async fn invalid_directory_layout_fails_that_source() {
        let source_dir = tempfile::tempdir().unwrap(); // no manifest inside
        let workspace = tempfile::tempdir().unwrap();
        let org = org_with_directory_market(source_dir.path());
        let materializer = Materializer::new(workspace.path()).unwrap();
        let required: BTreeSet<String> = ["internal".to_string()].into();

        let report = materializer.materialize(&required, &org, false).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].1,
            MarketplaceError::InvalidLayout { .. }
        ));
        // No partial tree was promoted.
        assert!(!workspace.path().join(".claude/.scc-marketplaces/internal").exists());
    }

    #[test]
    fn env_expansion_handles_tokens() {
        // SAFETY: test-only env mutation before any concurrent reads.
        unsafe { std::env::set_var("SCC_TEST_HDR_TOKEN", "t0ps3cret") };
        let out = expand_env("m", "Bearer ${SCC_TEST_HDR_TOKEN}").unwrap();
        assert_eq!(out, "Bearer t0ps3cret");
        assert!(expand_env("m", "x ${SCC_TEST_UNSET_VAR}").is_err());
        assert!(expand_env("m", "x ${unterminated").is_err());
    }
}
