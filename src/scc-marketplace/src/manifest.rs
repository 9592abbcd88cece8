//! Marketplace and cache manifest schemas.
//!
//! Two distinct files share this module:
//! - `marketplace.json` - the registry's own manifest, validated after fetch
//! - `.manifest.json` - our cache ledger mapping marketplace name to its
//!   materialized state

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scc_common::file_locking::atomic_write_json;

use crate::error::{MarketplaceError, Result};

/// `marketplace.json` inside `.claude-plugin/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceManifest {
    pub name: String,
    pub owner: MarketplaceOwner,
    #[serde(default)]
    pub metadata: MarketplaceMetadata,
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

/// Registry owner block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceOwner {
    pub name: String,
}

/// Free-form registry metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketplaceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One plugin listed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Relative path after materialization; may be a URL in a freshly
    /// fetched `url`-source manifest before rewriting.
    pub source: String,
}

impl MarketplaceManifest {
    /// Parse and validate a manifest body.
    pub fn parse(name: &str, body: &str) -> Result<Self> {
        let manifest: MarketplaceManifest = serde_json::from_str(body)
            .map_err(|e| MarketplaceError::invalid_layout(name, e))?;
        manifest.validate(name)?;
        Ok(manifest)
    }

    /// Load from a materialized tree.
    pub fn load(name: &str, marketplace_dir: &Path) -> Result<Self> {
        let path = marketplace_dir.join(crate::MARKETPLACE_MANIFEST_RELATIVE);
        let body = std::fs::read_to_string(&path).map_err(|e| {
            MarketplaceError::invalid_layout(
                name,
                format!("missing {}: {e}", crate::MARKETPLACE_MANIFEST_RELATIVE),
            )
        })?;
        Self::parse(name, &body)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MarketplaceError::invalid_layout(name, "empty name"));
        }
        if self.owner.name.trim().is_empty() {
            return Err(MarketplaceError::invalid_layout(name, "empty owner name"));
        }
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                return Err(MarketplaceError::invalid_layout(name, "plugin with empty name"));
            }
            if plugin.source.trim().is_empty() {
                return Err(MarketplaceError::invalid_layout(
                    name,
                    format!("plugin '{}' has an empty source", plugin.name),
                ));
            }
        }
        Ok(())
    }

    /// Validate that every plugin source is a relative path confined to the
    /// marketplace tree (the sandbox-safe invariant for materialized trees).
    pub fn validate_local_sources(&self, name: &str) -> Result<()> {
        for plugin in &self.plugins {
            let source = plugin.source.as_str();
            if source.starts_with("http://") || source.starts_with("https://") {
                continue; // metadata-only trees keep remote sources
            }
            let path = Path::new(source);
            if path.is_absolute() || source.starts_with('~') {
                return Err(MarketplaceError::invalid_layout(
                    name,
                    format!("plugin '{}' has an absolute source path", plugin.name),
                ));
            }
            if path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(MarketplaceError::invalid_layout(
                    name,
                    format!("plugin '{}' escapes the marketplace tree", plugin.name),
                ));
            }
        }
        Ok(())
    }

    /// Names of all listed plugins.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }
}

/// How complete a materialized tree is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationMode {
    /// Full tree copied from the source.
    Complete,
    /// Manifest plus downloaded plugin artifacts.
    SelfContained,
    /// Manifest only; artifacts stay remote.
    MetadataOnly,
}

/// Cache ledger entry for one marketplace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedMarketplace {
    pub name: String,
    pub source_type: String,
    /// Identity of the source, used to detect config changes.
    pub source_id: String,
    /// Workspace-relative path of the materialized tree.
    pub relative_path: String,
    pub plugins_included: Vec<String>,
    pub mode: MaterializationMode,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

/// `.manifest.json` at the cache root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    pub marketplaces: BTreeMap<String, MaterializedMarketplace>,
}

impl CacheManifest {
    /// Load from the cache root; missing or corrupt reads as empty (the
    /// trees are re-validated anyway).
    pub fn load(cache_root: &Path) -> Self {
        let path = cache_root.join(".manifest.json");
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Persist atomically.
    pub fn save(&self, cache_root: &Path) -> Result<()> {
        atomic_write_json(cache_root.join(".manifest.json"), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "name": "internal",
        "owner": {"name": "Platform Team"},
        "metadata": {"description": "Acme internal plugins"},
        "plugins": [
            {"name": "api-tools", "source": "plugins/api-tools"},
            {"name": "db-helper", "description": "DB helpers", "source": "plugins/db-helper"}
        ]
    }"#;

    #[test]
    fn valid_manifest_parses() {
        let manifest = MarketplaceManifest::parse("internal", VALID).unwrap();
        assert_eq!(manifest.plugin_names(), vec!["api-tools", "db-helper"]);
        manifest.validate_local_sources("internal").unwrap();
    }

    #[test]
    fn empty_owner_is_invalid() {
        let raw = r#"{"name": "x", "owner": {"name": ""}, "plugins": []}"#;
        assert!(MarketplaceManifest::parse("x", raw).is_err());
    }

    #[test]
    fn absolute_plugin_source_is_invalid() {
        let raw = r#"{
            "name": "x", "owner": {"name": "o"},
            "plugins": [{"name": "p", "source": "/Users/someone/plugins/p"}]
        }"#;
        let manifest = MarketplaceManifest::parse("x", raw).unwrap();
        assert!(manifest.validate_local_sources("x").is_err());
    }

    #[test]
    fn escaping_plugin_source_is_invalid() {
        let raw = r#"{
            "name": "x", "owner": {"name": "o"},
            "plugins": [{"name": "p", "source": "../outside"}]
        }"#;
        let manifest = MarketplaceManifest::parse("x", raw).unwrap();
        assert!(manifest.validate_local_sources("x").is_err());
    }

    #[test]
    fn cache_manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CacheManifest::default();
        cache.marketplaces.insert(
            "internal".to_string(),
            MaterializedMarketplace {
                name: "internal".to_string(),
                source_type: "github".to_string(),
                source_id: "github:acme/plugins".to_string(),
                relative_path: ".claude/.scc-marketplaces/internal".to_string(),
                plugins_included: vec!["api-tools".to_string()],
                mode: MaterializationMode::Complete,
                fetched_at: Utc::now(),
                etag: None,
                commit_sha: Some("0123abcd".to_string()),
            },
        );
        cache.save(dir.path()).unwrap();

        let back = CacheManifest::load(dir.path());
        assert_eq!(back.marketplaces["internal"].source_type, "github");
    }

    #[test]
    fn corrupt_cache_manifest_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".manifest.json"), b"{oops").unwrap();
        assert!(CacheManifest::load(dir.path()).marketplaces.is_empty());
    }
}
