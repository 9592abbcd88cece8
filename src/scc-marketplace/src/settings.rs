//! Agent settings rendering and the managed-state merger.
//!
//! The merger owns exactly the keys recorded in the managed-state ledger
//! (`.scc-managed.json`). Team switches remove those keys and write the new
//! fragment; keys the user added by hand are never touched. The managed
//! state write always follows a successful settings write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use scc_common::file_locking::atomic_write_json;
use scc_policy::EffectiveConfig;

use crate::error::{MarketplaceError, Result};
use crate::manifest::MaterializedMarketplace;

/// Settings keys the merger manages.
const MARKETPLACES_KEY: &str = "extraKnownMarketplaces";
const PLUGINS_KEY: &str = "enabledPlugins";

/// Ledger schema version.
const MANAGED_STATE_VERSION: u32 = 1;

/// The ledger of settings keys owned by scc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedState {
    pub version: u32,
    pub team: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub managed_marketplaces: Vec<String>,
    #[serde(default)]
    pub managed_plugins: Vec<String>,
}

impl ManagedState {
    fn empty(team: &str) -> Self {
        Self {
            version: MANAGED_STATE_VERSION,
            team: team.to_string(),
            last_updated: Utc::now(),
            managed_marketplaces: Vec::new(),
            managed_plugins: Vec::new(),
        }
    }
}

/// The settings fragment scc contributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsFragment {
    pub extra_known_marketplaces: BTreeMap<String, Value>,
    pub enabled_plugins: BTreeMap<String, bool>,
}

/// Render the settings fragment for an effective config and its
/// materialized marketplaces.
///
/// Every marketplace reference is a `directory` source with a
/// workspace-relative path; absolute paths would be invalid inside the
/// sandbox and are refused here. Implicit marketplaces are never emitted.
pub fn render_fragment(
    effective: &EffectiveConfig,
    materialized: &[MaterializedMarketplace],
) -> Result<SettingsFragment> {
    let mut fragment = SettingsFragment::default();

    for entry in materialized {
        let path = &entry.relative_path;
        if Path::new(path).is_absolute() || path.starts_with('~') {
            return Err(MarketplaceError::Settings(format!(
                "marketplace '{}' has a non-relative cache path '{path}'",
                entry.name
            )));
        }
        fragment.extra_known_marketplaces.insert(
            entry.name.clone(),
            json!({"source": {"source": "directory", "path": path}}),
        );
    }

    for plugin in &effective.enabled {
        fragment.enabled_plugins.insert(plugin.to_string(), true);
    }

    Ok(fragment)
}

/// Merges fragments into the agent settings file.
#[derive(Debug, Clone)]
pub struct SettingsMerger {
    settings_path: PathBuf,
    managed_path: PathBuf,
}

impl SettingsMerger {
    /// Merger for `<workspace>/.claude/settings.local.json` and its ledger.
    pub fn for_workspace(workspace: &Path) -> Self {
        let claude_dir = workspace.join(".claude");
        Self {
            settings_path: claude_dir.join("settings.local.json"),
            managed_path: claude_dir.join(".scc-managed.json"),
        }
    }

    /// The settings file path.
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Apply `fragment` for `team`: remove previously managed keys, overlay
    /// the fragment, write settings, then write the new ledger.
    pub fn apply(&self, fragment: &SettingsFragment, team: &str) -> Result<ManagedState> {
        let mut settings = self.load_settings()?;
        let managed = self.load_managed(team)?;

        let new_managed = merge(&mut settings, fragment, &managed, team);

        atomic_write_json(&self.settings_path, &settings)?;
        // Ledger write follows the settings write: a crash between the two
        // leaves extra managed keys behind, which the next merge removes.
        atomic_write_json(&self.managed_path, &new_managed)?;
        debug!(
            team,
            marketplaces = new_managed.managed_marketplaces.len(),
            plugins = new_managed.managed_plugins.len(),
            "settings merged"
        );
        Ok(new_managed)
    }

    fn load_settings(&self) -> Result<Value> {
        let raw = match std::fs::read_to_string(&self.settings_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(json!({})),
            Err(e) => return Err(e.into()),
        };
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            MarketplaceError::Settings(format!(
                "cannot parse {}: {e}; refusing to overwrite a file we cannot read",
                self.settings_path.display()
            ))
        })?;
        if !value.is_object() {
            return Err(MarketplaceError::Settings(format!(
                "{} is not a JSON object",
                self.settings_path.display()
            )));
        }
        Ok(value)
    }

    fn load_managed(&self, team: &str) -> Result<ManagedState> {
        let raw = match std::fs::read_to_string(&self.managed_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ManagedState::empty(team));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| {
            MarketplaceError::Settings(format!(
                "cannot parse {}: {e}",
                self.managed_path.display()
            ))
        })
    }
}

/// The merge algorithm. Pure so it can be tested without the filesystem.
fn merge(
    settings: &mut Value,
    fragment: &SettingsFragment,
    managed: &ManagedState,
    team: &str,
) -> ManagedState {
    let root = settings
        .as_object_mut()
        .expect("settings validated as an object");

    // 1. Remove every key we own. User-added keys stay.
    remove_managed_keys(root, MARKETPLACES_KEY, &managed.managed_marketplaces);
    remove_managed_keys(root, PLUGINS_KEY, &managed.managed_plugins);

    // 2. Overlay the new fragment.
    if !fragment.extra_known_marketplaces.is_empty() {
        let map = ensure_object(root, MARKETPLACES_KEY);
        for (name, source) in &fragment.extra_known_marketplaces {
            map.insert(name.clone(), source.clone());
        }
    }
    if !fragment.enabled_plugins.is_empty() {
        let map = ensure_object(root, PLUGINS_KEY);
        for (plugin, enabled) in &fragment.enabled_plugins {
            map.insert(plugin.clone(), Value::Bool(*enabled));
        }
    }

    // 3. Prune empty containers.
    for key in [MARKETPLACES_KEY, PLUGINS_KEY] {
        if root.get(key).and_then(Value::as_object).is_some_and(Map::is_empty) {
            root.remove(key);
        }
    }

    // 4. The new ledger is exactly what step 2 wrote.
    ManagedState {
        version: MANAGED_STATE_VERSION,
        team: team.to_string(),
        last_updated: Utc::now(),
        managed_marketplaces: fragment.extra_known_marketplaces.keys().cloned().collect(),
        managed_plugins: fragment.enabled_plugins.keys().cloned().collect(),
    }
}

fn remove_managed_keys(root: &mut Map<String, Value>, section: &str, keys: &[String]) {
    if let Some(map) = root.get_mut(section).and_then(Value::as_object_mut) {
        for key in keys {
            map.remove(key);
        }
    }
}

fn ensure_object<'a>(root: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    if !root.get(key).is_some_and(Value::is_object) {
        root.insert(key.to_string(), json!({}));
    }
    root.get_mut(key)
        .and_then(Value::as_object_mut)
        .expect("just inserted an object")
}
