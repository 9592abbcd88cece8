//! OS-aware path detection for SCC state.
//!
//! - **Linux**: config `~/.config/scc/`, cache `~/.cache/scc/`
//! - **macOS**: config and cache under `~/Library/Application Support/scc/`
//!   and `~/Library/Caches/scc/`
//! - **Windows**: `%APPDATA%\scc\` and `%LOCALAPPDATA%\scc\`
//!
//! Workspace-anchored files (`.scc.yaml`, `.claude/`) are computed relative
//! to the resolved workspace, not here, so they stay visible inside the
//! sandbox mount.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StorageError};

/// Application directory name.
pub const APP_NAME: &str = "scc";

/// File names under the user config directory.
pub const USER_CONFIG_FILE: &str = "config.json";
pub const SESSIONS_LOG_FILE: &str = "sessions.jsonl";
pub const EXCEPTIONS_FILE: &str = "exceptions.json";

/// File names under the user cache directory.
pub const ORG_CONFIG_CACHE_FILE: &str = "org_config.json";
pub const CACHE_META_FILE: &str = "cache_meta.json";
pub const CONTEXTS_FILE: &str = "contexts.json";
pub const USAGE_LOG_FILE: &str = "usage.jsonl";

/// SCC state paths container.
#[derive(Debug, Clone)]
pub struct SccPaths {
    /// User configuration directory.
    pub config_dir: PathBuf,
    /// User cache directory.
    pub cache_dir: PathBuf,
}

impl SccPaths {
    /// Detect paths for the current OS, honoring `SCC_CONFIG_DIR` and
    /// `SCC_CACHE_DIR` overrides.
    pub fn new() -> Result<Self> {
        let config_dir = match env_dir("SCC_CONFIG_DIR") {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or(StorageError::HomeDirNotFound)?
                .join(APP_NAME),
        };
        let cache_dir = match env_dir("SCC_CACHE_DIR") {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .ok_or(StorageError::HomeDirNotFound)?
                .join(APP_NAME),
        };
        Ok(Self {
            config_dir,
            cache_dir,
        })
    }

    /// Build paths from explicit roots (used by tests).
    pub fn from_roots(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Create both directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        debug!(config_dir = %self.config_dir.display(), cache_dir = %self.cache_dir.display(), "storage directories ready");
        Ok(())
    }

    /// `config.json` - org URL, selected team, auth spec, preferences.
    pub fn user_config_file(&self) -> PathBuf {
        self.config_dir.join(USER_CONFIG_FILE)
    }

    /// `sessions.jsonl` - append-only session log.
    pub fn sessions_log(&self) -> PathBuf {
        self.config_dir.join(SESSIONS_LOG_FILE)
    }

    /// `exceptions.json` - user-scope exceptions.
    pub fn user_exceptions_file(&self) -> PathBuf {
        self.config_dir.join(EXCEPTIONS_FILE)
    }

    /// `org_config.json` - cached remote org config body.
    pub fn org_config_cache(&self) -> PathBuf {
        self.cache_dir.join(ORG_CONFIG_CACHE_FILE)
    }

    /// `cache_meta.json` - ETag and fetch timestamps.
    pub fn cache_meta_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_META_FILE)
    }

    /// `contexts.json` - work-context list.
    pub fn contexts_file(&self) -> PathBuf {
        self.cache_dir.join(CONTEXTS_FILE)
    }

    /// `usage.jsonl` - session usage events.
    pub fn usage_log(&self) -> PathBuf {
        self.cache_dir.join(USAGE_LOG_FILE)
    }

    /// Repo-scope exceptions file inside a workspace.
    pub fn workspace_exceptions_file(workspace: &Path) -> PathBuf {
        workspace.join(".scc").join(EXCEPTIONS_FILE)
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    match std::env::var(var) {
        Ok(val) if !val.is_empty() => {
            debug!(var, path = %val, "using directory override");
            Some(PathBuf::from(val))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_follow_layout() {
        let paths = SccPaths::from_roots("/cfg", "/cache");
        assert_eq!(paths.user_config_file(), PathBuf::from("/cfg/config.json"));
        assert_eq!(paths.sessions_log(), PathBuf::from("/cfg/sessions.jsonl"));
        assert_eq!(
            paths.user_exceptions_file(),
            PathBuf::from("/cfg/exceptions.json")
        );
        assert_eq!(
            paths.org_config_cache(),
            PathBuf::from("/cache/org_config.json")
        );
        assert_eq!(paths.contexts_file(), PathBuf::from("/cache/contexts.json"));
        assert_eq!(paths.usage_log(), PathBuf::from("/cache/usage.jsonl"));
    }

    #[test]
    fn workspace_exceptions_are_repo_scoped() {
        let path = SccPaths::workspace_exceptions_file(Path::new("/work/repo"));
        assert_eq!(path, PathBuf::from("/work/repo/.scc/exceptions.json"));
    }
}
