//! Time-bounded exception store.
//!
//! Local exceptions live in JSON files (user config dir and, optionally,
//! `<workspace>/.scc/exceptions.json`). Policy-scope exceptions travel
//! inside the org config. Reads tolerate a missing file; a corrupt file is
//! renamed `*.bak-YYYYMMDD` and replaced with an empty store. Writes are
//! atomic and prune expired entries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use scc_common::file_locking::atomic_write_json;
use scc_config::{Exception, ExceptionScope};

use crate::error::{PolicyError, Result};

/// Store schema version.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ExceptionsFile {
    version: u32,
    #[serde(default)]
    exceptions: Vec<Exception>,
}

impl Default for ExceptionsFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            exceptions: Vec::new(),
        }
    }
}

/// One on-disk exception file.
#[derive(Debug, Clone)]
pub struct ExceptionStore {
    path: PathBuf,
}

impl ExceptionStore {
    /// Open the store at `path`. The file may not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all entries, including expired ones (pruned on next write).
    ///
    /// A corrupt file is backed up and treated as empty.
    pub fn load(&self) -> Result<Vec<Exception>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<ExceptionsFile>(&raw) {
            Ok(file) => Ok(file.exceptions),
            Err(e) => {
                let backup = self.backup_path(Utc::now());
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "exception store corrupt, backing up and starting empty"
                );
                std::fs::rename(&self.path, &backup)?;
                Ok(Vec::new())
            }
        }
    }

    /// Entries whose `expires_at` is still in the future.
    pub fn active(&self, now: DateTime<Utc>) -> Result<Vec<Exception>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| !e.is_expired(now))
            .collect())
    }

    /// Add an entry and persist. Expired entries are pruned on the way out.
    pub fn add(&self, exception: Exception) -> Result<()> {
        exception
            .validate()
            .map_err(|e| PolicyError::Store(e.to_string()))?;
        let mut exceptions = self.load()?;
        if exceptions.iter().any(|e| e.id == exception.id) {
            return Err(PolicyError::Store(format!(
                "exception '{}' already exists",
                exception.id
            )));
        }
        exceptions.push(exception);
        self.save(exceptions, Utc::now())
    }

    /// Remove an entry by id. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut exceptions = self.load()?;
        let before = exceptions.len();
        exceptions.retain(|e| e.id != id);
        let removed = exceptions.len() != before;
        if removed {
            self.save(exceptions, Utc::now())?;
        }
        Ok(removed)
    }

    fn save(&self, exceptions: Vec<Exception>, now: DateTime<Utc>) -> Result<()> {
        let file = ExceptionsFile {
            version: STORE_VERSION,
            exceptions: exceptions
                .into_iter()
                .filter(|e| !e.is_expired(now))
                .collect(),
        };
        atomic_write_json(&self.path, &file)?;
        Ok(())
    }

    fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(format!(".bak-{}", now.format("%Y%m%d")));
        PathBuf::from(os)
    }
}

/// Gather active exceptions from every source feeding one evaluation:
/// policy scope from the org config, local scope from the user store and the
/// optional repo store.
pub fn collect_active(
    policy_scope: &[Exception],
    user_store: &ExceptionStore,
    repo_store: Option<&ExceptionStore>,
    now: DateTime<Utc>,
) -> Result<Vec<Exception>> {
    let mut all: Vec<Exception> = policy_scope
        .iter()
        .filter(|e| !e.is_expired(now))
        .cloned()
        .collect();
    for exception in user_store.active(now)? {
        push_local(&mut all, exception);
    }
    if let Some(store) = repo_store {
        for exception in store.active(now)? {
            push_local(&mut all, exception);
        }
    }
    Ok(all)
}

/// Local files can only contribute local-scope entries; a policy-scope entry
/// in a local file would be privilege escalation and is dropped.
fn push_local(all: &mut Vec<Exception>, exception: Exception) {
    if exception.scope == ExceptionScope::Policy {
        warn!(id = %exception.id, "ignoring policy-scope exception from a local store");
        return;
    }
    all.push(exception);
}
