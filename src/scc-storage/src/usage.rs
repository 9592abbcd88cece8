//! Best-effort usage event log (`usage.jsonl`).
//!
//! Usage events must never fail a command: errors are logged and swallowed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventKind {
    SessionStarted,
    SessionEnded,
}

/// One usage event line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub kind: UsageEventKind,
    pub session_id: String,
    pub team: String,
    pub workspace: PathBuf,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn session_started(session_id: impl Into<String>, team: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            kind: UsageEventKind::SessionStarted,
            session_id: session_id.into(),
            team: team.into(),
            workspace: workspace.into(),
            duration_secs: None,
            at: Utc::now(),
        }
    }

    pub fn session_ended(
        session_id: impl Into<String>,
        team: impl Into<String>,
        workspace: impl Into<PathBuf>,
        duration_secs: u64,
    ) -> Self {
        Self {
            kind: UsageEventKind::SessionEnded,
            session_id: session_id.into(),
            team: team.into(),
            workspace: workspace.into(),
            duration_secs: Some(duration_secs),
            at: Utc::now(),
        }
    }
}

/// Append an event to `usage.jsonl`. Best-effort: failures are logged only.
pub fn append_usage(log_path: &Path, event: &UsageEvent) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        file.write_all(&line)
    })();

    if let Err(e) = result {
        debug!(path = %log_path.display(), error = %e, "usage event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("usage.jsonl");

        append_usage(&log, &UsageEvent::session_started("s1", "platform", "/work"));
        append_usage(
            &log,
            &UsageEvent::session_ended("s1", "platform", "/work", 1200),
        );

        let raw = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: UsageEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last.kind, UsageEventKind::SessionEnded);
        assert_eq!(last.duration_secs, Some(1200));
    }

    #[test]
    fn failures_are_swallowed() {
        // Path under a file, guaranteed to fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let log = blocker.join("usage.jsonl");
        append_usage(&log, &UsageEvent::session_started("s1", "t", "/w"));
    }
}
