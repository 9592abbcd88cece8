//! MCP server gating helpers.
//!
//! Stdio servers execute a command on the container host, so they get the
//! strictest treatment: disabled unless the org opts in, and when prefix
//! restrictions are configured the command must real-path under one of
//! them. Lexical `..` tricks are resolved before the comparison.

use std::path::{Component, Path, PathBuf};

/// Resolve a command path for prefix checking.
///
/// Uses the real path when the file exists; otherwise normalizes `.` and
/// `..` components lexically so traversal attempts cannot dodge the check by
/// pointing at a non-existent file.
pub fn normalize_command_path(command: &str) -> PathBuf {
    let path = Path::new(command);
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    lexical_normalize(path)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// True if `path` sits under one of `prefixes` (after normalizing both).
///
/// An empty prefix list means no restriction.
pub fn path_under_prefixes(path: &Path, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    prefixes.iter().any(|prefix| {
        let normalized = lexical_normalize(Path::new(prefix));
        path.starts_with(&normalized)
    })
}

/// Extract the host from an HTTP/SSE server URL for blocklist matching.
pub fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host_port = rest.split(['/', '?', '#']).next()?;
    let host = host_port.rsplit_once(':').map_or(host_port, |(h, port)| {
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host_port
        }
    });
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_normalized_lexically() {
        let path = normalize_command_path("/usr/local/bin/../etc/passwd");
        assert_eq!(path, PathBuf::from("/usr/local/etc/passwd"));
    }

    #[test]
    fn missing_file_still_normalizes() {
        let path = normalize_command_path("/usr/local/bin/definitely-not-a-real-tool");
        assert_eq!(
            path,
            PathBuf::from("/usr/local/bin/definitely-not-a-real-tool")
        );
    }

    #[test]
    fn prefix_check_respects_boundaries() {
        let prefixes = vec!["/usr/local/bin/".to_string()];
        assert!(path_under_prefixes(
            Path::new("/usr/local/bin/tool"),
            &prefixes
        ));
        assert!(!path_under_prefixes(
            Path::new("/usr/local/etc/passwd"),
            &prefixes
        ));
        // Empty list means unrestricted.
        assert!(path_under_prefixes(Path::new("/anywhere"), &[]));
    }

    #[test]
    fn url_host_extracts_hosts() {
        assert_eq!(
            url_host("https://mcp.acme.dev/v1/sse").as_deref(),
            Some("mcp.acme.dev")
        );
        assert_eq!(
            url_host("https://mcp.acme.dev:8443/v1").as_deref(),
            Some("mcp.acme.dev")
        );
        assert_eq!(url_host("not a url"), None);
    }
}
