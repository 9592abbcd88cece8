//! Glob pattern matching for plugin refs, MCP server names, and images.
//!
//! Shell-style globs (`*`, `?`, `[]`), case-insensitive under Unicode
//! lowercasing. A pattern containing `@` compares against the full
//! `name@marketplace` form; otherwise only the name half is compared.

use glob::Pattern;

use crate::plugin_ref::PluginRef;

/// True if `id` matches `pattern`.
pub fn matches(id: &PluginRef, pattern: &str) -> bool {
    let pattern_lower = pattern.to_lowercase();
    let Ok(glob) = Pattern::new(&pattern_lower) else {
        return false;
    };
    if pattern_lower.contains('@') {
        glob.matches(&id.folded())
    } else {
        glob.matches(&id.folded_name())
    }
}

/// First pattern in `patterns` matching `id`, in input order.
pub fn matches_any<'a>(id: &PluginRef, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| matches(id, p))
        .map(String::as_str)
}

/// Case-insensitive glob match of a plain string (MCP server names, hosts,
/// team names).
pub fn matches_str(id: &str, pattern: &str) -> bool {
    Pattern::new(&pattern.to_lowercase())
        .map(|g| g.matches(&id.to_lowercase()))
        .unwrap_or(false)
}

/// First pattern matching a plain string.
pub fn matches_any_str<'a>(id: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| matches_str(id, p))
        .map(String::as_str)
}

/// Normalize an image reference: an image without a tag is treated as
/// `:latest`. A `:` before the last `/` is a registry port, not a tag.
pub fn normalize_image(image: &str) -> String {
    let tail = image.rsplit('/').next().unwrap_or(image);
    if tail.contains(':') {
        image.to_string()
    } else {
        format!("{image}:latest")
    }
}

/// Match an image against a blocklist pattern.
///
/// The image is tag-normalized first. A literal pattern (no glob
/// metacharacters) without a tag is normalized the same way so that
/// blocking `ubuntu` blocks `ubuntu:latest` and nothing else.
pub fn image_matches(image: &str, pattern: &str) -> bool {
    let image = normalize_image(image);
    let is_literal = !pattern.contains(['*', '?', '[']);
    let pattern = if is_literal {
        normalize_image(pattern)
    } else {
        pattern.to_string()
    };
    matches_str(&image, &pattern)
}

/// First blocklist pattern matching the image.
pub fn image_matches_any<'a>(image: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| image_matches(image, p))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> PluginRef {
        let (name, marketplace) = s.split_once('@').unwrap();
        PluginRef::new(name, marketplace)
    }

    #[test]
    fn name_only_pattern_ignores_marketplace() {
        assert!(matches(&r("crypto-analyzer@internal"), "crypto-*"));
        assert!(matches(&r("crypto-analyzer@other"), "crypto-*"));
        assert!(!matches(&r("api-tools@internal"), "crypto-*"));
    }

    #[test]
    fn full_pattern_compares_both_halves() {
        assert!(matches(&r("crypto-analyzer@internal"), "crypto-*@internal"));
        assert!(!matches(&r("crypto-analyzer@other"), "crypto-*@internal"));
        assert!(matches(&r("api-tools@internal"), "*@internal"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(matches(&r("Crypto-Analyzer@Internal"), "crypto-*"));
        assert!(matches(&r("crypto-analyzer@internal"), "CRYPTO-*@INTERNAL"));
        assert!(matches_str("Straße-Server", "straße-*"));
    }

    #[test]
    fn first_match_wins_deterministically() {
        let patterns = vec!["nope-*".to_string(), "crypto-*".to_string(), "*".to_string()];
        assert_eq!(
            matches_any(&r("crypto-analyzer@internal"), &patterns),
            Some("crypto-*")
        );
    }

    #[test]
    fn untagged_image_becomes_latest() {
        assert_eq!(normalize_image("ubuntu"), "ubuntu:latest");
        assert_eq!(normalize_image("ubuntu:22.04"), "ubuntu:22.04");
        // Registry port is not a tag.
        assert_eq!(
            normalize_image("registry.acme.dev:5000/base"),
            "registry.acme.dev:5000/base:latest"
        );
    }

    #[test]
    fn literal_image_pattern_is_tag_normalized() {
        assert!(image_matches("ubuntu", "ubuntu"));
        assert!(image_matches("ubuntu:latest", "ubuntu"));
        assert!(!image_matches("ubuntu:22.04", "ubuntu"));
        assert!(image_matches("ubuntu:22.04", "ubuntu*"));
        assert!(image_matches("registry.acme.dev:5000/base:dev", "*:dev"));
    }

    #[test]
    fn invalid_glob_matches_nothing() {
        assert!(!matches(&r("x@y"), "[unclosed"));
        assert!(!matches_str("x", "[unclosed"));
    }
}
