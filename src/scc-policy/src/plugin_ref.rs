//! Plugin reference normalization.
//!
//! Canonical form is `name@marketplace`. Every plugin after resolution has an
//! explicit marketplace; bare names resolve through the single-marketplace
//! auto-assume rule. Display preserves the input case, matching and equality
//! use case-folded forms.

use std::fmt;

use serde::{Deserialize, Serialize};

use scc_config::is_implicit_marketplace;

use crate::error::{PolicyError, Result};

/// A normalized plugin reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginRef {
    name: String,
    marketplace: String,
}

impl PluginRef {
    /// Build from already-validated parts.
    pub fn new(name: impl Into<String>, marketplace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marketplace: marketplace.into(),
        }
    }

    /// Plugin name in input case.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marketplace name in input case.
    pub fn marketplace(&self) -> &str {
        &self.marketplace
    }

    /// Case-folded `name@marketplace` used for matching and equality.
    pub fn folded(&self) -> String {
        format!(
            "{}@{}",
            self.name.to_lowercase(),
            self.marketplace.to_lowercase()
        )
    }

    /// Case-folded name half.
    pub fn folded_name(&self) -> String {
        self.name.to_lowercase()
    }
}

impl fmt::Display for PluginRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.marketplace)
    }
}

// Equality and ordering are case-insensitive so `Api-Tools@Internal` and
// `api-tools@internal` collapse to one entry in the enabled set.
impl PartialEq for PluginRef {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}

impl Eq for PluginRef {}

impl PartialOrd for PluginRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl std::hash::Hash for PluginRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl TryFrom<String> for PluginRef {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self> {
        let (name, marketplace) = split_ref(&value)?;
        let marketplace = marketplace.ok_or_else(|| PolicyError::InvalidRef {
            reference: value.clone(),
            message: "marketplace is required in serialized form".to_string(),
        })?;
        Ok(PluginRef::new(name, marketplace))
    }
}

impl From<PluginRef> for String {
    fn from(r: PluginRef) -> Self {
        r.to_string()
    }
}

/// Split a raw reference into `(name, Option<marketplace>)`.
///
/// `@marketplace/name` and `name@marketplace` forms both parse; a bare name
/// returns `None` for the marketplace.
fn split_ref(raw: &str) -> Result<(String, Option<String>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PolicyError::InvalidRef {
            reference: raw.to_string(),
            message: "empty reference".to_string(),
        });
    }

    if let Some(rest) = raw.strip_prefix('@') {
        let Some((marketplace, name)) = rest.split_once('/') else {
            return Err(PolicyError::InvalidRef {
                reference: raw.to_string(),
                message: "expected @marketplace/name".to_string(),
            });
        };
        if marketplace.is_empty() || name.is_empty() {
            return Err(PolicyError::InvalidRef {
                reference: raw.to_string(),
                message: "marketplace and name must both be non-empty".to_string(),
            });
        }
        return Ok((name.to_string(), Some(marketplace.to_string())));
    }

    // Split on the *last* @ so plugin names containing @ keep working.
    if let Some(at) = raw.rfind('@') {
        let (name, marketplace) = (&raw[..at], &raw[at + 1..]);
        if name.is_empty() || marketplace.is_empty() {
            return Err(PolicyError::InvalidRef {
                reference: raw.to_string(),
                message: "marketplace and name must both be non-empty".to_string(),
            });
        }
        return Ok((name.to_string(), Some(marketplace.to_string())));
    }

    Ok((raw.to_string(), None))
}

/// Normalize a raw plugin reference against the configured marketplaces.
///
/// `org_marketplaces` are the org-declared names; implicit marketplaces are
/// always recognized unless `blocked_implicit` is set, and never count
/// toward the single-marketplace auto-assume rule.
pub fn normalize(
    raw: &str,
    org_marketplaces: &[String],
    blocked_implicit: bool,
) -> Result<PluginRef> {
    let (name, marketplace) = split_ref(raw)?;

    if let Some(marketplace) = marketplace {
        let known_org = org_marketplaces
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&marketplace));
        if known_org {
            return Ok(PluginRef::new(name, marketplace));
        }
        if is_implicit_marketplace(&marketplace) {
            if blocked_implicit {
                return Err(PolicyError::ImplicitBlocked {
                    reference: raw.trim().to_string(),
                    marketplace,
                });
            }
            return Ok(PluginRef::new(name, marketplace));
        }
        return Err(PolicyError::UnknownMarketplace {
            reference: raw.trim().to_string(),
            marketplace,
        });
    }

    // Bare name: auto-assume only when the choice is unambiguous.
    match org_marketplaces {
        [only] => Ok(PluginRef::new(name, only.clone())),
        [] if !blocked_implicit => Ok(PluginRef::new(
            name,
            scc_config::IMPLICIT_MARKETPLACES[0].to_string(),
        )),
        _ => Err(PolicyError::AmbiguousRef {
            reference: raw.trim().to_string(),
            available: org_marketplaces.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn explicit_forms_parse() {
        let r = normalize("api-tools@internal", &markets(&["internal"]), false).unwrap();
        assert_eq!(r.name(), "api-tools");
        assert_eq!(r.marketplace(), "internal");

        let r = normalize("@internal/api-tools", &markets(&["internal"]), false).unwrap();
        assert_eq!(r.to_string(), "api-tools@internal");
    }

    #[test]
    fn last_at_wins() {
        let r = normalize("scoped@pkg@internal", &markets(&["internal"]), false).unwrap();
        assert_eq!(r.name(), "scoped@pkg");
        assert_eq!(r.marketplace(), "internal");
    }

    #[test]
    fn empty_halves_are_rejected() {
        assert!(normalize("", &markets(&["internal"]), false).is_err());
        assert!(normalize("  ", &markets(&["internal"]), false).is_err());
        assert!(normalize("@internal/", &markets(&["internal"]), false).is_err());
        assert!(normalize("@/name", &markets(&["internal"]), false).is_err());
        assert!(normalize("name@", &markets(&["internal"]), false).is_err());
    }

    #[test]
    fn single_marketplace_is_assumed() {
        let r = normalize("api-tools", &markets(&["internal"]), false).unwrap();
        assert_eq!(r.marketplace(), "internal");
    }

    #[test]
    fn zero_marketplaces_fall_back_to_implicit() {
        let r = normalize("api-tools", &[], false).unwrap();
        assert_eq!(r.marketplace(), "claude-plugins-official");

        assert!(normalize("api-tools", &[], true).is_err());
    }

    #[test]
    fn two_marketplaces_are_ambiguous() {
        let err = normalize("api-tools", &markets(&["a", "b"]), false).unwrap_err();
        match err {
            PolicyError::AmbiguousRef { available, .. } => {
                assert_eq!(available, vec!["a", "b"]);
            }
            other => panic!("expected AmbiguousRef, got {other:?}"),
        }
    }

    #[test]
    fn unknown_marketplace_is_rejected() {
        assert!(matches!(
            normalize("x@nope", &markets(&["internal"]), false),
            Err(PolicyError::UnknownMarketplace { .. })
        ));
    }

    #[test]
    fn implicit_marketplace_respects_block() {
        assert!(normalize("x@claude-plugins-official", &[], false).is_ok());
        assert!(matches!(
            normalize("x@claude-plugins-official", &[], true),
            Err(PolicyError::ImplicitBlocked { .. })
        ));
    }

    #[test]
    fn equality_is_case_insensitive_display_preserves_case() {
        let a = PluginRef::new("Api-Tools", "Internal");
        let b = PluginRef::new("api-tools", "internal");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Api-Tools@Internal");
    }

    #[test]
    fn serde_uses_canonical_string() {
        let r = PluginRef::new("api-tools", "internal");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"api-tools@internal\"");
        let back: PluginRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
