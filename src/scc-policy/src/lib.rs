//! SCC Policy - the effective-config engine.
//!
//! This crate decides what a launch is allowed to use:
//! - `Allow` paths: org defaults plus delegated team/project additions
//! - `Deny` paths: missing delegation, not in the allowed set
//! - `Block` paths: org security patterns no team or project can override
//!
//! # Pipeline
//!
//! ```text
//! org defaults ──┐
//! team profile ──┼─ normalize ─ union ─ disable ─ allow-list ─ delegation
//! project file ──┘                                                │
//!                                                                 ▼
//!                      security blocks ── exceptions ── MCP gates ── EffectiveConfig
//! ```
//!
//! Every retention and removal lands in the decision log, so
//! `scc config explain` can show why a plugin is or is not present.

mod engine;
mod error;
mod exceptions;
mod mcp;
mod pattern;
mod plugin_ref;

#[cfg(test)]
mod tests;

pub use engine::{
    BlockKind, BlockedItem, DecisionRecord, DeniedItem, DenyKind, EffectiveConfig, Layer,
    PolicyInput, compute_effective_config,
};
pub use error::{PolicyError, Result};
pub use exceptions::{ExceptionStore, collect_active};
pub use mcp::{normalize_command_path, path_under_prefixes, url_host};
pub use pattern::{image_matches, image_matches_any, matches, matches_any, normalize_image};
pub use plugin_ref::{PluginRef, normalize};
