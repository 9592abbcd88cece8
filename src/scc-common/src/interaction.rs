//! Interaction requests surfaced from the core to the frontend.
//!
//! The core never prompts. When a decision belongs to the user (protected
//! branch, suspicious workspace, divergent resume), the core returns an
//! [`InteractionRequest`] and the caller renders it, answers it from flags
//! in non-interactive runs, or aborts.

use serde::{Deserialize, Serialize};

/// The shape of interaction required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Yes/no confirmation.
    Confirm,
    /// Pick one of the offered options.
    Select,
    /// Free-form input.
    Input,
}

/// A prompt the frontend must resolve before the core can continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub kind: InteractionKind,
    /// Stable identifier, e.g. `protected-branch`.
    pub id: String,
    /// Human-readable prompt.
    pub label: String,
    /// Options for `Select` requests; option ids are stable.
    #[serde(default)]
    pub options: Vec<InteractionOption>,
    /// Default option id or input value, chosen by `--yes`.
    #[serde(default)]
    pub default: Option<String>,
}

/// One selectable option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionOption {
    pub id: String,
    pub label: String,
}

impl InteractionRequest {
    /// A confirmation prompt.
    pub fn confirm(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: InteractionKind::Confirm,
            id: id.into(),
            label: label.into(),
            options: Vec::new(),
            default: None,
        }
    }

    /// A selection prompt.
    pub fn select(
        id: impl Into<String>,
        label: impl Into<String>,
        options: Vec<InteractionOption>,
    ) -> Self {
        Self {
            kind: InteractionKind::Select,
            id: id.into(),
            label: label.into(),
            options,
            default: None,
        }
    }

    /// Set the default answer used by non-interactive `--yes` runs.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

impl InteractionOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_round_trips() {
        let req = InteractionRequest::select(
            "protected-branch",
            "Branch 'main' is protected",
            vec![
                InteractionOption::new("create-branch", "Create a new branch"),
                InteractionOption::new("continue-blocked", "Continue with pushes blocked"),
                InteractionOption::new("cancel", "Cancel"),
            ],
        )
        .with_default("create-branch");

        let json = serde_json::to_string(&req).unwrap();
        let back: InteractionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, InteractionKind::Select);
        assert_eq!(back.options.len(), 3);
        assert_eq!(back.default.as_deref(), Some("create-branch"));
    }
}
