//! SCC Common - Utilities and types shared across SCC crates.
//!
//! This crate provides:
//! - The error taxonomy with stable exit codes
//! - Advisory file locking and atomic writes
//! - Fuzzy string matching (worktree switching)
//! - HTTP client factory
//! - Interaction requests for core-to-frontend prompts

pub mod error;
pub mod file_locking;
pub mod fuzzy;
pub mod http;
pub mod interaction;

pub use error::{ErrorKind, SccError, SccResult};
pub use file_locking::{FileLock, LockOptions, atomic_write, atomic_write_json};
pub use fuzzy::{fuzzy_filter, fuzzy_score};
pub use interaction::{InteractionKind, InteractionRequest};
