//! SCC Storage - OS-aware paths and persistent state.
//!
//! On-disk state owned by this crate:
//! - `SessionStore` - append-only session log (`sessions.jsonl`)
//! - `ContextStore` - bounded work-context list (`contexts.json`)
//! - usage events (`usage.jsonl`, best-effort)
//!
//! In-memory copies are snapshots; the disk store is authoritative.

mod contexts;
mod error;
mod paths;
mod sessions;
mod usage;

pub use contexts::{ContextStore, WorkContext};
pub use error::{Result, StorageError};
pub use paths::SccPaths;
pub use sessions::{SessionRecord, SessionStatus, SessionStore};
pub use usage::{UsageEvent, UsageEventKind, append_usage};
