//! SQLite registry of cached media files.
//!
//! The registry is the single source of truth for what the cache holds and
//! why. Unlike a scan of the cache directory, it remembers who asked for a
//! file, how it got there, and what the array copy is, so eviction can put
//! things back where they came from.
//!
//! # Architecture
//! Three tables:
//! - **Entries**: one row per cached file, keyed by a UUID. At most one
//!   entry per cached path is active at a time. Entries are never deleted
//!   directly: they move through
//!   `Active -> {Orphaned, PendingRemoval} -> Removed` and are purged once
//!   the retention window passes.
//! - **Attributions**: which users want an entry cached, and why. Removing
//!   the last one schedules the entry for eviction.
//! - **Operation log**: append-only audit records of every transfer and
//!   state change.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{
    Attribution, CacheMethod, CacheReason, CachedFileEntry, EntryStatus, NewEntry, NewOperation, OperationFilter,
    OperationLogEntry, OperationType, QueryFilter, ReasonStatistics, Statistics, UserId, UserStatistics,
};
pub use crate::repo::{IntegrityReport, Registry};
