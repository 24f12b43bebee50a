//! Registry Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use crate::models::EntryStatus;
use derive_more::{Display, Error};
use uuid::Uuid;

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("registry entry not found: {_0}")]
    NotFound(#[error(not(source))] Uuid),
    /// Another writer got there first: a concurrent insert for the same
    /// cached path, or a status change that raced with ours. Nothing was
    /// written; re-read and decide again.
    #[display("registry conflict: {_0}")]
    Conflict(#[error(not(source))] String),
    /// The requested status change is not allowed from the current status.
    #[display("cannot move entry from {from} to {to}")]
    InvalidTransition { from: EntryStatus, to: EntryStatus },
    #[display("could not parse {field}: {value}")]
    ParseError { field: &'static str, value: String },
    /// Serialization/deserialization error.
    #[display("invalid registry data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Conflict(_))
    }
}
