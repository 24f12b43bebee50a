//! Cleanup Error Types
//!
//! Only failures that stop a whole pass are errors. Failures of single
//! entries are collected in the
//! [`CleanupResult`](crate::CleanupResult) and the pass carries on.

use derive_more::{Display, Error};

/// A cleanup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cleanup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The policy contradicts itself; checked once at startup.
    #[display("invalid cleanup policy: {_0}")]
    InvalidPolicy(#[error(not(source))] String),
    /// The registry could not be read, so no entry could be considered.
    #[display("registry unavailable")]
    Registry,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Registry)
    }
}
