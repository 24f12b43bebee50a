//! Orchestrator Error Types
//!
//! Failures of single files never surface here; they are part of the
//! [`BatchResult`](crate::BatchResult). These are the failures that stop a
//! whole operation.

use derive_more::{Display, Error};

/// An orchestrator error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("registry unavailable")]
    Registry,
    #[display("cleanup failed")]
    Cleanup,
    #[display("could not initialise logging")]
    Logging,
    /// Command-line input that could not be understood.
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Registry | Self::Cleanup)
    }
}
