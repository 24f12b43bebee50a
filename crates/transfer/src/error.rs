//! Transfer Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. The [`ErrorKind`] is what ends up in a
//! [`TransferResult`](crate::TransferResult); the full tree is logged.

use derive_more::{Display, Error};
use std::path::{Path, PathBuf};

/// A transfer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Every variant except [`IoFailure`](Self::IoFailure) guarantees that the
/// filesystem was not touched. `IoFailure` guarantees that partial artifacts
/// were cleaned up (best-effort) before it was returned.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unvalidated input; nothing was attempted.
    #[display("invalid request: {_0}")]
    InvalidRequest(#[error(not(source))] String),
    /// Traversal or injection attempt; always rejected.
    #[display("path security violation: {_0}")]
    PathSecurityViolation(#[error(not(source))] String),
    /// Preflight check failed; nothing was written.
    #[display("insufficient space: {required} bytes required, {available} bytes available")]
    InsufficientSpace { required: u64, available: u64 },
    /// Something already occupies the destination; it was left untouched.
    #[display("destination already exists: {}", _0.display())]
    DestinationExists(#[error(not(source))] PathBuf),
    /// Filesystem error while staging or publishing.
    #[display("I/O failure: {_0}")]
    IoFailure(#[error(not(source))] String),
}

impl ErrorKind {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub(crate) fn io(operation: &str, path: &Path) -> Self {
        Self::IoFailure(format!("{operation} {}", path.display()))
    }

    /// Returns `true` if retrying might succeed.
    ///
    /// Retrying is the orchestrator's call: a `Move` that failed after
    /// publishing must not try to remove its source twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IoFailure(_) | Self::InsufficientSpace { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::InsufficientSpace { required: 10, available: 3 }.to_string(),
            "insufficient space: 10 bytes required, 3 bytes available"
        );
        assert_eq!(
            ErrorKind::DestinationExists(PathBuf::from("/cache/x.mkv")).to_string(),
            "destination already exists: /cache/x.mkv"
        );
        assert_eq!(ErrorKind::io("copying", Path::new("/a")).to_string(), "I/O failure: copying /a");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::IoFailure("x".to_string()).is_retryable());
        assert!(!ErrorKind::DestinationExists(PathBuf::new()).is_retryable());
        assert!(!ErrorKind::PathSecurityViolation("..".to_string()).is_retryable());
    }
}
