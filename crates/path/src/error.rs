//! Path Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A path error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for path operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a path was rejected.
///
/// Split into malformed input (the caller sent garbage) and security
/// violations (the caller sent something that looks like an attack). See
/// [`is_security_violation`](Self::is_security_violation).
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input was empty, or only whitespace/separators.
    #[display("empty path")]
    Empty,
    /// Input exceeded the configured maximum length (in bytes).
    #[display("path exceeds {max} bytes ({length} bytes)")]
    TooLong { length: usize, max: usize },
    /// Input contained a `..` segment.
    #[display("path traversal attempt: {_0}")]
    Traversal(#[error(not(source))] String),
    /// Input contained a null byte or another control character.
    #[display("invalid character in path: {_0:?}")]
    InvalidCharacter(#[error(not(source))] String),
    /// Terminal filename is hidden or a reserved device name.
    #[display("reserved file name: {_0}")]
    ReservedName(#[error(not(source))] String),
    /// A configured root must be absolute.
    #[display("not an absolute path: {}", _0.display())]
    NotAbsolute(#[error(not(source))] PathBuf),
    /// Two mapping rules rewrite into the same local root.
    #[display("ambiguous mapping rules for local root: {}", _0.display())]
    AmbiguousRule(#[error(not(source))] PathBuf),
    /// No tier rule covers the given path.
    #[display("path is outside every configured tier: {}", _0.display())]
    OutsideTier(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if the rejected input looks like an injection or
    /// traversal attempt rather than an honest mistake.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Traversal(_) | Self::InvalidCharacter(_) | Self::ReservedName(_))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Path validation is pure: the same input fails the same way.
        false
    }
}
