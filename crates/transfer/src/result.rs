use crate::error::ErrorKind;
use derive_more::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Something that went wrong without failing the primary transfer.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum TransferWarning {
    /// The destination was published but the source is still in place, so
    /// the file now exists twice. Never retried: the next pass reconciles it.
    #[display("source not removed: {}: {reason}", path.display())]
    SourceNotRemoved { path: PathBuf, reason: String },
    /// A companion file failed; the primary media file is unaffected.
    #[display("companion {} failed: {error}", path.display())]
    Companion { path: PathBuf, error: ErrorKind },
}

/// The outcome of one [`TransferRequest`](crate::TransferRequest).
///
/// Produced exactly once per request and immutable afterwards.
#[derive(Debug, Clone)]
pub struct TransferResult {
    success: bool,
    bytes_transferred: u64,
    size: u64,
    source: PathBuf,
    destination: PathBuf,
    error: Option<ErrorKind>,
    duration: Duration,
    warnings: Vec<TransferWarning>,
    companions: Vec<PathBuf>,
}
impl TransferResult {
    pub(crate) fn succeeded(
        source: PathBuf,
        destination: PathBuf,
        bytes_transferred: u64,
        size: u64,
        duration: Duration,
        warnings: Vec<TransferWarning>,
        companions: Vec<PathBuf>,
    ) -> Self {
        Self {
            success: true,
            bytes_transferred,
            size,
            source,
            destination,
            error: None,
            duration,
            warnings,
            companions,
        }
    }

    pub(crate) fn failed(source: PathBuf, destination: PathBuf, error: ErrorKind, duration: Duration) -> Self {
        Self {
            success: false,
            bytes_transferred: 0,
            size: 0,
            source,
            destination,
            error: Some(error),
            duration,
            warnings: Vec::new(),
            companions: Vec::new(),
        }
    }

    /// A result for a request that never reached the engine, such as a
    /// catalog path that failed validation.
    pub fn rejected(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, error: ErrorKind) -> Self {
        Self::failed(source.into(), destination.into(), error, Duration::ZERO)
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Bytes written to the destination tier. Zero for link modes and for
    /// same-volume moves, which only touch metadata.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Size of the primary file, however it was transferred.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn warnings(&self) -> &[TransferWarning] {
        &self.warnings
    }

    /// Destinations of companion files that were published alongside.
    pub fn companions(&self) -> &[PathBuf] {
        &self.companions
    }

    /// Whether the source survived a successful `Move`.
    pub fn duplicated(&self) -> bool {
        self.warnings.iter().any(|w| matches!(w, TransferWarning::SourceNotRemoved { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_result() {
        let result = TransferResult::rejected("/plex/../x", "", ErrorKind::PathSecurityViolation("..".to_string()));
        assert!(!result.success());
        assert_eq!(result.bytes_transferred(), 0);
        assert_eq!(result.duration(), Duration::ZERO);
        assert!(matches!(result.error(), Some(ErrorKind::PathSecurityViolation(_))));
    }

    #[test]
    fn test_warning_display() {
        let warning = TransferWarning::Companion {
            path: PathBuf::from("/array/x.srt"),
            error: ErrorKind::DestinationExists(PathBuf::from("/cache/x.srt")),
        };
        assert_eq!(warning.to_string(), "companion /array/x.srt failed: destination already exists: /cache/x.srt");
    }

    #[test]
    fn test_duplicated() {
        let result = TransferResult::succeeded(
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            1,
            1,
            Duration::ZERO,
            vec![TransferWarning::SourceNotRemoved { path: PathBuf::from("/a"), reason: "busy".to_string() }],
            vec![],
        );
        assert!(result.success());
        assert!(result.duplicated());
    }
}
