use derive_more::Display;
use plexcache_registry::{CacheReason, UserId};
use plexcache_transfer::TransferResult;
use plexcache_transfer::error::ErrorKind as TransferErrorKind;
use std::path::PathBuf;

/// A file the media catalog reported, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFile {
    /// As the catalog sees it; mapped onto local storage before use.
    pub path: String,
    pub reason: CacheReason,
    pub user: Option<UserId>,
}
impl CatalogFile {
    pub fn new(path: impl Into<String>, reason: CacheReason) -> Self {
        Self { path: path.into(), reason, user: None }
    }

    pub fn with_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }
}

/// Why a file needed no transfer.
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum SkipReason {
    #[display("already cached")]
    AlreadyCached,
    /// Was pending removal and is kept instead.
    #[display("reactivated")]
    Reactivated,
    #[display("not cached")]
    NotCached,
    #[display("batch cancelled")]
    Cancelled,
}

/// What happened to one file of a batch.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// A transfer was attempted (or rejected up front); see the result.
    Transfer(TransferResult),
    /// The array copy was intact, so the cached copy was dropped.
    Released { cached: PathBuf, bytes_freed: u64 },
    Skipped { path: PathBuf, reason: SkipReason },
}
impl FileOutcome {
    pub fn error(&self) -> Option<&TransferErrorKind> {
        match self {
            Self::Transfer(result) => result.error(),
            _ => None,
        }
    }
}

/// Counts over a whole batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Bytes written by successful transfers.
    pub bytes_moved: u64,
    /// Cancellation stopped part of the batch.
    pub cancelled: bool,
}

/// The result of [`Engine::process_batch`](crate::Engine::process_batch).
/// Always covers every input file, in input order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub per_file: Vec<FileOutcome>,
    pub summary: BatchSummary,
}
impl BatchResult {
    pub(crate) fn new(per_file: Vec<FileOutcome>) -> Self {
        let mut summary = BatchSummary::default();
        for outcome in &per_file {
            match outcome {
                FileOutcome::Transfer(result) if result.success() => {
                    summary.succeeded += 1;
                    summary.bytes_moved += result.bytes_transferred();
                },
                FileOutcome::Transfer(_) => summary.failed += 1,
                FileOutcome::Released { .. } => summary.succeeded += 1,
                FileOutcome::Skipped { reason, .. } => {
                    summary.skipped += 1;
                    summary.cancelled |= *reason == SkipReason::Cancelled;
                },
            }
        }
        Self { per_file, summary }
    }
}

/// What [`Engine::process_batch`](crate::Engine::process_batch) would do
/// with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Transfer,
    Release,
    Skip(SkipReason),
    Reject(TransferErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePreview {
    pub path: String,
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    /// Size of the source, if it exists.
    pub size: u64,
    pub action: PlannedAction,
}

/// Read-only preview of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunAnalysis {
    pub file_count: u64,
    /// Bytes that would be transferred.
    pub total_size: u64,
    pub per_file_preview: Vec<FilePreview>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_every_file() {
        let failed = TransferResult::rejected("/a", "/b", TransferErrorKind::DestinationExists("/b".into()));
        let result = BatchResult::new(vec![
            FileOutcome::Transfer(failed),
            FileOutcome::Released { cached: "/cache/x".into(), bytes_freed: 10 },
            FileOutcome::Skipped { path: "/x".into(), reason: SkipReason::AlreadyCached },
            FileOutcome::Skipped { path: "/y".into(), reason: SkipReason::Cancelled },
        ]);
        assert_eq!(
            result.summary,
            BatchSummary { succeeded: 1, failed: 1, skipped: 2, bytes_moved: 0, cancelled: true }
        );
        assert!(matches!(result.per_file[0].error(), Some(TransferErrorKind::DestinationExists(_))));
    }
}
