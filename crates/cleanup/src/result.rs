use derive_more::Display;
use plexcache_registry::CachedFileEntry;
use std::path::PathBuf;
use uuid::Uuid;

/// One entry the pass could not process. The entry is left where it was and
/// is considered again by the next pass.
#[derive(Debug, Clone, Display, PartialEq, Eq)]
#[display("{} ({id}): {reason}", path.display())]
pub struct CleanupFailure {
    pub id: Uuid,
    pub path: PathBuf,
    pub reason: String,
}
impl CleanupFailure {
    pub(crate) fn new(entry: &CachedFileEntry, reason: impl ToString) -> Self {
        Self { id: entry.id, path: entry.cached_path.clone(), reason: reason.to_string() }
    }
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Cached files deleted or moved back to the array.
    pub files_removed: u64,
    /// Cache space reclaimed. Links reclaim nothing.
    pub bytes_freed: u64,
    /// Entries that aged out.
    pub entries_expired: u64,
    /// Entries evicted to bring the cache under quota.
    pub over_quota: u64,
    /// Entries whose cached file was found missing.
    pub orphans_detected: u64,
    /// Orphaned entries retired without touching the filesystem.
    pub orphans_retired: u64,
    /// Removed entries deleted from the registry for good.
    pub entries_purged: u64,
    pub temp_files_removed: u64,
    pub errors: Vec<CleanupFailure>,
}
impl CleanupResult {
    /// `true` if the pass changed nothing at all.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// A read-only preview of what the next pass would act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupPlan {
    pub expired: Vec<CachedFileEntry>,
    pub over_quota: Vec<CachedFileEntry>,
    /// Entries already pending removal.
    pub pending_removal: Vec<CachedFileEntry>,
    pub orphaned: Vec<CachedFileEntry>,
    /// Removed entries past the retention window.
    pub purgeable: u64,
}
impl CleanupPlan {
    /// Cache space the plan would reclaim, assuming every eviction succeeds.
    pub fn reclaimable_bytes(&self) -> u64 {
        self.expired
            .iter()
            .chain(&self.over_quota)
            .chain(&self.pending_removal)
            .filter(|e| e.method.occupies_space())
            .map(|e| e.size_bytes)
            .sum()
    }
}
