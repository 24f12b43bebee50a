use crate::error::{ErrorKind, Result};
use crate::policy::CleanupPolicy;
use crate::result::{CleanupFailure, CleanupPlan, CleanupResult};
use exn::ResultExt;
use plexcache_registry::{CacheMethod, CachedFileEntry, EntryStatus, NewOperation, OperationType, Registry};
use plexcache_transfer::error as transfer;
use plexcache_transfer::{TransferEngine, TransferMode, TransferRequest, sweep_stale_temp_files};
use time::UtcDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

const TRIGGERED_BY: &str = "cleanup";

/// How an evicted entry left the cache.
enum Eviction {
    /// The array copy was intact; the cached copy was deleted.
    Released(u64),
    /// The cached copy was the only one and was moved back to the array.
    Restored(u64),
    /// Nothing was on disk any more.
    AlreadyGone,
}

/// Runs cleanup passes over the registry and the cache.
///
/// A pass never destroys the last copy of a file: evicted content is either
/// deleted because the array still has it, or moved back. Failures of single
/// entries are collected and the rest of the pass carries on. Passes are
/// serialised; a second caller waits for the running pass to finish.
pub struct Cleaner {
    registry: Registry,
    engine: TransferEngine,
    policy: CleanupPolicy,
    running: Mutex<()>,
}

impl Cleaner {
    pub fn new(registry: Registry, engine: TransferEngine, policy: CleanupPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { registry, engine, policy, running: Mutex::new(()) })
    }

    pub fn policy(&self) -> &CleanupPolicy {
        &self.policy
    }

    /// Previews the next pass as of `now` without changing anything.
    ///
    /// Files that went missing since the last pass are not detected here;
    /// that takes a filesystem check, which only [`run`](Self::run) does.
    #[instrument(skip(self))]
    pub async fn plan(&self, now: UtcDateTime) -> Result<CleanupPlan> {
        let (expired, remaining): (Vec<_>, Vec<_>) =
            self.list(EntryStatus::Active).await?.into_iter().partition(|e| self.policy.is_expired(e, now));
        let over_quota = self.policy.over_quota(&remaining).into_iter().cloned().collect();
        let cutoff = self.policy.purge_cutoff(now);
        let purgeable = self.list(EntryStatus::Removed).await?.iter().filter(|e| e.status_changed_at < cutoff).count();
        Ok(CleanupPlan {
            expired,
            over_quota,
            pending_removal: self.list(EntryStatus::PendingRemoval).await?,
            orphaned: self.list(EntryStatus::Orphaned).await?,
            purgeable: u64::try_from(purgeable).unwrap_or(u64::MAX),
        })
    }

    /// Runs one full pass as of `now`. Running it again without anything
    /// changing in between does nothing.
    #[instrument(skip(self))]
    pub async fn run(&self, now: UtcDateTime) -> Result<CleanupResult> {
        let _running = self.running.lock().await;
        let mut result = CleanupResult::default();

        let report = self.registry.verify_integrity(now).await.or_raise(|| ErrorKind::Registry)?;
        result.orphans_detected = report.newly_orphaned;
        self.expire(now, &mut result).await?;
        self.enforce_quota(now, &mut result).await?;
        self.evict_pending(now, &mut result).await?;
        self.retire_orphans(now, &mut result).await?;
        result.entries_purged =
            self.registry.purge_removed(self.policy.purge_cutoff(now)).await.or_raise(|| ErrorKind::Registry)?;
        for root in &self.policy.sweep_roots {
            let max_age = self.policy.temp_file_max_age.unsigned_abs();
            result.temp_files_removed += sweep_stale_temp_files(root, max_age).await;
        }

        info!(
            files_removed = result.files_removed,
            bytes_freed = result.bytes_freed,
            expired = result.entries_expired,
            over_quota = result.over_quota,
            orphans = result.orphans_detected,
            purged = result.entries_purged,
            errors = result.errors.len(),
            "Cleanup pass finished"
        );
        Ok(result)
    }

    async fn list(&self, status: EntryStatus) -> Result<Vec<CachedFileEntry>> {
        self.registry.list_by_status(status).await.or_raise(|| ErrorKind::Registry)
    }

    async fn log(&self, operation: NewOperation, now: UtcDateTime) {
        if let Err(e) = self.registry.log_operation(operation.triggered_by(TRIGGERED_BY), now).await {
            warn!(error = ?e, "Could not append to the operation log");
        }
    }

    // =========================================================================
    // Selection
    // =========================================================================

    async fn expire(&self, now: UtcDateTime, result: &mut CleanupResult) -> Result<()> {
        for entry in self.list(EntryStatus::Active).await? {
            if !self.policy.is_expired(&entry, now) {
                continue;
            }
            match self.registry.mark_pending_removal(entry.id, now).await {
                Ok(_) => {
                    debug!(id = %entry.id, reason = %entry.triggered_by_reason, "Entry expired");
                    result.entries_expired += 1;
                    self.log(NewOperation::succeeded(OperationType::Expire, &entry.cached_path), now).await;
                },
                Err(e) => result.errors.push(CleanupFailure::new(&entry, &*e)),
            }
        }
        Ok(())
    }

    async fn enforce_quota(&self, now: UtcDateTime, result: &mut CleanupResult) -> Result<()> {
        let active = self.list(EntryStatus::Active).await?;
        for entry in self.policy.over_quota(&active) {
            match self.registry.mark_pending_removal(entry.id, now).await {
                Ok(_) => {
                    debug!(id = %entry.id, size = entry.size_bytes, "Entry evicted to honour the cache quota");
                    result.over_quota += 1;
                    self.log(NewOperation::succeeded(OperationType::Expire, &entry.cached_path), now).await;
                },
                Err(e) => result.errors.push(CleanupFailure::new(entry, &*e)),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    async fn evict_pending(&self, now: UtcDateTime, result: &mut CleanupResult) -> Result<()> {
        for entry in self.list(EntryStatus::PendingRemoval).await? {
            let eviction = match self.evict(&entry).await {
                Ok(eviction) => eviction,
                Err(e) => {
                    let path = entry.cached_path.display();
                    warn!(id = %entry.id, %path, error = ?e, "Could not evict cached file");
                    self.log(NewOperation::failed(OperationType::Release, &entry.cached_path, &*e), now).await;
                    result.errors.push(CleanupFailure::new(&entry, &*e));
                    continue;
                },
            };
            if let Err(e) = self.registry.mark_removed(entry.id, now).await {
                result.errors.push(CleanupFailure::new(&entry, &*e));
                continue;
            }
            match eviction {
                Eviction::Released(freed) => {
                    result.files_removed += 1;
                    result.bytes_freed += freed;
                    self.log(NewOperation::succeeded(OperationType::Release, &entry.cached_path), now).await;
                },
                Eviction::Restored(freed) => {
                    result.files_removed += 1;
                    result.bytes_freed += freed;
                    self.log(NewOperation::succeeded(OperationType::Restore, &entry.original_path), now).await;
                },
                Eviction::AlreadyGone => {
                    debug!(id = %entry.id, "Cached file already gone; entry removed");
                },
            }
        }
        Ok(())
    }

    async fn evict(&self, entry: &CachedFileEntry) -> transfer::Result<Eviction> {
        let cached = &entry.cached_path;
        if tokio::fs::symlink_metadata(cached).await.is_err() {
            return Ok(Eviction::AlreadyGone);
        }
        if entry.method == CacheMethod::Symlink {
            tokio::fs::remove_file(cached)
                .await
                .or_raise(|| transfer::ErrorKind::IoFailure(format!("removing {}", cached.display())))?;
            return Ok(Eviction::Released(0));
        }

        let companions = self.engine.companions_for(cached).await;
        if let Some(freed) = self.engine.release(cached, &entry.original_path, &companions).await? {
            return Ok(Eviction::Released(freed));
        }

        let request =
            TransferRequest::new(cached, &entry.original_path, TransferMode::Move).with_companions(companions);
        let outcome = self.engine.execute(request).await;
        if let Some(error) = outcome.error() {
            exn::bail!(error.clone());
        }
        if outcome.duplicated() {
            // The array has it now; the next pass releases the cached copy.
            exn::bail!(transfer::ErrorKind::IoFailure(format!(
                "restored to {}, but the cached copy remains",
                entry.original_path.display()
            )));
        }
        let freed = match entry.method.occupies_space() {
            true => outcome.size(),
            false => 0,
        };
        Ok(Eviction::Restored(freed))
    }

    /// Orphans have nothing left on disk; only their records go.
    async fn retire_orphans(&self, now: UtcDateTime, result: &mut CleanupResult) -> Result<()> {
        for entry in self.list(EntryStatus::Orphaned).await? {
            if tokio::fs::symlink_metadata(&entry.cached_path).await.is_ok() {
                result.errors.push(CleanupFailure::new(&entry, "orphaned file reappeared; left for manual review"));
                continue;
            }
            match self.registry.mark_removed(entry.id, now).await {
                Ok(_) => {
                    result.orphans_retired += 1;
                    self.log(NewOperation::succeeded(OperationType::Orphan, &entry.cached_path), now).await;
                },
                Err(e) => result.errors.push(CleanupFailure::new(&entry, &*e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_registry::{CacheReason, Database, NewEntry, QueryFilter};
    use plexcache_transfer::{FixedSpaceProbe, TransferConfig};
    use std::fs;
    use std::path::PathBuf;
    use time::Duration;
    use uuid::Uuid;

    struct Fixture {
        _dir: tempfile::TempDir,
        array: PathBuf,
        cache: PathBuf,
        registry: Registry,
        now: UtcDateTime,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("array");
        let cache = dir.path().join("cache");
        fs::create_dir_all(&array).unwrap();
        fs::create_dir_all(&cache).unwrap();
        let db = Database::connect_in_memory().await.unwrap();
        Fixture { _dir: dir, array, cache, registry: Registry::from(&db), now: UtcDateTime::now() }
    }

    impl Fixture {
        fn cleaner(&self, policy: CleanupPolicy) -> Cleaner {
            let engine = TransferEngine::with_probe(TransferConfig::default(), FixedSpaceProbe(u64::MAX));
            Cleaner::new(self.registry.clone(), engine, policy).unwrap()
        }

        /// Caches `name`, `age` ago. The array keeps its copy if `on_array`.
        async fn cached(&self, name: &str, reason: CacheReason, age: Duration, on_array: bool) -> CachedFileEntry {
            let content = format!("content of {name}");
            let cached_path = self.cache.join(name);
            let original_path = self.array.join(name);
            fs::write(&cached_path, &content).unwrap();
            if on_array {
                fs::write(&original_path, &content).unwrap();
            }
            let entry = NewEntry {
                canonical_path: PathBuf::from("/plex").join(name),
                original_path,
                cached_path,
                method: CacheMethod::Copy,
                size_bytes: content.len() as u64,
                triggered_by_user: None,
                triggered_by_reason: reason,
            };
            self.registry.add_entry(entry, self.now - age).await.unwrap()
        }

        async fn status(&self, id: Uuid) -> EntryStatus {
            self.registry.get_by_id(id).await.unwrap().unwrap().status
        }
    }

    fn short_expiry() -> CleanupPolicy {
        CleanupPolicy {
            watchlist_expiry: Duration::hours(6),
            watched_expiry: Duration::hours(48),
            ..CleanupPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected_up_front() {
        let fx = fixture().await;
        let engine = TransferEngine::new(TransferConfig::default());
        let policy = CleanupPolicy { watchlist_expiry: Duration::days(30), ..CleanupPolicy::default() };
        let err = Cleaner::new(fx.registry.clone(), engine, policy).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidPolicy(_)));
    }

    #[tokio::test]
    async fn test_watchlist_expires_before_watched() {
        let fx = fixture().await;
        let watchlist = fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), true).await;
        let watched = fx.cached("b.mkv", CacheReason::Watched, Duration::hours(7), true).await;
        let cleaner = fx.cleaner(short_expiry());

        let mut result = CleanupResult::default();
        cleaner.expire(fx.now, &mut result).await.unwrap();
        assert_eq!(result.entries_expired, 1);
        assert_eq!(fx.status(watchlist.id).await, EntryStatus::PendingRemoval);
        assert_eq!(fx.status(watched.id).await, EntryStatus::Active);
    }

    #[tokio::test]
    async fn test_run_releases_expired_entries() {
        let fx = fixture().await;
        let watchlist = fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), true).await;
        let watched = fx.cached("b.mkv", CacheReason::Watched, Duration::hours(7), true).await;

        let result = fx.cleaner(short_expiry()).run(fx.now).await.unwrap();
        assert_eq!(result.entries_expired, 1);
        assert_eq!(result.files_removed, 1);
        assert_eq!(result.bytes_freed, watchlist.size_bytes);
        assert!(result.errors.is_empty());
        assert!(!watchlist.cached_path.exists());
        assert!(watchlist.original_path.exists());
        assert!(watched.cached_path.exists());
        assert_eq!(fx.status(watchlist.id).await, EntryStatus::Removed);
        assert_eq!(fx.status(watched.id).await, EntryStatus::Active);
    }

    #[tokio::test]
    async fn test_sole_copy_is_moved_back() {
        let fx = fixture().await;
        let entry = fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), false).await;

        let result = fx.cleaner(short_expiry()).run(fx.now).await.unwrap();
        assert_eq!(result.files_removed, 1);
        assert_eq!(result.bytes_freed, entry.size_bytes);
        assert!(!entry.cached_path.exists());
        assert_eq!(fs::read_to_string(&entry.original_path).unwrap(), "content of a.mkv");
        assert_eq!(fx.status(entry.id).await, EntryStatus::Removed);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let fx = fixture().await;
        fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), true).await;
        fx.cached("b.mkv", CacheReason::Watchlist, Duration::hours(8), false).await;
        let gone = fx.cached("c.mkv", CacheReason::OnDeck, Duration::hours(1), true).await;
        fs::remove_file(&gone.cached_path).unwrap();
        fx.cached("d.mkv", CacheReason::OnDeck, Duration::hours(1), true).await;

        let policy = CleanupPolicy { sweep_roots: vec![fx.cache.clone()], ..short_expiry() };
        let cleaner = fx.cleaner(policy);
        let first = cleaner.run(fx.now).await.unwrap();
        assert!(!first.is_noop());
        assert_eq!(first.orphans_detected, 1);
        let second = cleaner.run(fx.now).await.unwrap();
        assert!(second.is_noop(), "{second:?}");
    }

    #[tokio::test]
    async fn test_orphans_are_retired_without_touching_files() {
        let fx = fixture().await;
        let entry = fx.cached("a.mkv", CacheReason::OnDeck, Duration::hours(1), true).await;
        fs::remove_file(&entry.cached_path).unwrap();

        let result = fx.cleaner(CleanupPolicy::default()).run(fx.now).await.unwrap();
        assert_eq!((result.orphans_detected, result.orphans_retired), (1, 1));
        assert_eq!((result.files_removed, result.bytes_freed), (0, 0));
        assert!(entry.original_path.exists());
        assert_eq!(fx.status(entry.id).await, EntryStatus::Removed);
    }

    #[tokio::test]
    async fn test_quota_evicts_least_recently_accessed() {
        let fx = fixture().await;
        let oldest = fx.cached("a.mkv", CacheReason::OnDeck, Duration::hours(3), true).await;
        let middle = fx.cached("b.mkv", CacheReason::OnDeck, Duration::hours(2), true).await;
        let newest = fx.cached("c.mkv", CacheReason::OnDeck, Duration::hours(1), true).await;
        fx.registry.record_access(oldest.id, fx.now).await.unwrap();

        let budget = oldest.size_bytes + middle.size_bytes;
        let policy = CleanupPolicy { max_cache_bytes: Some(budget), ..CleanupPolicy::default() };
        let result = fx.cleaner(policy).run(fx.now).await.unwrap();
        assert_eq!(result.over_quota, 1);
        assert_eq!(fx.status(middle.id).await, EntryStatus::Removed);
        assert_eq!(fx.status(oldest.id).await, EntryStatus::Active);
        assert_eq!(fx.status(newest.id).await, EntryStatus::Active);
    }

    #[tokio::test]
    async fn test_removed_entries_are_purged_after_retention() {
        let fx = fixture().await;
        let stale = fx.cached("a.mkv", CacheReason::OnDeck, Duration::days(10), true).await;
        let fresh = fx.cached("b.mkv", CacheReason::OnDeck, Duration::days(10), true).await;
        fx.registry.mark_removed(stale.id, fx.now - Duration::days(8)).await.unwrap();
        fx.registry.mark_removed(fresh.id, fx.now - Duration::days(6)).await.unwrap();

        let cleaner = fx.cleaner(CleanupPolicy::default());
        assert_eq!(cleaner.plan(fx.now).await.unwrap().purgeable, 1);
        let result = cleaner.run(fx.now).await.unwrap();
        assert_eq!(result.entries_purged, 1);
        assert!(fx.registry.get_by_id(stale.id).await.unwrap().is_none());
        assert!(fx.registry.get_by_id(fresh.id).await.unwrap().is_some());
        // Purging is metadata only.
        assert!(stale.cached_path.exists());
    }

    #[tokio::test]
    async fn test_plan_changes_nothing() {
        let fx = fixture().await;
        let entry = fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), true).await;
        let plan = fx.cleaner(short_expiry()).plan(fx.now).await.unwrap();
        assert_eq!(plan.expired.len(), 1);
        assert_eq!(plan.reclaimable_bytes(), entry.size_bytes);
        assert_eq!(fx.status(entry.id).await, EntryStatus::Active);
        assert!(entry.cached_path.exists());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_pass() {
        let fx = fixture().await;
        let blocked = fx.cached("a.mkv", CacheReason::Watchlist, Duration::hours(7), false).await;
        // Something else now sits where the file would be restored to.
        fs::write(&blocked.original_path, "a different, longer file").unwrap();
        let fine = fx.cached("b.mkv", CacheReason::Watchlist, Duration::hours(7), true).await;

        let result = fx.cleaner(short_expiry()).run(fx.now).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].id, blocked.id);
        assert_eq!(result.files_removed, 1);
        assert_eq!(fx.status(blocked.id).await, EntryStatus::PendingRemoval);
        assert_eq!(fx.status(fine.id).await, EntryStatus::Removed);
        assert!(blocked.cached_path.exists());

        let failures = fx
            .registry
            .list_operations(&plexcache_registry::OperationFilter::default().failures_only())
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        let (_, total) = fx.registry.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(total, 2);
    }
}
