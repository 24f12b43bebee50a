//! Repository for cached file entries, their attributions and the audit log.
//!
//! Every public operation is a single transaction (or a single statement),
//! so a failure half-way never leaves a partial write behind. Status changes
//! are compare-and-set against the status that was read, which makes a lost
//! race a [`Conflict`](ErrorKind::Conflict) instead of a silent overwrite.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Attribution, AttributionRow, CacheReason, CachedFileEntry, EntryRow, EntryStatus, NewEntry, NewOperation,
    OperationFilter, OperationLogEntry, OperationRow, OperationType, QueryFilter, ReasonRow, Statistics, TotalsRow,
    UserId, UserRow, UserStatistics, path_to_string, to_nanos,
};
use exn::{OptionExt, ResultExt};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;
use time::UtcDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error().is_some_and(|db| db.is_foreign_key_violation())
}

fn to_i64(value: Option<u64>, field: &'static str) -> Result<Option<i64>> {
    value.map(i64::try_from).transpose().or_raise(|| ErrorKind::InvalidData(field))
}

/// Outcome of [`Registry::verify_integrity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Active entries whose cached file exists.
    pub verified: u64,
    /// Entries whose cached file is missing: previously orphaned ones plus
    /// the ones orphaned by this run.
    pub errors: u64,
    /// Entries this run moved from `Active` to `Orphaned`.
    pub newly_orphaned: u64,
}
impl IntegrityReport {
    /// `(verified_count, error_count)`.
    pub fn counts(&self) -> (u64, u64) {
        (self.verified, self.errors)
    }
}

/// The single source of truth for what is cached and why.
///
/// Cheap to clone; all clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Registry {
    pool: SqlitePool,
}
impl From<&Database> for Registry {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Registry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Registers a freshly cached file, together with the attribution of the
    /// user who triggered it (if any), atomically.
    ///
    /// Returns [`ErrorKind::Conflict`] if the cached path already has an
    /// active entry; of two racing inserts for one path exactly one wins.
    #[instrument(skip_all, fields(cached_path = %entry.cached_path.display()))]
    pub async fn add_entry(&self, entry: NewEntry, now: UtcDateTime) -> Result<CachedFileEntry> {
        let entry = entry.into_entry(now);
        let row = EntryRow::try_from(&entry)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let inserted = sqlx::query(include_str!("../queries/insert_entry.sql"))
            .bind(&row.id)
            .bind(&row.canonical_path)
            .bind(&row.original_path)
            .bind(&row.cached_path)
            .bind(&row.method)
            .bind(row.size_bytes)
            .bind(row.cached_at)
            .bind(row.last_accessed)
            .bind(row.access_count)
            .bind(&row.triggered_by_user)
            .bind(&row.triggered_by_reason)
            .bind(&row.status)
            .bind(row.status_changed_at)
            .execute(&mut *tx)
            .await;
        if let Err(e) = &inserted
            && is_unique_violation(e)
        {
            debug!("Cached path already has an active entry");
            exn::bail!(ErrorKind::Conflict(format!("an active entry already exists for {}", row.cached_path)));
        }
        inserted.or_raise(|| ErrorKind::Database)?;
        if let Some(user) = &row.triggered_by_user {
            sqlx::query(include_str!("../queries/upsert_attribution.sql"))
                .bind(&row.id)
                .bind(user)
                .bind(&row.triggered_by_reason)
                .bind(row.cached_at)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        debug!(id = %entry.id, "Registered cached file");
        Ok(entry)
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<CachedFileEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_by_id.sql"))
            .bind(id.hyphenated().to_string())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedFileEntry::try_from).transpose()
    }

    /// The entry currently responsible for `cached_path`: the active one, or
    /// failing that the newest one pending removal.
    pub async fn get_live_by_cached_path(&self, cached_path: impl AsRef<Path>) -> Result<Option<CachedFileEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_live_by_cached_path.sql"))
            .bind(path_to_string(cached_path.as_ref())?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CachedFileEntry::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// One page of entries matching `filter` (newest first), and the total
    /// number of matches across all pages.
    pub async fn query(&self, filter: &QueryFilter) -> Result<(Vec<CachedFileEntry>, u64)> {
        let status = filter.status.map(|s| s.as_str());
        let user = filter.user.as_ref().map(UserId::as_str);
        let reason = filter.reason.map(|r| r.as_str());
        let min_size = to_i64(filter.min_size, "minimum size")?;
        let max_size = to_i64(filter.max_size, "maximum size")?;
        let since = filter.cached_since.map(to_nanos).transpose()?;

        // Page and count from the same snapshot.
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/query_entries.sql"))
            .bind(status)
            .bind(user)
            .bind(reason)
            .bind(min_size)
            .bind(max_size)
            .bind(since)
            .bind(i64::from(filter.limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let total: i64 = sqlx::query_scalar(include_str!("../queries/count_entries.sql"))
            .bind(status)
            .bind(user)
            .bind(reason)
            .bind(min_size)
            .bind(max_size)
            .bind(since)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;

        let entries = rows.into_iter().map(CachedFileEntry::try_from).collect::<Result<Vec<_>>>()?;
        let total = u64::try_from(total).or_raise(|| ErrorKind::InvalidData("total count"))?;
        Ok((entries, total))
    }

    /// Every entry with `status`, oldest first.
    pub async fn list_by_status(&self, status: EntryStatus) -> Result<Vec<CachedFileEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_by_status.sql"))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CachedFileEntry::try_from).collect()
    }

    // =========================================================================
    // Status transitions
    // =========================================================================

    async fn transition(&self, id: Uuid, to: EntryStatus, now: UtcDateTime) -> Result<CachedFileEntry> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let entry = Self::transition_in(&mut tx, id, to, now).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(entry)
    }

    async fn transition_in(
        conn: &mut SqliteConnection,
        id: Uuid,
        to: EntryStatus,
        now: UtcDateTime,
    ) -> Result<CachedFileEntry> {
        let id_text = id.hyphenated().to_string();
        let current: CachedFileEntry = sqlx::query_as::<_, EntryRow>(include_str!("../queries/get_by_id.sql"))
            .bind(&id_text)
            .fetch_optional(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?
            .ok_or_raise(|| ErrorKind::NotFound(id))?
            .try_into()?;
        if !current.status.can_transition_to(to) {
            exn::bail!(ErrorKind::InvalidTransition { from: current.status, to });
        }
        let updated = sqlx::query_as::<_, EntryRow>(include_str!("../queries/update_status.sql"))
            .bind(to.as_str())
            .bind(to_nanos(now)?)
            .bind(&id_text)
            .bind(current.status.as_str())
            .fetch_optional(&mut *conn)
            .await;
        if let Err(e) = &updated
            && is_unique_violation(e)
        {
            exn::bail!(ErrorKind::Conflict(format!(
                "another active entry exists for {}",
                current.cached_path.display()
            )));
        }
        let row = updated
            .or_raise(|| ErrorKind::Database)?
            .ok_or_raise(|| ErrorKind::Conflict(format!("status of {id} changed concurrently")))?;
        debug!(%id, from = %current.status, %to, "Entry status changed");
        row.try_into()
    }

    /// The cached file is gone from disk.
    pub async fn mark_orphaned(&self, id: Uuid, now: UtcDateTime) -> Result<CachedFileEntry> {
        self.transition(id, EntryStatus::Orphaned, now).await
    }

    /// Selects an active entry for eviction.
    pub async fn mark_pending_removal(&self, id: Uuid, now: UtcDateTime) -> Result<CachedFileEntry> {
        self.transition(id, EntryStatus::PendingRemoval, now).await
    }

    /// The cached file no longer exists, or never will again. Starts the
    /// retention window.
    pub async fn mark_removed(&self, id: Uuid, now: UtcDateTime) -> Result<CachedFileEntry> {
        self.transition(id, EntryStatus::Removed, now).await
    }

    /// Keeps an entry that was pending removal because it is wanted again.
    pub async fn reactivate(&self, id: Uuid, now: UtcDateTime) -> Result<CachedFileEntry> {
        self.transition(id, EntryStatus::Active, now).await
    }

    /// Dashboard deletion. The entry is marked removed and purged with the
    /// rest once the retention window passes; the file itself is untouched.
    /// The audit record is written in the same transaction.
    #[instrument(skip(self, now))]
    pub async fn delete(&self, id: Uuid, deleted_by: &str, now: UtcDateTime) -> Result<CachedFileEntry> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let entry = Self::transition_in(&mut tx, id, EntryStatus::Removed, now).await?;
        let record = NewOperation::succeeded(OperationType::Delete, &entry.cached_path).triggered_by(deleted_by);
        Self::insert_operation(&mut tx, record, now).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        info!(cached_path = %entry.cached_path.display(), "Registry entry deleted");
        Ok(entry)
    }

    // =========================================================================
    // Attributions
    // =========================================================================

    /// Records (or refreshes) that `user` wants entry `id` cached.
    pub async fn add_attribution(&self, id: Uuid, user: &UserId, reason: CacheReason, now: UtcDateTime) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/upsert_attribution.sql"))
            .bind(id.hyphenated().to_string())
            .bind(user.as_str())
            .bind(reason.as_str())
            .bind(to_nanos(now)?)
            .execute(&self.pool)
            .await;
        if let Err(e) = &result
            && is_foreign_key_violation(e)
        {
            exn::bail!(ErrorKind::NotFound(id));
        }
        result.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Drops `user`'s attribution. When it was the last one, an active entry
    /// moves to pending removal in the same transaction.
    ///
    /// Returns `true` if the entry was moved to pending removal.
    pub async fn remove_attribution(&self, id: Uuid, user: &UserId, now: UtcDateTime) -> Result<bool> {
        let id_text = id.hyphenated().to_string();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let deleted = sqlx::query(include_str!("../queries/delete_attribution.sql"))
            .bind(&id_text)
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if deleted == 0 {
            return Ok(false);
        }
        let remaining: i64 = sqlx::query_scalar(include_str!("../queries/count_attributions.sql"))
            .bind(&id_text)
            .fetch_one(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut evicted = false;
        if remaining == 0 {
            let updated: Option<EntryRow> = sqlx::query_as(include_str!("../queries/update_status.sql"))
                .bind(EntryStatus::PendingRemoval.as_str())
                .bind(to_nanos(now)?)
                .bind(&id_text)
                .bind(EntryStatus::Active.as_str())
                .fetch_optional(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            evicted = updated.is_some();
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        if evicted {
            info!(%id, "Last attribution removed; entry pending removal");
        }
        Ok(evicted)
    }

    pub async fn attributions(&self, id: Uuid) -> Result<Vec<Attribution>> {
        let rows: Vec<AttributionRow> = sqlx::query_as(include_str!("../queries/list_attributions.sql"))
            .bind(id.hyphenated().to_string())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Attribution::try_from).collect()
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Bumps the access counter and the last access time (never backwards).
    pub async fn record_access(&self, id: Uuid, now: UtcDateTime) -> Result<()> {
        let updated = sqlx::query(include_str!("../queries/record_access.sql"))
            .bind(to_nanos(now)?)
            .bind(id.hyphenated().to_string())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if updated == 0 {
            exn::bail!(ErrorKind::NotFound(id));
        }
        Ok(())
    }

    /// Checks every active entry against the filesystem; missing files
    /// become orphaned. Running it again without filesystem changes reports
    /// the same counts and changes nothing.
    ///
    /// No transaction is held while the filesystem is checked.
    #[instrument(skip_all)]
    pub async fn verify_integrity(&self, now: UtcDateTime) -> Result<IntegrityReport> {
        let known_orphans = self.list_by_status(EntryStatus::Orphaned).await?;
        let mut report = IntegrityReport {
            errors: u64::try_from(known_orphans.len()).unwrap_or(u64::MAX),
            ..IntegrityReport::default()
        };
        for entry in self.list_by_status(EntryStatus::Active).await? {
            match tokio::fs::try_exists(&entry.cached_path).await {
                Ok(true) => report.verified += 1,
                Ok(false) => {
                    report.errors += 1;
                    match self.mark_orphaned(entry.id, now).await {
                        Ok(_) => {
                            report.newly_orphaned += 1;
                            let path = entry.cached_path.display();
                            warn!(id = %entry.id, %path, "Cached file missing; entry orphaned");
                        },
                        // Someone else changed it meanwhile; their change stands.
                        Err(e) if matches!(&*e, ErrorKind::Conflict(_) | ErrorKind::InvalidTransition { .. }) => {
                            debug!(id = %entry.id, error = %*e, "Entry changed during verification");
                        },
                        Err(e) => return Err(e),
                    }
                },
                Err(e) => {
                    report.errors += 1;
                    let path = entry.cached_path.display();
                    warn!(id = %entry.id, %path, error = %e, "Could not check cached file");
                },
            }
        }
        info!(
            verified = report.verified,
            errors = report.errors,
            orphaned = report.newly_orphaned,
            "Integrity verified"
        );
        Ok(report)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Permanently deletes entries removed before `cutoff`, with their
    /// attributions. The only hard delete; it never touches files.
    pub async fn purge_removed(&self, cutoff: UtcDateTime) -> Result<u64> {
        let purged = sqlx::query(include_str!("../queries/purge_removed.sql"))
            .bind(to_nanos(cutoff)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        if purged > 0 {
            info!(purged, "Purged removed entries");
        }
        Ok(purged)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub async fn statistics(&self) -> Result<Statistics> {
        let totals: TotalsRow = sqlx::query_as(include_str!("../queries/statistics.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let by_reason: Vec<ReasonRow> = sqlx::query_as(include_str!("../queries/statistics_by_reason.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let by_reason = by_reason.into_iter().map(TryFrom::try_from).collect::<Result<Vec<_>>>()?;
        totals.into_statistics(by_reason)
    }

    pub async fn per_user_statistics(&self) -> Result<Vec<UserStatistics>> {
        let rows: Vec<UserRow> = sqlx::query_as(include_str!("../queries/per_user_statistics.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(UserStatistics::try_from).collect()
    }

    // =========================================================================
    // Operation log
    // =========================================================================

    /// Appends an audit record. Records are never updated or deleted.
    pub async fn log_operation(&self, operation: NewOperation, now: UtcDateTime) -> Result<OperationLogEntry> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::insert_operation(&mut conn, operation, now).await
    }

    async fn insert_operation(
        conn: &mut SqliteConnection,
        operation: NewOperation,
        now: UtcDateTime,
    ) -> Result<OperationLogEntry> {
        let row: OperationRow = sqlx::query_as(include_str!("../queries/insert_operation.sql"))
            .bind(operation.operation_type.as_str())
            .bind(path_to_string(&operation.file_path)?)
            .bind(operation.triggered_by)
            .bind(operation.success)
            .bind(operation.error_message)
            .bind(to_nanos(now)?)
            .fetch_one(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    /// Audit records matching `filter`, newest first.
    pub async fn list_operations(&self, filter: &OperationFilter) -> Result<Vec<OperationLogEntry>> {
        let path = filter.file_path.as_deref().map(path_to_string).transpose()?;
        let rows: Vec<OperationRow> = sqlx::query_as(include_str!("../queries/list_operations.sql"))
            .bind(filter.operation_type.map(|t| t.as_str()))
            .bind(path)
            .bind(filter.success)
            .bind(i64::from(filter.limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(OperationLogEntry::try_from).collect()
    }
}
