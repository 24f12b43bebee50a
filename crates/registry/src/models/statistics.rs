use crate::error::{Error, ErrorKind, Result};
use crate::models::{CacheReason, UserId};
use exn::ResultExt;

/// Registry-wide counters.
///
/// Only cache-side bytes are counted: a file duplicated on the array by a
/// failed source removal never shows up here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub active: u64,
    pub orphaned: u64,
    pub pending_removal: u64,
    pub removed: u64,
    /// Bytes of active entries, link methods included.
    pub active_bytes: u64,
    pub total_accesses: u64,
    /// Active entries grouped by the reason they were cached, largest first.
    pub by_reason: Vec<ReasonStatistics>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonStatistics {
    pub reason: CacheReason,
    pub entries: u64,
    pub bytes: u64,
}

/// Active entries a user keeps cached. A file kept by several users counts
/// for each of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatistics {
    pub user: UserId,
    pub entries: u64,
    pub bytes: u64,
}

fn count(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(sqlx::FromRow)]
pub(crate) struct TotalsRow {
    active: i64,
    orphaned: i64,
    pending_removal: i64,
    removed: i64,
    active_bytes: i64,
    total_accesses: i64,
}
impl TotalsRow {
    pub(crate) fn into_statistics(self, by_reason: Vec<ReasonStatistics>) -> Result<Statistics> {
        Ok(Statistics {
            active: count(self.active, "active count")?,
            orphaned: count(self.orphaned, "orphaned count")?,
            pending_removal: count(self.pending_removal, "pending removal count")?,
            removed: count(self.removed, "removed count")?,
            active_bytes: count(self.active_bytes, "active bytes")?,
            total_accesses: count(self.total_accesses, "access count")?,
            by_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReasonRow {
    reason: String,
    entries: i64,
    bytes: i64,
}
impl TryFrom<ReasonRow> for ReasonStatistics {
    type Error = Error;
    fn try_from(row: ReasonRow) -> Result<Self> {
        Ok(Self {
            reason: row.reason.parse()?,
            entries: count(row.entries, "entries")?,
            bytes: count(row.bytes, "bytes")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct UserRow {
    user_id: String,
    entries: i64,
    bytes: i64,
}
impl TryFrom<UserRow> for UserStatistics {
    type Error = Error;
    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            user: UserId::new(row.user_id)?,
            entries: count(row.entries, "entries")?,
            bytes: count(row.bytes, "bytes")?,
        })
    }
}
