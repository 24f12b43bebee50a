use crate::error::{Error, ErrorKind, Result};
use crate::models::{CacheMethod, CacheReason, EntryStatus, from_nanos, path_to_string, to_nanos};
use exn::ResultExt;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use time::UtcDateTime;
use uuid::Uuid;

const MAX_USER_ID_LENGTH: usize = 255;

/// Identifier of a media catalog user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);
impl UserId {
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() || id.len() > MAX_USER_ID_LENGTH || id.chars().any(char::is_control) {
            exn::bail!(ErrorKind::ParseError { field: "user id", value: id.to_string() });
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl FromStr for UserId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Everything needed to register a freshly cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// The path as the media catalog knows it.
    pub canonical_path: PathBuf,
    /// Where the file lives on the array.
    pub original_path: PathBuf,
    pub cached_path: PathBuf,
    pub method: CacheMethod,
    pub size_bytes: u64,
    pub triggered_by_user: Option<UserId>,
    pub triggered_by_reason: CacheReason,
}
impl NewEntry {
    pub(crate) fn into_entry(self, now: UtcDateTime) -> CachedFileEntry {
        CachedFileEntry {
            id: Uuid::new_v4(),
            canonical_path: self.canonical_path,
            original_path: self.original_path,
            cached_path: self.cached_path,
            method: self.method,
            size_bytes: self.size_bytes,
            cached_at: now,
            last_accessed: now,
            access_count: 0,
            triggered_by_user: self.triggered_by_user,
            triggered_by_reason: self.triggered_by_reason,
            status: EntryStatus::Active,
            status_changed_at: now,
        }
    }
}

/// One cached file as recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFileEntry {
    pub id: Uuid,
    pub canonical_path: PathBuf,
    pub original_path: PathBuf,
    pub cached_path: PathBuf,
    pub method: CacheMethod,
    pub size_bytes: u64,
    pub cached_at: UtcDateTime,
    pub last_accessed: UtcDateTime,
    pub access_count: u64,
    pub triggered_by_user: Option<UserId>,
    pub triggered_by_reason: CacheReason,
    pub status: EntryStatus,
    /// When `status` last changed; drives the retention window.
    pub status_changed_at: UtcDateTime,
}

/// Why a user keeps an entry cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub user: UserId,
    pub reason: CacheReason,
    pub attributed_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) id: String,
    pub(crate) canonical_path: String,
    pub(crate) original_path: String,
    pub(crate) cached_path: String,
    pub(crate) method: String,
    pub(crate) size_bytes: i64,
    pub(crate) cached_at: i64,
    pub(crate) last_accessed: i64,
    pub(crate) access_count: i64,
    pub(crate) triggered_by_user: Option<String>,
    pub(crate) triggered_by_reason: String,
    pub(crate) status: String,
    pub(crate) status_changed_at: i64,
}
impl TryFrom<&CachedFileEntry> for EntryRow {
    type Error = Error;
    fn try_from(entry: &CachedFileEntry) -> Result<Self> {
        Ok(Self {
            id: entry.id.hyphenated().to_string(),
            canonical_path: path_to_string(&entry.canonical_path)?,
            original_path: path_to_string(&entry.original_path)?,
            cached_path: path_to_string(&entry.cached_path)?,
            method: entry.method.as_str().to_string(),
            size_bytes: i64::try_from(entry.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
            cached_at: to_nanos(entry.cached_at)?,
            last_accessed: to_nanos(entry.last_accessed)?,
            access_count: i64::try_from(entry.access_count).or_raise(|| ErrorKind::InvalidData("access count"))?,
            triggered_by_user: entry.triggered_by_user.as_ref().map(|u| u.as_str().to_string()),
            triggered_by_reason: entry.triggered_by_reason.as_str().to_string(),
            status: entry.status.as_str().to_string(),
            status_changed_at: to_nanos(entry.status_changed_at)?,
        })
    }
}
impl TryFrom<EntryRow> for CachedFileEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).or_raise(|| ErrorKind::InvalidData("id"))?,
            canonical_path: PathBuf::from(row.canonical_path),
            original_path: PathBuf::from(row.original_path),
            cached_path: PathBuf::from(row.cached_path),
            method: row.method.parse()?,
            size_bytes: u64::try_from(row.size_bytes).or_raise(|| ErrorKind::InvalidData("size"))?,
            cached_at: from_nanos(row.cached_at)?,
            last_accessed: from_nanos(row.last_accessed)?,
            access_count: u64::try_from(row.access_count).or_raise(|| ErrorKind::InvalidData("access count"))?,
            triggered_by_user: row.triggered_by_user.map(UserId::new).transpose()?,
            triggered_by_reason: row.triggered_by_reason.parse()?,
            status: row.status.parse()?,
            status_changed_at: from_nanos(row.status_changed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct AttributionRow {
    user_id: String,
    reason: String,
    attributed_at: i64,
}
impl TryFrom<AttributionRow> for Attribution {
    type Error = Error;
    fn try_from(row: AttributionRow) -> Result<Self> {
        Ok(Self {
            user: UserId::new(row.user_id)?,
            reason: row.reason.parse()?,
            attributed_at: from_nanos(row.attributed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CachedFileEntry {
        NewEntry {
            canonical_path: PathBuf::from("/plex/movies/Heat (1995).mkv"),
            original_path: PathBuf::from("/mnt/user0/movies/Heat (1995).mkv"),
            cached_path: PathBuf::from("/mnt/cache/movies/Heat (1995).mkv"),
            method: CacheMethod::Copy,
            size_bytes: 4_000_000_000,
            triggered_by_user: Some(UserId::new("alice").unwrap()),
            triggered_by_reason: CacheReason::OnDeck,
        }
        .into_entry(UtcDateTime::now())
    }

    #[test]
    fn test_model_row_model() {
        let model = entry();
        let row = EntryRow::try_from(&model).unwrap();
        assert_eq!(row.status, "active");
        assert_eq!(row.triggered_by_reason, "ondeck");
        // Nanosecond timestamps keep the full precision.
        assert_eq!(CachedFileEntry::try_from(row).unwrap(), model);
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let mut row = EntryRow::try_from(&entry()).unwrap();
        row.status = "deleted".to_string();
        let err = CachedFileEntry::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ParseError { field: "status", .. }));
    }

    #[test]
    fn test_user_id_validation() {
        assert_eq!(UserId::new("  bob ").unwrap().as_str(), "bob");
        assert!(UserId::new("   ").is_err());
        assert!(UserId::new("a\nb").is_err());
        assert!(UserId::new("x".repeat(256)).is_err());
    }
}
