use crate::error::{ErrorKind, Result};
use plexcache_registry::{CacheReason, CachedFileEntry};
use std::path::PathBuf;
use time::{Duration, UtcDateTime};

/// When cached content goes away, and how long its records are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Age at which watchlist (and Trakt) entries expire.
    pub watchlist_expiry: Duration,
    /// Age at which entries cached because they were watched expire. Never
    /// shorter than [`watchlist_expiry`](Self::watchlist_expiry).
    pub watched_expiry: Duration,
    /// Age at which manually cached entries expire; `None` keeps them.
    pub manual_expiry: Option<Duration>,
    /// How long removed entries stay in the registry before being purged.
    pub retention: Duration,
    /// Cache size above which the least recently accessed entries are evicted.
    pub max_cache_bytes: Option<u64>,
    /// Temporary files from interrupted transfers older than this are swept.
    pub temp_file_max_age: Duration,
    /// Directories swept for stale temporary files.
    pub sweep_roots: Vec<PathBuf>,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            watchlist_expiry: Duration::days(7),
            watched_expiry: Duration::days(14),
            manual_expiry: None,
            retention: Duration::days(7),
            max_cache_bytes: None,
            temp_file_max_age: Duration::hours(24),
            sweep_roots: Vec::new(),
        }
    }
}

impl CleanupPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.watchlist_expiry > self.watched_expiry {
            exn::bail!(ErrorKind::InvalidPolicy(format!(
                "watchlist expiry ({}) exceeds watched expiry ({})",
                self.watchlist_expiry, self.watched_expiry
            )));
        }
        let durations = [
            ("watchlist expiry", Some(self.watchlist_expiry)),
            ("watched expiry", Some(self.watched_expiry)),
            ("manual expiry", self.manual_expiry),
            ("retention", Some(self.retention)),
            ("temporary file age", Some(self.temp_file_max_age)),
        ];
        for (name, duration) in durations {
            if duration.is_some_and(Duration::is_negative) {
                exn::bail!(ErrorKind::InvalidPolicy(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }

    /// Age after which an entry cached for `reason` expires, if ever.
    ///
    /// Entries kept for what someone is currently watching never age out;
    /// they leave the cache when the catalog stops reporting them.
    pub fn expiry_for(&self, reason: CacheReason) -> Option<Duration> {
        match reason {
            CacheReason::Watchlist | CacheReason::Trakt => Some(self.watchlist_expiry),
            CacheReason::Watched => Some(self.watched_expiry),
            CacheReason::Manual => self.manual_expiry,
            CacheReason::OnDeck | CacheReason::RealTimeWatch | CacheReason::ActiveWatching => None,
        }
    }

    pub(crate) fn is_expired(&self, entry: &CachedFileEntry, now: UtcDateTime) -> bool {
        self.expiry_for(entry.triggered_by_reason).is_some_and(|expiry| now - entry.cached_at > expiry)
    }

    /// Active entries that should make way to bring the cache under quota,
    /// least recently accessed first. Links are never chosen: they take no
    /// cache space.
    pub(crate) fn over_quota<'a>(&self, active: &'a [CachedFileEntry]) -> Vec<&'a CachedFileEntry> {
        let Some(max) = self.max_cache_bytes else {
            return Vec::new();
        };
        let mut candidates: Vec<_> = active.iter().filter(|e| e.method.occupies_space()).collect();
        let mut total: u64 = candidates.iter().map(|e| e.size_bytes).sum();
        candidates.sort_by_key(|e| (e.last_accessed, e.cached_at));

        let mut selected = Vec::new();
        for entry in candidates {
            if total <= max {
                break;
            }
            total = total.saturating_sub(entry.size_bytes);
            selected.push(entry);
        }
        selected
    }

    pub(crate) fn purge_cutoff(&self, now: UtcDateTime) -> UtcDateTime {
        now.checked_sub(self.retention).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexcache_registry::{CacheMethod, EntryStatus};
    use rstest::rstest;
    use uuid::Uuid;

    fn entry(reason: CacheReason, age: Duration, now: UtcDateTime) -> CachedFileEntry {
        CachedFileEntry {
            id: Uuid::new_v4(),
            canonical_path: "/plex/x.mkv".into(),
            original_path: "/array/x.mkv".into(),
            cached_path: "/cache/x.mkv".into(),
            method: CacheMethod::Copy,
            size_bytes: 10,
            cached_at: now - age,
            last_accessed: now - age,
            access_count: 0,
            triggered_by_user: None,
            triggered_by_reason: reason,
            status: EntryStatus::Active,
            status_changed_at: now - age,
        }
    }

    #[test]
    fn test_watchlist_expiry_must_not_exceed_watched() {
        let policy = CleanupPolicy {
            watchlist_expiry: Duration::hours(49),
            watched_expiry: Duration::hours(48),
            ..CleanupPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPolicy(_)));
        assert!(CleanupPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_negative_durations_are_rejected() {
        let policy = CleanupPolicy { retention: Duration::days(-1), ..CleanupPolicy::default() };
        assert!(policy.validate().is_err());
    }

    #[rstest]
    #[case(CacheReason::Watchlist, true)]
    #[case(CacheReason::Trakt, true)]
    #[case(CacheReason::Watched, false)]
    #[case(CacheReason::OnDeck, false)]
    #[case(CacheReason::Manual, false)]
    #[case(CacheReason::RealTimeWatch, false)]
    #[case(CacheReason::ActiveWatching, false)]
    fn test_expiry_by_reason(#[case] reason: CacheReason, #[case] expired: bool) {
        let policy = CleanupPolicy {
            watchlist_expiry: Duration::hours(6),
            watched_expiry: Duration::hours(48),
            ..CleanupPolicy::default()
        };
        let now = UtcDateTime::now();
        assert_eq!(policy.is_expired(&entry(reason, Duration::hours(7), now), now), expired);
    }

    #[test]
    fn test_over_quota_picks_least_recently_accessed() {
        let now = UtcDateTime::now();
        let mut old = entry(CacheReason::OnDeck, Duration::hours(3), now);
        let mut linked = entry(CacheReason::OnDeck, Duration::hours(4), now);
        linked.method = CacheMethod::Hardlink;
        let mut recent = entry(CacheReason::OnDeck, Duration::hours(2), now);
        recent.last_accessed = now;
        old.size_bytes = 60;
        recent.size_bytes = 60;
        let active = vec![recent.clone(), linked, old.clone()];

        let policy = CleanupPolicy { max_cache_bytes: Some(100), ..CleanupPolicy::default() };
        let selected = policy.over_quota(&active);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, old.id);

        let unlimited = CleanupPolicy::default();
        assert!(unlimited.over_quota(&active).is_empty());
    }
}
