use crate::error::{Error, ErrorKind};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Lifecycle status of a registry entry.
///
/// ```text
/// Active ──► Orphaned ───────┐
///   │  ▲                     ▼
///   │  └─ PendingRemoval ──► Removed ──► (purged)
///   └────────────────────────▲
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryStatus {
    /// The cached file is present and accounted for.
    Active,
    /// The registry says cached, the filesystem disagrees.
    Orphaned,
    /// Selected for eviction; the cached file still exists.
    PendingRemoval,
    /// No longer cached. Kept until the retention window passes.
    Removed,
}
impl EntryStatus {
    pub const ALL: [Self; 4] = [Self::Active, Self::Orphaned, Self::PendingRemoval, Self::Removed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Orphaned => "orphaned",
            Self::PendingRemoval => "pending_removal",
            Self::Removed => "removed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Active, Orphaned | PendingRemoval | Removed) | (Orphaned, Removed) | (PendingRemoval, Removed | Active)
        )
    }
}
impl FromStr for EntryStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => Self::Active,
            "orphaned" => Self::Orphaned,
            "pending_removal" => Self::PendingRemoval,
            "removed" => Self::Removed,
            _ => exn::bail!(ErrorKind::ParseError { field: "status", value: s.to_string() }),
        })
    }
}
impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// How the cached copy relates to the array copy. Only atomic methods are
/// ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheMethod {
    /// An independent copy; occupies cache space.
    Copy,
    /// Same inode as the array copy.
    Hardlink,
    /// Points at the array copy.
    Symlink,
}
impl CacheMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Hardlink => "hardlink",
            Self::Symlink => "symlink",
        }
    }

    /// Whether removing the cached file frees cache space.
    pub fn occupies_space(&self) -> bool {
        matches!(self, Self::Copy)
    }
}
impl FromStr for CacheMethod {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "copy" => Self::Copy,
            "hardlink" => Self::Hardlink,
            "symlink" => Self::Symlink,
            _ => exn::bail!(ErrorKind::ParseError { field: "method", value: s.to_string() }),
        })
    }
}
impl Display for CacheMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The consumption signal that caused a file to be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheReason {
    Watchlist,
    OnDeck,
    Watched,
    Trakt,
    Manual,
    RealTimeWatch,
    ActiveWatching,
}
impl CacheReason {
    pub const ALL: [Self; 7] = [
        Self::Watchlist,
        Self::OnDeck,
        Self::Watched,
        Self::Trakt,
        Self::Manual,
        Self::RealTimeWatch,
        Self::ActiveWatching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Watchlist => "watchlist",
            Self::OnDeck => "ondeck",
            Self::Watched => "watched",
            Self::Trakt => "trakt",
            Self::Manual => "manual",
            Self::RealTimeWatch => "real_time_watch",
            Self::ActiveWatching => "active_watching",
        }
    }
}
impl FromStr for CacheReason {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "watchlist" => Self::Watchlist,
            "ondeck" | "on_deck" => Self::OnDeck,
            "watched" => Self::Watched,
            "trakt" => Self::Trakt,
            "manual" => Self::Manual,
            "real_time_watch" => Self::RealTimeWatch,
            "active_watching" => Self::ActiveWatching,
            _ => exn::bail!(ErrorKind::ParseError { field: "reason", value: s.to_string() }),
        })
    }
}
impl Display for CacheReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EntryStatus::Active, EntryStatus::Orphaned, true)]
    #[case(EntryStatus::Active, EntryStatus::PendingRemoval, true)]
    #[case(EntryStatus::Active, EntryStatus::Removed, true)]
    #[case(EntryStatus::Orphaned, EntryStatus::Removed, true)]
    #[case(EntryStatus::PendingRemoval, EntryStatus::Active, true)]
    #[case(EntryStatus::PendingRemoval, EntryStatus::Removed, true)]
    #[case(EntryStatus::Orphaned, EntryStatus::Active, false)]
    #[case(EntryStatus::Removed, EntryStatus::Active, false)]
    #[case(EntryStatus::Removed, EntryStatus::Orphaned, false)]
    #[case(EntryStatus::Active, EntryStatus::Active, false)]
    fn test_state_machine(#[case] from: EntryStatus, #[case] to: EntryStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn test_string_forms_are_stable() {
        for status in EntryStatus::ALL {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        for reason in CacheReason::ALL {
            assert_eq!(reason.to_string().parse::<CacheReason>().unwrap(), reason);
        }
        assert_eq!("real_time_watch".parse::<CacheReason>().unwrap(), CacheReason::RealTimeWatch);
        assert!("plain_copy".parse::<CacheMethod>().is_err());
    }
}
