//! Array ↔ cache path correspondence.

use crate::error::{ErrorKind, Result};
use crate::validate::validate_root;
use std::path::{Path, PathBuf};

/// Pairs a bulk storage root with the cache root that mirrors it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRule {
    array_root: PathBuf,
    cache_root: PathBuf,
}
impl TierRule {
    pub fn new(array_root: impl AsRef<Path>, cache_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            array_root: validate_root(array_root.as_ref())?,
            cache_root: validate_root(cache_root.as_ref())?,
        })
    }

    pub fn array_root(&self) -> &Path {
        &self.array_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }
}

/// Longest-prefix lookup over [`TierRule`]s, in either direction.
#[derive(Debug, Clone, Default)]
pub struct TierMap {
    rules: Vec<TierRule>,
}
impl TierMap {
    pub fn new(rules: impl IntoIterator<Item = TierRule>) -> Result<Self> {
        let mut collected: Vec<TierRule> = Vec::new();
        for rule in rules {
            if collected.iter().any(|r| r.cache_root == rule.cache_root || r.array_root == rule.array_root) {
                exn::bail!(ErrorKind::AmbiguousRule(rule.cache_root));
            }
            collected.push(rule);
        }
        Ok(Self { rules: collected })
    }

    pub fn rules(&self) -> &[TierRule] {
        &self.rules
    }

    /// Every cache root, for sweeping leftovers.
    pub fn cache_roots(&self) -> impl Iterator<Item = &Path> {
        self.rules.iter().map(|r| r.cache_root.as_path())
    }

    /// Where an array file lives once cached.
    pub fn to_cache(&self, array_path: &Path) -> Result<PathBuf> {
        Self::rewrite(array_path, self.rules.iter().map(|r| (&r.array_root, &r.cache_root)))
    }

    /// Where a cached file belongs on the array.
    pub fn to_array(&self, cache_path: &Path) -> Result<PathBuf> {
        Self::rewrite(cache_path, self.rules.iter().map(|r| (&r.cache_root, &r.array_root)))
    }

    fn rewrite<'a>(path: &Path, pairs: impl Iterator<Item = (&'a PathBuf, &'a PathBuf)>) -> Result<PathBuf> {
        let best = pairs
            .filter_map(|(from, to)| path.strip_prefix(from).ok().map(|rel| (from.components().count(), rel, to)))
            .max_by_key(|(specificity, _, _)| *specificity);
        match best {
            Some((_, relative, to)) if !relative.as_os_str().is_empty() => Ok(to.join(relative)),
            _ => exn::bail!(ErrorKind::OutsideTier(path.to_path_buf())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> TierMap {
        TierMap::new([
            TierRule::new("/mnt/user0/media", "/mnt/cache/media").unwrap(),
            TierRule::new("/mnt/user0/media/4k", "/mnt/fastcache/4k").unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_to_cache_uses_longest_prefix() {
        let tiers = tiers();
        assert_eq!(
            tiers.to_cache(Path::new("/mnt/user0/media/movies/x.mkv")).unwrap(),
            Path::new("/mnt/cache/media/movies/x.mkv")
        );
        assert_eq!(
            tiers.to_cache(Path::new("/mnt/user0/media/4k/y.mkv")).unwrap(),
            Path::new("/mnt/fastcache/4k/y.mkv")
        );
    }

    #[test]
    fn test_to_array_round_trips() {
        let tiers = tiers();
        let array = Path::new("/mnt/user0/media/tv/Show/S01E01.mkv");
        let cached = tiers.to_cache(array).unwrap();
        assert_eq!(tiers.to_array(&cached).unwrap(), array);
    }

    #[test]
    fn test_outside_tier() {
        let err = tiers().to_cache(Path::new("/somewhere/else.mkv")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OutsideTier(_)));
        // The root itself is a directory, never a tierable file.
        assert!(tiers().to_cache(Path::new("/mnt/user0/media")).is_err());
    }

    #[test]
    fn test_overlapping_cache_roots_rejected() {
        let result = TierMap::new([
            TierRule::new("/array/a", "/cache").unwrap(),
            TierRule::new("/array/b", "/cache").unwrap(),
        ]);
        assert!(result.is_err());
    }
}
