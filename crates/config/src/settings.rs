use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use plexcache_cleanup::CleanupPolicy;
use plexcache_path::{DEFAULT_MAX_LENGTH, MappingRule, PathMapper, TierMap, TierRule};
use plexcache_transfer::{DEFAULT_COMPANION_EXTENSIONS, PoolLimits, TransferConfig, TransferMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Everything plexcache can be configured with. Loaded once at startup with
/// [`Config::load`](crate::Config::load) and passed around by reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub transfer: Transfer,
    pub cleanup: Cleanup,
    pub registry: RegistrySettings,
    pub logging: Logging,
}

/// Rewrites a media catalog path prefix onto a local one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mapping {
    pub plex_root: PathBuf,
    pub local_root: PathBuf,
}

/// Pairs bulk storage with the cache that fronts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tier {
    pub array_root: PathBuf,
    pub cache_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Relative catalog paths resolve under this rule.
    pub primary: Mapping,
    pub additional: Vec<Mapping>,
    pub tiers: Vec<Tier>,
    /// In bytes.
    pub max_path_length: usize,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            primary: Mapping { plex_root: "/data".into(), local_root: "/mnt/user0".into() },
            additional: Vec::new(),
            tiers: vec![Tier { array_root: "/mnt/user0".into(), cache_root: "/mnt/cache".into() }],
            max_path_length: DEFAULT_MAX_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Transfer {
    /// How files are placed into the cache. Evictions always move.
    pub to_cache_mode: TransferMode,
    pub concurrency: PoolLimits,
    pub companion_extensions: Vec<String>,
    /// Bytes kept free on a destination volume.
    pub min_free_space: u64,
    pub verify_checksum: bool,
}
impl Default for Transfer {
    fn default() -> Self {
        Self {
            to_cache_mode: TransferMode::Copy,
            concurrency: PoolLimits::default(),
            companion_extensions: DEFAULT_COMPANION_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            min_free_space: 0,
            verify_checksum: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Cleanup {
    pub watchlist_expiry_hours: u32,
    pub watched_expiry_hours: u32,
    /// Manually cached files are kept until removed if unset.
    pub manual_expiry_hours: Option<u32>,
    pub retention_days: u32,
    pub max_cache_bytes: Option<u64>,
    pub temp_file_max_age_hours: u32,
}
impl Default for Cleanup {
    fn default() -> Self {
        Self {
            watchlist_expiry_hours: 7 * 24,
            watched_expiry_hours: 14 * 24,
            manual_expiry_hours: None,
            retention_days: 7,
            max_cache_bytes: None,
            temp_file_max_age_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    pub database: PathBuf,
}
impl Default for RegistrySettings {
    fn default() -> Self {
        let database = match crate::project_dirs() {
            Some(dirs) => dirs.data_dir().join("registry.db"),
            None => PathBuf::from("plexcache.db"),
        };
        Self { database }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    /// An `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}
impl Default for Logging {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

impl Config {
    /// Checks every section by building the component configurations from
    /// it. A configuration that passes cannot fail any conversion later.
    pub fn validate(&self) -> Result<()> {
        self.mapper()?;
        self.tiers()?;
        self.pool_limits()?;
        self.cleanup_policy()?;
        if self.logging.level.trim().is_empty() {
            exn::bail!(ErrorKind::invalid("logging.level must not be empty"));
        }
        Ok(())
    }

    pub fn mapper(&self) -> Result<PathMapper> {
        let rule = |m: &Mapping, key: &str| {
            MappingRule::new(&m.plex_root, &m.local_root)
                .or_raise(|| ErrorKind::invalid(format!("{key}: {}", m.local_root.display())))
        };
        let primary = rule(&self.paths.primary, "paths.primary")?;
        let additional = self
            .paths
            .additional
            .iter()
            .map(|m| rule(m, "paths.additional"))
            .collect::<Result<Vec<_>>>()?;
        if self.paths.max_path_length == 0 {
            exn::bail!(ErrorKind::invalid("paths.max_path_length must be positive"));
        }
        let mapper = PathMapper::new(primary, additional).or_raise(|| ErrorKind::invalid("paths: ambiguous mapping"))?;
        Ok(mapper.with_max_length(self.paths.max_path_length))
    }

    pub fn tiers(&self) -> Result<TierMap> {
        if self.paths.tiers.is_empty() {
            exn::bail!(ErrorKind::invalid("paths.tiers must name at least one tier"));
        }
        let rules = self
            .paths
            .tiers
            .iter()
            .map(|t| {
                TierRule::new(&t.array_root, &t.cache_root)
                    .or_raise(|| ErrorKind::invalid(format!("paths.tiers: {}", t.array_root.display())))
            })
            .collect::<Result<Vec<_>>>()?;
        TierMap::new(rules).or_raise(|| ErrorKind::invalid("paths.tiers: ambiguous tiers"))
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            companion_extensions: self.transfer.companion_extensions.clone(),
            min_free_space: self.transfer.min_free_space,
            verify_checksum: self.transfer.verify_checksum,
        }
    }

    pub fn pool_limits(&self) -> Result<PoolLimits> {
        let limits = self.transfer.concurrency;
        let all = [limits.to_cache_local, limits.to_cache_network, limits.to_array_local, limits.to_array_network];
        if all.contains(&0) {
            exn::bail!(ErrorKind::invalid("transfer.concurrency limits must be positive"));
        }
        Ok(limits)
    }

    /// Temporary files are swept from every cache root.
    pub fn cleanup_policy(&self) -> Result<CleanupPolicy> {
        let hours = |h: u32| Duration::hours(i64::from(h));
        let policy = CleanupPolicy {
            watchlist_expiry: hours(self.cleanup.watchlist_expiry_hours),
            watched_expiry: hours(self.cleanup.watched_expiry_hours),
            manual_expiry: self.cleanup.manual_expiry_hours.map(hours),
            retention: Duration::days(i64::from(self.cleanup.retention_days)),
            max_cache_bytes: self.cleanup.max_cache_bytes,
            temp_file_max_age: hours(self.cleanup.temp_file_max_age_hours),
            sweep_roots: self.paths.tiers.iter().map(|t| t.cache_root.clone()).collect(),
        };
        policy.validate().or_raise(|| ErrorKind::invalid("cleanup"))?;
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        let resolved = config.mapper().unwrap().resolve("/data/movies/x.mkv").unwrap();
        assert_eq!(resolved.path, Path::new("/mnt/user0/movies/x.mkv"));
        assert_eq!(config.tiers().unwrap().to_cache(&resolved.path).unwrap(), Path::new("/mnt/cache/movies/x.mkv"));
        assert_eq!(config.cleanup_policy().unwrap().sweep_roots, vec![PathBuf::from("/mnt/cache")]);
    }

    #[test]
    fn test_watchlist_longer_than_watched_is_invalid() {
        let mut config = Config::default();
        config.cleanup.watchlist_expiry_hours = 49;
        config.cleanup.watched_expiry_hours = 48;
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let mut config = Config::default();
        config.transfer.concurrency.to_array_network = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_local_roots_are_invalid() {
        let mut config = Config::default();
        config.paths.additional.push(Mapping { plex_root: "/other".into(), local_root: "/mnt/user0".into() });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_roots_are_invalid() {
        let mut config = Config::default();
        config.paths.tiers[0].cache_root = "cache".into();
        assert!(config.validate().is_err());
        let mut config = Config::default();
        config.paths.primary.local_root = "mnt/user0".into();
        assert!(config.validate().is_err());
    }
}
