use crate::error::{ErrorKind, Result};
use crate::settings::Config;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Prefix of environment variables overriding the configuration. Nested keys
/// are separated by a double underscore:
/// `PLEXCACHE_CLEANUP__RETENTION_DAYS=3` sets `cleanup.retention_days`.
pub const ENV_PREFIX: &str = "PLEXCACHE_";

pub(crate) fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "plexcache")
}

/// `config.toml` in the platform's configuration directory, if there is one.
pub fn default_config_file() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Layers, lowest precedence first: built-in defaults, the TOML file,
    /// then the environment.
    ///
    /// An explicit file must exist; the default one is optional.
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let figment = match (explicit, default_config_file()) {
            (Some(path), _) => figment.merge(Toml::file_exact(path)),
            (None, Some(path)) => figment.merge(Toml::file(path)),
            (None, None) => figment,
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    #[instrument]
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(explicit).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        debug!(database = %config.registry.database.display(), "Configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use plexcache_transfer::TransferMode;
    use std::path::Path;

    #[test]
    fn test_file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "plexcache.toml",
                r#"
                [paths]
                primary = { plex_root = "/plex", local_root = "/mediasource" }
                tiers = [{ array_root = "/mediasource", cache_root = "/fast" }]

                [transfer]
                to_cache_mode = "hardlink"

                [cleanup]
                watchlist_expiry_hours = 6
                watched_expiry_hours = 48
                "#,
            )?;
            jail.set_env("PLEXCACHE_CLEANUP__RETENTION_DAYS", "3");
            jail.set_env("PLEXCACHE_TRANSFER__CONCURRENCY__TO_CACHE_LOCAL", "8");

            let config = Config::load(Some(Path::new("plexcache.toml"))).map_err(|e| format!("{e:?}"))?;
            assert_eq!(config.paths.primary.local_root, Path::new("/mediasource"));
            assert_eq!(config.transfer.to_cache_mode, TransferMode::Hardlink);
            assert_eq!(config.transfer.concurrency.to_cache_local, 8);
            // Untouched keys keep their defaults.
            assert_eq!(config.transfer.concurrency.to_array_network, 1);
            assert_eq!(config.cleanup.retention_days, 3);
            assert_eq!(config.cleanup.watchlist_expiry_hours, 6);
            assert_eq!(config.logging.level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        Jail::expect_with(|_jail| {
            let err = Config::load(Some(Path::new("missing.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected_at_load() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "plexcache.toml",
                "[cleanup]\nwatchlist_expiry_hours = 72\nwatched_expiry_hours = 24\n",
            )?;
            let err = Config::load(Some(Path::new("plexcache.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("plexcache.toml", "[transfer]\nparallelism = 4\n")?;
            assert!(Config::load(Some(Path::new("plexcache.toml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_real_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[registry]\ndatabase = \"/var/lib/plexcache/registry.db\"\n").unwrap();
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file_exact(&path))
            .extract()
            .unwrap();
        assert_eq!(config.registry.database, Path::new("/var/lib/plexcache/registry.db"));
    }
}
