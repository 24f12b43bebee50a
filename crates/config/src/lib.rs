//! Configuration loading and validation.
//!
//! Configuration is layered with `figment` (defaults, then a TOML file, then
//! `PLEXCACHE_*` environment variables), validated once, and then only read.
//! Each component gets its own typed configuration out of it:
//! [`Config::mapper`], [`Config::tiers`], [`Config::transfer_config`],
//! [`Config::pool_limits`] and [`Config::cleanup_policy`].

pub mod error;
mod load;
mod settings;

pub(crate) use crate::load::project_dirs;
pub use crate::load::{ENV_PREFIX, default_config_file};
pub use crate::settings::{Cleanup, Config, LogFormat, Logging, Mapping, Paths, RegistrySettings, Tier, Transfer};
