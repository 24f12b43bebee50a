//! Log output for the command-line tool.
//!
//! Logs go to stderr so stdout only carries command output. `RUST_LOG`
//! overrides the configured level.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use plexcache_config::{LogFormat, Logging};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub fn init(config: &Logging) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).or_raise(|| ErrorKind::Logging)?,
    };
    let layer = fmt::layer().with_writer(std::io::stderr);
    let layer = match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    };
    tracing_subscriber::registry().with(filter).with(layer).try_init().or_raise(|| ErrorKind::Logging)
}
