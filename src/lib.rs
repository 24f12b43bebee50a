//! Media cache tiering.
//!
//! Media lives on slow bulk storage (the array). Files the media catalog
//! expects to be played soon are copied onto a fast cache, and moved back or
//! dropped once nobody wants them anymore. The [`Engine`] ties the pieces
//! together:
//!
//! - `plexcache-path` maps catalog paths onto local storage and rejects
//!   anything that could escape it.
//! - `plexcache-transfer` moves files atomically, companions included.
//! - `plexcache-registry` remembers what is cached, for whom and why.
//! - `plexcache-cleanup` expires and evicts cached files.
//!
//! ```no_run
//! # async fn run() -> plexcache::Result<()> {
//! use exn::ResultExt;
//! use plexcache::{CatalogFile, Engine, ErrorKind};
//! use plexcache_registry::{CacheReason, Database, Registry};
//! use plexcache_transfer::Direction;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = plexcache_config::Config::default();
//! let db = Database::connect(&config.registry.database).await.or_raise(|| ErrorKind::Registry)?;
//! let engine = Engine::new(&config, Registry::from(&db))?;
//! let files = [CatalogFile::new("/data/movies/Heat (1995)/Heat.mkv", CacheReason::OnDeck)];
//! let result = engine.process_batch(&files, Direction::ToCache, &CancellationToken::new()).await?;
//! println!("{} cached", result.summary.succeeded);
//! # Ok(())
//! # }
//! ```

mod batch;
mod engine;
pub mod error;
pub mod logging;

pub use crate::batch::{
    BatchResult, BatchSummary, CatalogFile, DryRunAnalysis, FileOutcome, FilePreview, PlannedAction, SkipReason,
};
pub use crate::engine::Engine;
pub use crate::error::{Error, ErrorKind, Result};
