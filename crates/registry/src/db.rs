//! Connection pool for the registry file.
//!
//! Two writers share the registry: a batch registering finished transfers
//! and a cleanup pass flipping entry statuses. Both only hold short
//! transactions, so SQLite's single WAL writer with a generous busy timeout
//! is enough, and readers (dashboard queries, integrity checks) never wait
//! on either of them.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ErrorKind, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// More connections than this only queue on the writer lock.
const MAX_CONNECTIONS: u32 = 4;
/// Status transitions are compare-and-set and nobody retries a lost
/// `SQLITE_BUSY`, so waiting for the lock beats failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// The operation log only ever grows; the WAL file must not follow it.
const JOURNAL_SIZE_LIMIT: &str = "PRAGMA journal_size_limit = 8388608";

/// The registry database. Wrap it in a [`Registry`](crate::Registry) to work
/// with entries.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (or creates) the registry at `path`, creating missing parent
    /// directories, and brings the schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Database)?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .after_connect(|conn, _| Box::pin(async move { Self::configure(conn).await }))
            .connect_with(Self::options().filename(path).create_if_missing(true))
            .await
            .or_raise(|| ErrorKind::Database)?;
        debug!(path = %path.display(), "Registry opened");
        Self::ready(pool).await
    }

    /// A private, empty registry for tests; available to other crates' tests
    /// as well, so not behind `cfg(test)`.
    pub async fn connect_in_memory() -> Result<Self> {
        // Each connection to ":memory:" is a database of its own, dropped
        // with the connection: exactly one, never recycled.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .after_connect(|conn, _| Box::pin(async move { Self::configure(conn).await }))
            .connect_with(Self::options().filename(":memory:"))
            .await
            .or_raise(|| ErrorKind::Database)?;
        Self::ready(pool).await
    }

    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            // Attributions cascade with their entry.
            .foreign_keys(true)
            // The registry is the only record of what the cache holds. A
            // commit lost to a power cut leaves a file nobody will evict.
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT)
    }

    async fn configure(conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(JOURNAL_SIZE_LIMIT).execute(conn).await?;
        Ok(())
    }

    async fn ready(pool: SqlitePool) -> Result<Self> {
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[instrument(skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoints the WAL into the main file, so a registry copied after
    /// shutdown is complete on its own, then closes every connection.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await;
        self.pool.close().await;
    }
}
