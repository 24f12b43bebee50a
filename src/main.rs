//! plexcache command-line interface.
//!
//! Logs go to stderr, command output to stdout.

use clap::{Parser, Subcommand, ValueEnum};
use exn::ResultExt;
use plexcache::{BatchResult, CatalogFile, Engine, ErrorKind, FileOutcome, PlannedAction, Result, logging};
use plexcache_config::Config;
use plexcache_registry::error::Error as RegistryError;
use plexcache_registry::{CacheReason, Database, EntryStatus, OperationFilter, QueryFilter, Registry, UserId};
use plexcache_transfer::Direction;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Debug, Parser)]
#[command(name = "plexcache", version)]
#[command(about = "Tiers media files between bulk array storage and a fast cache", long_about = None)]
struct Cli {
    /// Configuration file; defaults to config.toml in the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    /// Array to cache
    ToCache,
    /// Cache back to the array
    ToArray,
}
impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::ToCache => Direction::ToCache,
            DirectionArg::ToArray => Direction::ToArray,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy media files into the cache
    Cache {
        /// Paths as the media catalog reports them
        #[arg(required = true)]
        paths: Vec<String>,
        /// watchlist, ondeck, watched, trakt, manual, real_time_watch or active_watching
        #[arg(long, default_value = "manual")]
        reason: String,
        /// Catalog user the files are cached for
        #[arg(long)]
        user: Option<String>,
    },
    /// Move cached media files back to the array
    Evict {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show what a batch would do without changing anything
    Analyze {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, value_enum, default_value = "to-cache")]
        direction: DirectionArg,
    },
    /// Expire, evict and purge cached files
    Cleanup {
        /// Only show what the pass would act on
        #[arg(long)]
        dry_run: bool,
    },
    /// Check that every active entry still has its cached file
    Verify,
    /// List registry entries
    List {
        /// active, orphaned, pending_removal or removed
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Show registry statistics
    Stats,
    /// Show the most recent operations
    Ops {
        /// Only failed operations
        #[arg(long)]
        failures: bool,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = RegistryError>,
{
    value.parse::<T>().or_raise(|| ErrorKind::InvalidArgument(value.to_string()))
}

fn parse_optional<T>(value: Option<&str>) -> Result<Option<T>>
where
    T: FromStr<Err = RegistryError>,
{
    value.map(parse).transpose()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Error: {e:?}");
        return ExitCode::FAILURE;
    }
    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "Command failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(command: Command, config: &Config) -> Result<ExitCode> {
    let db = Database::connect(&config.registry.database).await.or_raise(|| ErrorKind::Registry)?;
    let registry = Registry::from(&db);
    let engine = Engine::new(config, registry.clone())?;
    let now = UtcDateTime::now();

    let code = match command {
        Command::Cache { paths, reason, user } => {
            let reason: CacheReason = parse(&reason)?;
            let user: Option<UserId> = parse_optional(user.as_deref())?;
            let files = paths
                .into_iter()
                .map(|path| CatalogFile { path, reason, user: user.clone() })
                .collect::<Vec<_>>();
            batch(&engine, &files, Direction::ToCache).await?
        },
        Command::Evict { paths } => {
            let files = paths.into_iter().map(|path| CatalogFile::new(path, CacheReason::Manual)).collect::<Vec<_>>();
            batch(&engine, &files, Direction::ToArray).await?
        },
        Command::Analyze { paths, direction } => {
            let files = paths.into_iter().map(|path| CatalogFile::new(path, CacheReason::Manual)).collect::<Vec<_>>();
            let analysis = engine.analyze(&files, direction.into()).await?;
            for preview in &analysis.per_file_preview {
                let action = match &preview.action {
                    PlannedAction::Transfer => "transfer".to_string(),
                    PlannedAction::Release => "release".to_string(),
                    PlannedAction::Skip(reason) => format!("skip ({reason})"),
                    PlannedAction::Reject(error) => format!("reject ({error})"),
                };
                match &preview.destination {
                    Some(destination) => println!("{action:<12} {} -> {}", preview.path, destination.display()),
                    None => println!("{action:<12} {}", preview.path),
                }
            }
            println!("{} files, {} bytes to transfer", analysis.file_count, analysis.total_size);
            ExitCode::SUCCESS
        },
        Command::Cleanup { dry_run: true } => {
            let plan = engine.plan_cleanup(now).await?;
            for entry in plan.expired.iter().chain(&plan.over_quota).chain(&plan.pending_removal) {
                println!("evict   {} ({} bytes)", entry.cached_path.display(), entry.size_bytes);
            }
            for entry in &plan.orphaned {
                println!("retire  {}", entry.cached_path.display());
            }
            println!("{} bytes reclaimable, {} entries purgeable", plan.reclaimable_bytes(), plan.purgeable);
            ExitCode::SUCCESS
        },
        Command::Cleanup { dry_run: false } => {
            let result = engine.run_cleanup(now).await?;
            for failure in &result.errors {
                println!("failed  {failure}");
            }
            println!(
                "{} files removed ({} bytes), {} expired, {} over quota, {} orphaned, {} purged, {} temporary files",
                result.files_removed,
                result.bytes_freed,
                result.entries_expired,
                result.over_quota,
                result.orphans_detected,
                result.entries_purged,
                result.temp_files_removed,
            );
            match result.errors.is_empty() {
                true => ExitCode::SUCCESS,
                false => ExitCode::FAILURE,
            }
        },
        Command::Verify => {
            let report = engine.verify(now).await?;
            println!(
                "{} verified, {} missing ({} newly orphaned)",
                report.verified, report.errors, report.newly_orphaned
            );
            match report.errors {
                0 => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            }
        },
        Command::List { status, user, reason, limit, offset } => {
            let mut filter = QueryFilter::default().page(limit, offset);
            if let Some(status) = parse_optional::<EntryStatus>(status.as_deref())? {
                filter = filter.with_status(status);
            }
            if let Some(user) = parse_optional::<UserId>(user.as_deref())? {
                filter = filter.with_user(user);
            }
            if let Some(reason) = parse_optional::<CacheReason>(reason.as_deref())? {
                filter = filter.with_reason(reason);
            }
            let (entries, total) = registry.query(&filter).await.or_raise(|| ErrorKind::Registry)?;
            for entry in &entries {
                println!(
                    "{} {:<15} {:<15} {:>14} {}",
                    entry.id,
                    entry.status,
                    entry.triggered_by_reason,
                    entry.size_bytes,
                    entry.cached_path.display()
                );
            }
            println!("{} of {total} entries", entries.len());
            ExitCode::SUCCESS
        },
        Command::Stats => {
            let stats = registry.statistics().await.or_raise(|| ErrorKind::Registry)?;
            println!(
                "active {} ({} bytes), pending removal {}, orphaned {}, removed {}, accesses {}",
                stats.active,
                stats.active_bytes,
                stats.pending_removal,
                stats.orphaned,
                stats.removed,
                stats.total_accesses
            );
            for reason in &stats.by_reason {
                println!("  {:<15} {:>6} entries {:>14} bytes", reason.reason, reason.entries, reason.bytes);
            }
            for user in registry.per_user_statistics().await.or_raise(|| ErrorKind::Registry)? {
                println!("  user {:<20} {:>6} entries {:>14} bytes", user.user, user.entries, user.bytes);
            }
            ExitCode::SUCCESS
        },
        Command::Ops { failures, limit } => {
            let mut filter = OperationFilter::default().page(limit, 0);
            if failures {
                filter = filter.failures_only();
            }
            for op in registry.list_operations(&filter).await.or_raise(|| ErrorKind::Registry)? {
                let status = match (&op.success, &op.error_message) {
                    (true, _) => "ok".to_string(),
                    (false, Some(message)) => format!("failed: {message}"),
                    (false, None) => "failed".to_string(),
                };
                println!(
                    "{} {:<11} {} by {} {status}",
                    op.timestamp,
                    op.operation_type,
                    op.file_path.display(),
                    op.triggered_by.as_deref().unwrap_or("-"),
                );
            }
            ExitCode::SUCCESS
        },
    };
    db.close().await;
    Ok(code)
}

/// Runs a batch, letting Ctrl-C stop it between transfers.
async fn batch(engine: &Engine, files: &[CatalogFile], direction: Direction) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, waiting for running transfers to finish");
                cancel.cancel();
            }
        }
    });
    let result = engine.process_batch(files, direction, &cancel).await;
    signal.abort();
    let result = result?;
    print_batch(&result);
    match result.summary.failed == 0 && !result.summary.cancelled {
        true => Ok(ExitCode::SUCCESS),
        false => Ok(ExitCode::FAILURE),
    }
}

fn print_batch(result: &BatchResult) {
    for outcome in &result.per_file {
        match outcome {
            FileOutcome::Transfer(transfer) => match transfer.error() {
                None => println!(
                    "ok      {} -> {} ({} bytes)",
                    transfer.source().display(),
                    transfer.destination().display(),
                    transfer.bytes_transferred()
                ),
                Some(error) => println!("failed  {}: {error}", transfer.source().display()),
            },
            FileOutcome::Released { cached, bytes_freed } => {
                println!("release {} ({bytes_freed} bytes freed)", cached.display())
            },
            FileOutcome::Skipped { path, reason } => println!("skip    {}: {reason}", path.display()),
        }
    }
    let summary = &result.summary;
    println!(
        "{} succeeded, {} failed, {} skipped, {} bytes moved{}",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.bytes_moved,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
}
