use crate::batch::{BatchResult, CatalogFile, DryRunAnalysis, FileOutcome, FilePreview, PlannedAction, SkipReason};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use plexcache_cleanup::{Cleaner, CleanupPlan, CleanupResult};
use plexcache_config::Config;
use plexcache_path::error::ErrorKind as PathErrorKind;
use plexcache_path::{PathMapper, TierMap};
use plexcache_registry::error::{Error as RegistryError, ErrorKind as RegistryErrorKind, Result as RegistryResult};
use plexcache_registry::{
    CacheMethod, CachedFileEntry, EntryStatus, IntegrityReport, NewEntry, NewOperation, OperationType, Registry, UserId,
};
use plexcache_transfer::error::ErrorKind as TransferErrorKind;
use plexcache_transfer::{Direction, TransferEngine, TransferMode, TransferPool, TransferRequest, TransferResult};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Recorded as the cause of operations no user asked for.
const ORCHESTRATOR: &str = "orchestrator";

/// What to do with one catalog file.
enum Plan {
    Transfer(TransferRequest),
    Release { cached: PathBuf, original: PathBuf, companions: Vec<PathBuf> },
    Skip { path: PathBuf, reason: SkipReason },
    Reject { path: PathBuf, error: TransferErrorKind },
}

struct Planned {
    plan: Plan,
    /// The registry entry currently responsible for the cached path.
    entry: Option<CachedFileEntry>,
}

fn cache_method(mode: TransferMode) -> CacheMethod {
    match mode {
        TransferMode::Copy | TransferMode::Move => CacheMethod::Copy,
        TransferMode::Hardlink => CacheMethod::Hardlink,
        TransferMode::Symlink => CacheMethod::Symlink,
    }
}

fn operation_type(direction: Direction) -> OperationType {
    match direction {
        Direction::ToCache => OperationType::Cache,
        Direction::ToArray => OperationType::Restore,
    }
}

/// `true` if `original` is a regular file the same size as `cached`.
async fn array_copy_intact(cached: &Path, original: &Path) -> bool {
    match (tokio::fs::metadata(cached).await, tokio::fs::metadata(original).await) {
        (Ok(cached), Ok(original)) => original.is_file() && original.len() == cached.len(),
        _ => false,
    }
}

/// Size of a transfer source, rejected the way the transfer itself would be.
async fn source_size(source: &Path) -> std::result::Result<u64, TransferErrorKind> {
    match tokio::fs::metadata(source).await {
        Ok(m) if m.is_file() => Ok(m.len()),
        Ok(_) => Err(TransferErrorKind::InvalidRequest(format!(
            "source is not a regular file: {}",
            source.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TransferErrorKind::InvalidRequest(format!(
            "source does not exist: {}",
            source.display()
        ))),
        Err(e) => Err(TransferErrorKind::IoFailure(format!("inspecting {}: {e}", source.display()))),
    }
}

/// Ties path mapping, transfers, the registry and cleanup together.
///
/// The engine owns no schedule: the caller decides when batches and cleanup
/// passes run. Everything it needs comes from the [`Config`] it was built
/// with; nothing is global.
pub struct Engine {
    mapper: PathMapper,
    tiers: TierMap,
    to_cache_mode: TransferMode,
    pool: TransferPool,
    registry: Registry,
    cleaner: Cleaner,
}

impl Engine {
    pub fn new(config: &Config, registry: Registry) -> Result<Self> {
        Self::with_transfer_engine(config, registry, TransferEngine::new(config.transfer_config()))
    }

    /// Like [`new`](Self::new), with a ready-made transfer engine.
    pub fn with_transfer_engine(config: &Config, registry: Registry, engine: TransferEngine) -> Result<Self> {
        let mapper = config.mapper().or_raise(|| ErrorKind::Config)?;
        let tiers = config.tiers().or_raise(|| ErrorKind::Config)?;
        let limits = config.pool_limits().or_raise(|| ErrorKind::Config)?;
        let policy = config.cleanup_policy().or_raise(|| ErrorKind::Config)?;
        let cleaner = Cleaner::new(registry.clone(), engine.clone(), policy).or_raise(|| ErrorKind::Config)?;
        Ok(Self {
            mapper,
            tiers,
            to_cache_mode: config.transfer.to_cache_mode,
            pool: TransferPool::new(engine, limits),
            registry,
            cleaner,
        })
    }

    /// Query and dashboard operations.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn transfers(&self) -> &TransferEngine {
        self.pool.engine()
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Moves `files` towards `direction` and records the outcome.
    ///
    /// Single files failing never fail the batch; the result covers every
    /// file. Cancellation stops new transfers from starting, those already
    /// running complete. Only a registry that cannot be read fails the call,
    /// and it does so before anything is transferred.
    #[instrument(skip_all, fields(files = files.len(), ?direction))]
    pub async fn process_batch(
        &self,
        files: &[CatalogFile],
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let mut planned = Vec::with_capacity(files.len());
        for file in files {
            planned.push(self.plan(file, direction).await?);
        }

        let now = UtcDateTime::now();
        let mut outcomes: Vec<Option<FileOutcome>> = (0..files.len()).map(|_| None).collect();
        let mut queued = Vec::new();
        let mut requests = Vec::new();
        for (index, (file, Planned { plan, entry })) in files.iter().zip(planned).enumerate() {
            let outcome = match plan {
                Plan::Reject { path, error } => {
                    self.log(NewOperation::failed(operation_type(direction), &path, &error), file, now).await;
                    FileOutcome::Transfer(TransferResult::rejected(&path, &path, error))
                },
                Plan::Skip { path, reason } => {
                    if let Some(entry) = &entry {
                        self.keep(file, entry, reason, now).await;
                    }
                    FileOutcome::Skipped { path, reason }
                },
                Plan::Release { cached, .. } if cancel.is_cancelled() => {
                    FileOutcome::Skipped { path: cached, reason: SkipReason::Cancelled }
                },
                Plan::Release { cached, original, companions } => {
                    self.release(file, entry.as_ref(), cached, original, companions, now).await
                },
                Plan::Transfer(request) => {
                    queued.push((index, entry, request.source.clone()));
                    requests.push(request);
                    continue;
                },
            };
            outcomes[index] = Some(outcome);
        }

        let run = self.pool.run(direction, requests, cancel).await;
        let mut results = run.results.into_iter();
        for (index, entry, source) in queued {
            let outcome = match results.next() {
                Some(result) => self.record_transfer(&files[index], direction, entry.as_ref(), result, now).await,
                None => FileOutcome::Skipped { path: source, reason: SkipReason::Cancelled },
            };
            outcomes[index] = Some(outcome);
        }

        let result = BatchResult::new(outcomes.into_iter().flatten().collect());
        info!(
            succeeded = result.summary.succeeded,
            failed = result.summary.failed,
            skipped = result.summary.skipped,
            bytes = result.summary.bytes_moved,
            cancelled = result.summary.cancelled,
            "Batch processed"
        );
        Ok(result)
    }

    /// Previews [`process_batch`](Self::process_batch) without changing
    /// anything.
    #[instrument(skip_all, fields(files = files.len(), ?direction))]
    pub async fn analyze(&self, files: &[CatalogFile], direction: Direction) -> Result<DryRunAnalysis> {
        let mut analysis = DryRunAnalysis::default();
        for file in files {
            let Planned { plan, .. } = self.plan(file, direction).await?;
            let (source, destination, action) = match plan {
                Plan::Transfer(request) => (Some(request.source), Some(request.destination), PlannedAction::Transfer),
                Plan::Release { cached, original, .. } => (Some(cached), Some(original), PlannedAction::Release),
                Plan::Skip { path, reason } => (None, Some(path), PlannedAction::Skip(reason)),
                Plan::Reject { error, .. } => (None, None, PlannedAction::Reject(error)),
            };
            let (size, action) = match (&source, action) {
                (Some(source), PlannedAction::Transfer) => match source_size(source).await {
                    Ok(size) => (size, PlannedAction::Transfer),
                    Err(error) => (0, PlannedAction::Reject(error)),
                },
                (Some(source), action) => (tokio::fs::metadata(source).await.map_or(0, |m| m.len()), action),
                (None, action) => (0, action),
            };
            if action == PlannedAction::Transfer {
                analysis.total_size += size;
            }
            analysis.per_file_preview.push(FilePreview { path: file.path.clone(), source, destination, size, action });
        }
        analysis.file_count = u64::try_from(files.len()).unwrap_or(u64::MAX);
        Ok(analysis)
    }

    async fn plan(&self, file: &CatalogFile, direction: Direction) -> Result<Planned> {
        let reject = |path: PathBuf, error| Planned { plan: Plan::Reject { path, error }, entry: None };
        let resolved = match self.mapper.resolve(&file.path) {
            Ok(resolved) => resolved,
            Err(e) => {
                let kind: &PathErrorKind = &e;
                let error = match kind.is_security_violation() {
                    true => TransferErrorKind::PathSecurityViolation(kind.to_string()),
                    false => TransferErrorKind::InvalidRequest(kind.to_string()),
                };
                return Ok(reject(PathBuf::from(&file.path), error));
            },
        };
        let cache_path = match self.tiers.to_cache(&resolved.path) {
            Ok(path) => path,
            Err(e) => return Ok(reject(resolved.path, TransferErrorKind::InvalidRequest((*e).to_string()))),
        };
        let entry = self.registry.get_live_by_cached_path(&cache_path).await.or_raise(|| ErrorKind::Registry)?;

        let plan = match direction {
            Direction::ToCache => match entry.as_ref().map(|e| e.status) {
                Some(EntryStatus::Active) => Plan::Skip { path: cache_path, reason: SkipReason::AlreadyCached },
                Some(_) => Plan::Skip { path: cache_path, reason: SkipReason::Reactivated },
                None => {
                    let companions = self.transfers().companions_for(&resolved.path).await;
                    let request = TransferRequest::new(resolved.path, cache_path, self.to_cache_mode);
                    Plan::Transfer(request.with_companions(companions))
                },
            },
            Direction::ToArray => {
                let original = entry.as_ref().map_or(resolved.path, |e| e.original_path.clone());
                if tokio::fs::symlink_metadata(&cache_path).await.is_err() {
                    Plan::Skip { path: cache_path, reason: SkipReason::NotCached }
                } else {
                    let companions = self.transfers().companions_for(&cache_path).await;
                    match array_copy_intact(&cache_path, &original).await {
                        true => Plan::Release { cached: cache_path, original, companions },
                        false => Plan::Transfer(
                            TransferRequest::new(cache_path, original, TransferMode::Move).with_companions(companions),
                        ),
                    }
                }
            },
        };
        Ok(Planned { plan, entry })
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    async fn log(&self, operation: NewOperation, file: &CatalogFile, now: UtcDateTime) {
        let who = file.user.as_ref().map_or(ORCHESTRATOR, UserId::as_str);
        if let Err(e) = self.registry.log_operation(operation.triggered_by(who), now).await {
            warn!(error = ?e, "Could not append to the operation log");
        }
    }

    /// A file that needed no transfer is still wanted by whoever asked.
    async fn keep(&self, file: &CatalogFile, entry: &CachedFileEntry, reason: SkipReason, now: UtcDateTime) {
        if reason == SkipReason::Reactivated {
            match self.registry.reactivate(entry.id, now).await {
                Ok(_) => {
                    let operation = NewOperation::succeeded(OperationType::Reactivate, &entry.cached_path);
                    self.log(operation, file, now).await
                },
                Err(e) => warn!(id = %entry.id, error = ?e, "Could not reactivate entry"),
            }
        }
        if let Some(user) = &file.user
            && let Err(e) = self.registry.add_attribution(entry.id, user, file.reason, now).await
        {
            warn!(id = %entry.id, %user, error = ?e, "Could not record attribution");
        }
        if let Err(e) = self.registry.record_access(entry.id, now).await {
            warn!(id = %entry.id, error = ?e, "Could not record access");
        }
    }

    async fn release(
        &self,
        file: &CatalogFile,
        entry: Option<&CachedFileEntry>,
        cached: PathBuf,
        original: PathBuf,
        companions: Vec<PathBuf>,
        now: UtcDateTime,
    ) -> FileOutcome {
        match self.transfers().release(&cached, &original, &companions).await {
            Ok(Some(bytes_freed)) => {
                self.retire(entry, now).await;
                self.log(NewOperation::succeeded(OperationType::Release, &cached), file, now).await;
                FileOutcome::Released { cached, bytes_freed }
            },
            Ok(None) => {
                // The array copy changed since planning.
                let request = TransferRequest::new(&cached, &original, TransferMode::Move).with_companions(companions);
                let result = self.transfers().execute(request).await;
                self.record_transfer(file, Direction::ToArray, entry, result, now).await
            },
            Err(e) => {
                warn!(path = %cached.display(), error = ?e, "Could not release cached copy");
                self.log(NewOperation::failed(OperationType::Release, &cached, &*e), file, now).await;
                FileOutcome::Transfer(TransferResult::rejected(cached, original, (*e).clone()))
            },
        }
    }

    async fn retire(&self, entry: Option<&CachedFileEntry>, now: UtcDateTime) {
        let Some(entry) = entry else {
            return;
        };
        if let Err(e) = self.registry.mark_removed(entry.id, now).await {
            warn!(id = %entry.id, error = ?e, "Could not mark entry removed");
        }
    }

    async fn record_transfer(
        &self,
        file: &CatalogFile,
        direction: Direction,
        entry: Option<&CachedFileEntry>,
        result: TransferResult,
        now: UtcDateTime,
    ) -> FileOutcome {
        let operation = operation_type(direction);
        if let Some(error) = result.error() {
            self.log(NewOperation::failed(operation, result.source(), error), file, now).await;
            return FileOutcome::Transfer(result);
        }
        match direction {
            Direction::ToCache => {
                if let Err(e) = self.register(file, &result, now).await {
                    return self.unregistered(file, result, &e, now).await;
                }
            },
            // The cached copy is still there; a later pass releases it.
            Direction::ToArray if result.duplicated() => {},
            Direction::ToArray => self.retire(entry, now).await,
        }
        self.log(NewOperation::succeeded(operation, result.destination()), file, now).await;
        if result.duplicated() {
            self.log(NewOperation::succeeded(OperationType::Duplicate, result.source()), file, now).await;
        }
        FileOutcome::Transfer(result)
    }

    /// Records a new cached file. Losing the race to another batch is not an
    /// error: the winner's entry gains the attribution instead.
    async fn register(&self, file: &CatalogFile, result: &TransferResult, now: UtcDateTime) -> RegistryResult<()> {
        let entry = NewEntry {
            canonical_path: PathBuf::from(&file.path),
            original_path: result.source().to_path_buf(),
            cached_path: result.destination().to_path_buf(),
            method: cache_method(self.to_cache_mode),
            size_bytes: result.size(),
            triggered_by_user: file.user.clone(),
            triggered_by_reason: file.reason,
        };
        match self.registry.add_entry(entry, now).await {
            Ok(entry) => debug!(id = %entry.id, path = %entry.cached_path.display(), "Cached file registered"),
            Err(e) if matches!(&*e, RegistryErrorKind::Conflict(_)) => {
                warn!(path = %result.destination().display(), "Cached file was registered concurrently");
                let Some(user) = &file.user else {
                    return Ok(());
                };
                if let Ok(Some(winner)) = self.registry.get_live_by_cached_path(result.destination()).await
                    && let Err(e) = self.registry.add_attribution(winner.id, user, file.reason, now).await
                {
                    warn!(id = %winner.id, error = ?e, "Could not record attribution");
                }
            },
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Takes back a transfer the registry has no record of, so the cache never
    /// holds a file cleanup cannot see. The file counts as failed.
    async fn unregistered(
        &self,
        file: &CatalogFile,
        result: TransferResult,
        cause: &RegistryError,
        now: UtcDateTime,
    ) -> FileOutcome {
        let (original, cached) = (result.source(), result.destination());
        error!(path = %cached.display(), error = ?cause, "Cached file could not be registered");
        let companions = result.companions().to_vec();
        let undone = match self.transfers().release(cached, original, &companions).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                let request = TransferRequest::new(cached, original, TransferMode::Move).with_companions(companions);
                self.transfers().execute(request).await.success()
            },
            Err(e) => {
                warn!(error = ?e, "Could not release unregistered file");
                false
            },
        };
        if !undone {
            error!(path = %cached.display(), "Unregistered file left on the cache");
        }
        let error = TransferErrorKind::IoFailure(format!("registering {}: {}", cached.display(), &**cause));
        self.log(NewOperation::failed(OperationType::Cache, original, &error), file, now).await;
        FileOutcome::Transfer(TransferResult::rejected(original, cached, error))
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    pub async fn run_cleanup(&self, now: UtcDateTime) -> Result<CleanupResult> {
        self.cleaner.run(now).await.or_raise(|| ErrorKind::Cleanup)
    }

    pub async fn plan_cleanup(&self, now: UtcDateTime) -> Result<CleanupPlan> {
        self.cleaner.plan(now).await.or_raise(|| ErrorKind::Cleanup)
    }

    pub async fn verify(&self, now: UtcDateTime) -> Result<IntegrityReport> {
        self.registry.verify_integrity(now).await.or_raise(|| ErrorKind::Registry)
    }
}
