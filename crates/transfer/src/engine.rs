use crate::error::{ErrorKind, Result};
use crate::request::{TransferMode, TransferRequest};
use crate::result::{TransferResult, TransferWarning};
use crate::space::{SpaceProbe, StatvfsProbe, nearest_existing_ancestor, same_volume};
use crate::{companion, stage};
use exn::{OptionExt, ResultExt};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Subtitle formats that follow a media file between tiers.
pub const DEFAULT_COMPANION_EXTENSIONS: &[&str] = &["srt", "ass", "ssa", "sub", "idx", "vtt", "smi", "sup"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Extensions (without the dot, case-insensitive) that mark a companion.
    pub companion_extensions: Vec<String>,
    /// Bytes that must remain free on the destination after a copy.
    pub min_free_space: u64,
    /// Compare BLAKE3 digests of source and staged copy before publishing.
    pub verify_checksum: bool,
}
impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            companion_extensions: DEFAULT_COMPANION_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            min_free_space: 0,
            verify_checksum: false,
        }
    }
}

/// What a single file's transfer produced.
struct Outcome {
    bytes: u64,
    size: u64,
    warning: Option<TransferWarning>,
}

/// Executes [`TransferRequest`]s with all-or-nothing semantics.
///
/// Cheap to clone. The engine never retries and never touches the registry.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    config: Arc<TransferConfig>,
    probe: Arc<dyn SpaceProbe>,
}
impl TransferEngine {
    pub fn new(config: TransferConfig) -> Self {
        Self::with_probe(config, StatvfsProbe)
    }

    pub fn with_probe(config: TransferConfig, probe: impl SpaceProbe + 'static) -> Self {
        Self { config: Arc::new(config), probe: Arc::new(probe) }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Companion files sitting next to `media`. Unreadable directories yield
    /// none; the media file itself will fail on its own.
    pub async fn companions_for(&self, media: &Path) -> Vec<PathBuf> {
        match companion::discover(media, &self.config.companion_extensions).await {
            Ok(found) => found,
            Err(e) => {
                debug!(path = %media.display(), error = %e, "Could not look for companion files");
                Vec::new()
            },
        }
    }

    /// Runs the full transfer protocol for `request` on a blocking thread.
    ///
    /// Once started, the protocol runs to completion even if the returned
    /// future is dropped. Every outcome is reported through the result,
    /// never as an `Err`.
    #[instrument(skip_all, fields(
        source = %request.source.display(),
        destination = %request.destination.display(),
        mode = ?request.mode,
    ))]
    pub async fn execute(&self, request: TransferRequest) -> TransferResult {
        let engine = self.clone();
        let (source, destination) = (request.source.clone(), request.destination.clone());
        let started = Instant::now();
        match tokio::task::spawn_blocking(move || engine.execute_blocking(request)).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Transfer task did not complete");
                let kind = ErrorKind::IoFailure(format!("transfer task did not complete: {e}"));
                TransferResult::failed(source, destination, kind, started.elapsed())
            },
        }
    }

    /// The synchronous protocol behind [`execute`](Self::execute).
    pub fn execute_blocking(&self, request: TransferRequest) -> TransferResult {
        let started = Instant::now();
        let outcome = match self.transfer_file(&request) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = ?e, "Transfer failed");
                return TransferResult::failed(request.source, request.destination, (*e).clone(), started.elapsed());
            },
        };
        let mut warnings: Vec<TransferWarning> = outcome.warning.into_iter().collect();
        let mut companions = Vec::new();
        for path in &request.companions {
            match self.transfer_companion(&request, path) {
                Ok((destination, outcome)) => {
                    companions.push(destination);
                    warnings.extend(outcome.warning);
                },
                Err(e) => {
                    warn!(companion = %path.display(), error = ?e, "Companion transfer failed");
                    warnings.push(TransferWarning::Companion { path: path.clone(), error: (*e).clone() });
                },
            }
        }
        info!(bytes = outcome.bytes, companions = companions.len(), warnings = warnings.len(), "Transfer complete");
        TransferResult::succeeded(
            request.source,
            request.destination,
            outcome.bytes,
            outcome.size,
            started.elapsed(),
            warnings,
            companions,
        )
    }

    fn transfer_companion(&self, request: &TransferRequest, path: &Path) -> Result<(PathBuf, Outcome)> {
        let destination = companion::destination_for(&request.source, path, &request.destination)
            .ok_or_raise(|| ErrorKind::invalid(format!("{} is not a companion of the media file", path.display())))?;
        let companion_request =
            TransferRequest::new(path, &destination, request.mode).with_overwrite(request.overwrite);
        let outcome = self.transfer_file(&companion_request)?;
        Ok((destination, outcome))
    }

    /// Validate, preflight, stage, publish, then (for moves) remove the
    /// source. Nothing is left behind if this fails before publishing.
    fn transfer_file(&self, request: &TransferRequest) -> Result<Outcome> {
        let metadata = request.validate()?;
        let size = metadata.len();
        let same_volume = same_volume(&request.source, &request.destination);
        let needs_space = match request.mode {
            TransferMode::Copy => true,
            TransferMode::Move => !same_volume,
            TransferMode::Hardlink if !same_volume => {
                exn::bail!(ErrorKind::invalid("hard links cannot cross volumes"))
            },
            TransferMode::Hardlink | TransferMode::Symlink => false,
        };
        if needs_space {
            self.check_space(&request.destination, size)?;
        }

        let created = stage::create_parent(&request.destination)?;
        let temp = stage::temp_path(&request.destination);
        let bytes = match self.stage(request, &temp, &metadata, same_volume) {
            Ok(bytes) => bytes,
            Err(e) => {
                stage::discard(&temp);
                stage::discard_dirs(&created);
                return Err(e);
            },
        };
        if let Err(e) = stage::publish(&temp, &request.destination, request.overwrite) {
            stage::discard(&temp);
            stage::discard_dirs(&created);
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                exn::bail!(ErrorKind::DestinationExists(request.destination.clone()));
            }
            return Err(e).or_raise(|| ErrorKind::io("publishing", &request.destination));
        }
        debug!(destination = %request.destination.display(), bytes, "Published");

        let warning = match request.mode.removes_source() {
            true => Self::remove_source(&request.source),
            false => None,
        };
        Ok(Outcome { bytes, size, warning })
    }

    fn check_space(&self, destination: &Path, size: u64) -> Result<()> {
        let anchor = nearest_existing_ancestor(destination)
            .ok_or_raise(|| ErrorKind::invalid(format!("no existing ancestor for {}", destination.display())))?;
        let available = self.probe.available(anchor).or_raise(|| ErrorKind::io("checking free space on", anchor))?;
        let required = size.saturating_add(self.config.min_free_space);
        if available < required {
            exn::bail!(ErrorKind::InsufficientSpace { required, available });
        }
        Ok(())
    }

    /// Puts the content at `temp`, returning the bytes written.
    fn stage(&self, request: &TransferRequest, temp: &Path, metadata: &Metadata, same_volume: bool) -> Result<u64> {
        let source = &request.source;
        match request.mode {
            TransferMode::Hardlink => {
                stage::hard_link(source, temp).or_raise(|| ErrorKind::io("linking", source))?;
                Ok(0)
            },
            TransferMode::Symlink => {
                stage::symlink(source, temp).or_raise(|| ErrorKind::io("symlinking", source))?;
                Ok(0)
            },
            TransferMode::Move if same_volume => match stage::hard_link(source, temp) {
                Ok(()) => Ok(0),
                Err(e) if stage::links_unsupported(&e) => {
                    debug!(error = %e, "Hard links unavailable; staging a copy instead");
                    self.check_space(&request.destination, metadata.len())?;
                    self.stage_copy(source, temp, metadata)
                },
                Err(e) => Err(e).or_raise(|| ErrorKind::io("linking", source)),
            },
            TransferMode::Copy | TransferMode::Move => self.stage_copy(source, temp, metadata),
        }
    }

    fn stage_copy(&self, source: &Path, temp: &Path, metadata: &Metadata) -> Result<u64> {
        let bytes = stage::copy(source, temp, metadata).or_raise(|| ErrorKind::io("copying", source))?;
        if bytes != metadata.len() {
            exn::bail!(ErrorKind::IoFailure(format!(
                "short copy of {}: {bytes} of {} bytes",
                source.display(),
                metadata.len()
            )));
        }
        if self.config.verify_checksum {
            let expected = stage::checksum(source).or_raise(|| ErrorKind::io("hashing", source))?;
            let actual = stage::checksum(temp).or_raise(|| ErrorKind::io("hashing", temp))?;
            if expected != actual {
                exn::bail!(ErrorKind::IoFailure(format!("checksum mismatch copying {}", source.display())));
            }
        }
        Ok(bytes)
    }

    fn remove_source(source: &Path) -> Option<TransferWarning> {
        match std::fs::remove_file(source) {
            Ok(()) => None,
            Err(e) => {
                warn!(path = %source.display(), error = %e, "Published, but the source could not be removed");
                Some(TransferWarning::SourceNotRemoved { path: source.to_path_buf(), reason: e.to_string() })
            },
        }
    }

    /// Drops a cached file whose array copy is still intact, instead of
    /// moving it back.
    ///
    /// Returns the bytes freed on the cache, or `Ok(None)` without touching
    /// anything when the array copy is missing or differs in size. Cached
    /// companions whose array counterpart is gone are moved back first.
    #[instrument(skip(self, companions), fields(cached = %cached.display(), original = %original.display()))]
    pub async fn release(&self, cached: &Path, original: &Path, companions: &[PathBuf]) -> Result<Option<u64>> {
        let cached_meta = tokio::fs::metadata(cached).await.or_raise(|| ErrorKind::io("inspecting", cached))?;
        let original_meta = match tokio::fs::metadata(original).await {
            Ok(m) if m.is_file() && m.len() == cached_meta.len() => m,
            _ => return Ok(None),
        };

        for path in companions {
            let Some(counterpart) = companion::destination_for(cached, path, original) else {
                continue;
            };
            if tokio::fs::try_exists(&counterpart).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(companion = %path.display(), error = %e, "Could not remove cached companion");
                }
                continue;
            }
            let result = self.execute(TransferRequest::new(path, &counterpart, TransferMode::Move)).await;
            if let Some(error) = result.error() {
                warn!(companion = %path.display(), %error, "Could not move companion back to the array");
            }
        }

        // Links to the array copy free nothing on the cache.
        let linked = is_symlink(cached).await || is_same_file(&cached_meta, &original_meta);
        let freed = match linked {
            true => 0,
            false => cached_meta.len(),
        };
        tokio::fs::remove_file(cached).await.or_raise(|| ErrorKind::io("removing", cached))?;
        info!(bytes_freed = freed, "Released cached copy");
        Ok(Some(freed))
    }
}

async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok_and(|m| m.file_type().is_symlink())
}

#[cfg(unix)]
fn is_same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn is_same_file(_a: &Metadata, _b: &Metadata) -> bool {
    false
}
