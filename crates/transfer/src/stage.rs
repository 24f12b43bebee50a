//! Staging and publishing primitives.
//!
//! Content is always written to a uniquely named temporary sibling of the
//! destination first. The destination name only ever appears through
//! [`publish`], which is a single link or rename on the same directory.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_PREFIX: &str = ".plexcache-";
const TEMP_SUFFIX: &str = ".tmp";

/// A fresh temporary name in the destination's directory.
pub(crate) fn temp_path(destination: &Path) -> PathBuf {
    let name = destination.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let parent = destination.parent().unwrap_or_else(|| Path::new("/"));
    parent.join(format!("{TEMP_PREFIX}{name}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()))
}

/// Whether `name` looks like an artifact left by [`temp_path`].
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

/// Copies `source` to a new file at `temp`, keeping permissions and the
/// modification time, and flushes it to disk.
pub(crate) fn copy(source: &Path, temp: &Path, metadata: &Metadata) -> io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(temp)?;
    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.set_permissions(metadata.permissions())?;
    if let Ok(modified) = metadata.modified() {
        writer.set_modified(modified)?;
    }
    writer.sync_all()?;
    Ok(bytes)
}

pub(crate) fn hard_link(source: &Path, temp: &Path) -> io::Result<()> {
    fs::hard_link(source, temp)
}

#[cfg(unix)]
pub(crate) fn symlink(source: &Path, temp: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, temp)
}

#[cfg(not(unix))]
pub(crate) fn symlink(_source: &Path, _temp: &Path) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// BLAKE3 digest of a file's content.
pub(crate) fn checksum(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize())
}

/// Link errors meaning "this filesystem (or pair of filesystems) cannot do
/// that", as opposed to a genuine failure.
pub(crate) fn links_unsupported(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::Unsupported | io::ErrorKind::CrossesDevices) || unsupported_os_error(e)
}

#[cfg(unix)]
fn unsupported_os_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EPERM | libc::EXDEV | libc::EMLINK | libc::ENOTSUP))
}

#[cfg(not(unix))]
fn unsupported_os_error(_e: &io::Error) -> bool {
    false
}

/// Moves the staged file at `temp` to `destination`.
///
/// Without `overwrite` this never replaces anything: the destination is
/// created with `link(2)`, which fails atomically if the name is taken. On
/// filesystems without hard links it falls back to an existence check and
/// `rename(2)`, which leaves a small race window.
pub(crate) fn publish(temp: &Path, destination: &Path, overwrite: bool) -> io::Result<()> {
    if overwrite {
        return fs::rename(temp, destination);
    }
    match fs::hard_link(temp, destination) {
        Ok(()) => {
            discard(temp);
            Ok(())
        },
        Err(e) if links_unsupported(&e) => {
            if crate::request::occupied(destination) {
                return Err(io::Error::from(io::ErrorKind::AlreadyExists));
            }
            fs::rename(temp, destination)
        },
        Err(e) => Err(e),
    }
}

/// Best-effort removal of a staging artifact.
pub(crate) fn discard(temp: &Path) {
    match fs::remove_file(temp) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %temp.display(), error = %e, "Could not remove temporary file"),
    }
}

/// Removes directories created for a transfer that did not happen, deepest
/// first. Directories that gained other content are left alone.
pub(crate) fn discard_dirs(created: &[PathBuf]) {
    for dir in created {
        if fs::remove_dir(dir).is_err() {
            break;
        }
    }
}

/// Creates the destination's parent directory, returning the directories
/// that did not exist before (deepest first).
pub(crate) fn create_parent(destination: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = destination.parent() else {
        return Ok(Vec::new());
    };
    let created: Vec<PathBuf> = parent.ancestors().take_while(|p| !p.exists()).map(Path::to_path_buf).collect();
    fs::create_dir_all(parent).or_raise(|| ErrorKind::io("creating directory", parent))?;
    Ok(created)
}

/// When the inode last changed. Staging resets this even though copies keep
/// the source's modification time.
#[cfg(unix)]
fn last_changed(metadata: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    let secs = u64::try_from(metadata.ctime()).ok()?;
    let nanos = u32::try_from(metadata.ctime_nsec()).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn last_changed(metadata: &Metadata) -> Option<SystemTime> {
    metadata.modified().ok()
}

/// Removes temporary files older than `older_than` left under `root` by
/// interrupted transfers. Returns how many were removed.
///
/// Unreadable directories and files are logged and skipped; a missing root
/// counts as empty.
pub async fn sweep_stale_temp_files(root: &Path, older_than: Duration) -> u64 {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut stack = vec![root.to_path_buf()];

    'dirs: while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %current.display(), error = %e, "Could not read directory while sweeping");
                continue 'dirs;
            },
        };
        'entries: loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break 'entries,
                Err(e) => {
                    warn!(path = %current.display(), error = %e, "Could not read directory entry while sweeping");
                    continue 'dirs;
                },
            };
            let Ok(file_type) = entry.file_type().await else {
                continue 'entries;
            };
            if file_type.is_dir() {
                stack.push(entry.path());
                continue 'entries;
            }
            if !is_temp_name(&entry.file_name().to_string_lossy()) {
                continue 'entries;
            }
            let path = entry.path();
            let Ok(metadata) = tokio::fs::symlink_metadata(&path).await else {
                continue 'entries;
            };
            let age = last_changed(&metadata).and_then(|t| now.duration_since(t).ok()).unwrap_or_default();
            if age < older_than {
                continue 'entries;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed stale temporary file");
                    removed += 1;
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove stale temporary file"),
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path(Path::new("/cache/movies/x.mkv"));
        assert_eq!(temp.parent(), Some(Path::new("/cache/movies")));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".plexcache-x.mkv."));
        assert!(is_temp_name(name));
        assert_ne!(temp, temp_path(Path::new("/cache/movies/x.mkv")));
    }

    #[test]
    fn test_copy_preserves_content_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        fs::write(&source, b"media bytes").unwrap();
        let metadata = fs::metadata(&source).unwrap();
        let temp = dir.path().join("staged");
        assert_eq!(copy(&source, &temp, &metadata).unwrap(), 11);
        assert_eq!(fs::read(&temp).unwrap(), b"media bytes");
        assert_eq!(fs::metadata(&temp).unwrap().modified().unwrap(), metadata.modified().unwrap());
        // Never clobbers.
        assert!(copy(&source, &temp, &metadata).is_err());
    }

    #[test]
    fn test_publish_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".plexcache-x.tmp");
        let destination = dir.path().join("x.mkv");
        fs::write(&temp, b"new").unwrap();
        fs::write(&destination, b"old").unwrap();
        let err = publish(&temp, &destination, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&destination).unwrap(), b"old");

        publish(&temp, &destination, true).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"new");
        assert!(!temp.exists());
    }

    #[test]
    fn test_publish_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join(".plexcache-x.tmp");
        let destination = dir.path().join("x.mkv");
        fs::write(&temp, b"new").unwrap();
        publish(&temp, &destination, false).unwrap();
        assert!(!temp.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"new");
    }

    #[test]
    fn test_create_parent_reports_new_directories() {
        let dir = tempfile::tempdir().unwrap();
        let created = create_parent(&dir.path().join("a/b/x.mkv")).unwrap();
        assert_eq!(created, vec![dir.path().join("a/b"), dir.path().join("a")]);
        discard_dirs(&created);
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("tv/Show");
        fs::create_dir_all(&nested).unwrap();
        let stale = nested.join(".plexcache-S01E01.mkv.0123.tmp");
        let media = nested.join("S01E01.mkv");
        fs::write(&stale, b"partial").unwrap();
        fs::write(&media, b"complete").unwrap();

        // Everything is fresh.
        assert_eq!(sweep_stale_temp_files(dir.path(), Duration::from_secs(3600)).await, 0);
        assert!(stale.exists());

        assert_eq!(sweep_stale_temp_files(dir.path(), Duration::ZERO).await, 1);
        assert!(!stale.exists());
        assert!(media.exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(sweep_stale_temp_files(&dir.path().join("nope"), Duration::ZERO).await, 0);
    }
}
