//! Free space and volume detection.

use std::fmt::Debug;
use std::io;
use std::path::Path;

/// Reports the bytes available to unprivileged writers on the volume that
/// holds `path`.
pub trait SpaceProbe: Debug + Send + Sync {
    fn available(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the operating system via `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl SpaceProbe for StatvfsProbe {
    #[cfg(unix)]
    #[allow(clippy::unnecessary_cast)] // statvfs field types vary by platform
    fn available(&self, path: &Path) -> io::Result<u64> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let c_path =
            CString::new(path.as_os_str().as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        // SAFETY: c_path is NUL-terminated and stat points to writable memory.
        let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: statvfs succeeded, stat is now initialized.
        let stat = unsafe { stat.assume_init() };
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }

    #[cfg(not(unix))]
    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}

/// Always reports the same number of bytes.
#[cfg(any(test, feature = "mock"))]
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe(pub u64);

#[cfg(any(test, feature = "mock"))]
impl SpaceProbe for FixedSpaceProbe {
    fn available(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Whether a transfer stays on one device or crosses volumes.
///
/// Network-backed mounts collapse under parallelism far earlier than local
/// disks, so the pool sizes the two independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    Local,
    Network,
}

/// Walks up from `path` to the first ancestor that exists. The destination
/// directory frequently does not exist yet.
pub(crate) fn nearest_existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Compares device ids of `source` and the nearest existing ancestor of
/// `destination`. Unknown means "not the same volume".
#[cfg(unix)]
pub(crate) fn same_volume(source: &Path, destination: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Some(anchor) = nearest_existing_ancestor(destination) else {
        return false;
    };
    match (std::fs::metadata(source), std::fs::metadata(anchor)) {
        (Ok(s), Ok(d)) => s.dev() == d.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn same_volume(_source: &Path, _destination: &Path) -> bool {
    false
}

/// Classifies a source/destination pair for the worker pool.
pub fn locality(source: &Path, destination: &Path) -> Locality {
    match same_volume(source, destination) {
        true => Locality::Local,
        false => Locality::Network,
    }
}

/// [`locality`] on a blocking thread. Unknown means [`Locality::Network`],
/// the more conservative limit.
pub async fn locality_of(source: &Path, destination: &Path) -> Locality {
    let (source, destination) = (source.to_path_buf(), destination.to_path_buf());
    tokio::task::spawn_blocking(move || locality(&source, &destination)).await.unwrap_or(Locality::Network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c/file.mkv");
        assert_eq!(nearest_existing_ancestor(&deep), Some(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_same_volume_within_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        std::fs::write(&source, b"x").unwrap();
        assert!(same_volume(&source, &dir.path().join("not/yet/created.mkv")));
        assert_eq!(locality(&source, &dir.path().join("x.mkv")), Locality::Local);
        assert!(!same_volume(&dir.path().join("missing.mkv"), dir.path()));
    }

    #[tokio::test]
    async fn test_locality_of_matches_blocking_check() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mkv");
        std::fs::write(&source, b"x").unwrap();
        let destination = dir.path().join("cache/x.mkv");
        assert_eq!(locality_of(&source, &destination).await, locality(&source, &destination));
    }

    #[cfg(unix)]
    #[test]
    fn test_statvfs_reports_space() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StatvfsProbe.available(dir.path()).is_ok());
        assert!(StatvfsProbe.available(&dir.path().join("missing")).is_err());
    }
}
