use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

/// How the destination is produced from the source.
///
/// Every mode stages into a temporary sibling of the destination and
/// publishes with a single rename-like step, so none of them is ever
/// observable half-done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransferMode {
    /// Full copy, source left in place.
    Copy,
    /// Copy (or rename, on the same volume) then remove the source.
    #[default]
    Move,
    /// Hard link to the source. Same volume only.
    Hardlink,
    /// Symbolic link pointing at the source.
    Symlink,
}
impl TransferMode {
    /// Whether the source is removed after publishing.
    pub fn removes_source(&self) -> bool {
        matches!(self, Self::Move)
    }
}

/// One unit of work for the [`TransferEngine`](crate::TransferEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: TransferMode,
    /// Companion files (subtitles) travelling with the source. Each one is
    /// transferred into the destination's directory.
    pub companions: Vec<PathBuf>,
    /// Replace an existing destination instead of failing.
    pub overwrite: bool,
}
impl TransferRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, mode: TransferMode) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mode,
            companions: Vec::new(),
            overwrite: false,
        }
    }

    pub fn with_companions(mut self, companions: impl IntoIterator<Item = PathBuf>) -> Self {
        self.companions = companions.into_iter().collect();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Checks the request before anything is attempted, returning the
    /// source's metadata for the preflight.
    pub(crate) fn validate(&self) -> Result<Metadata> {
        for path in std::iter::once(&self.source).chain([&self.destination]).chain(&self.companions) {
            if !path.is_absolute() {
                exn::bail!(ErrorKind::invalid(format!("path must be absolute: {}", path.display())));
            }
        }
        if self.source == self.destination {
            exn::bail!(ErrorKind::invalid("source and destination are the same path"));
        }
        if self.destination.file_name().is_none() || self.destination.parent().is_none() {
            exn::bail!(ErrorKind::invalid(format!("destination has no file name: {}", self.destination.display())));
        }
        let metadata = match fs::metadata(&self.source) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::invalid(format!("source does not exist: {}", self.source.display())))
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::io("inspecting", &self.source)),
        };
        if !metadata.is_file() {
            exn::bail!(ErrorKind::invalid(format!("source is not a regular file: {}", self.source.display())));
        }
        if !self.overwrite && occupied(&self.destination) {
            exn::bail!(ErrorKind::DestinationExists(self.destination.clone()));
        }
        Ok(metadata)
    }
}

/// Whether anything (including a dangling symlink) sits at `path`.
pub(crate) fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        fs::write(&source, b"content").unwrap();
        let request = TransferRequest::new(&source, dir.path().join("cache/movie.mkv"), TransferMode::Copy);
        assert_eq!(request.validate().unwrap().len(), 7);
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let request = TransferRequest::new("movie.mkv", "/cache/movie.mkv", TransferMode::Copy);
        let err = request.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let request = TransferRequest::new(dir.path().join("nope.mkv"), dir.path().join("x.mkv"), TransferMode::Move);
        let err = request.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let request = TransferRequest::new(dir.path(), dir.path().join("x.mkv"), TransferMode::Copy);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_reports_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mkv");
        let destination = dir.path().join("b.mkv");
        fs::write(&source, b"a").unwrap();
        fs::write(&destination, b"b").unwrap();
        let request = TransferRequest::new(&source, &destination, TransferMode::Copy);
        let err = request.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::DestinationExists(p) if p == &destination));
        assert!(request.with_overwrite(true).validate().is_ok());
    }
}
