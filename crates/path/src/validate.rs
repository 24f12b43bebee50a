//! Path validation and security utilities.
//!
//! Catalog-reported paths come from an external service and are treated as
//! untrusted input. Anything that looks like an escape attempt is rejected
//! outright; it is never "sanitized and continued".

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Default upper bound for a path, in bytes (Linux `PATH_MAX`).
pub const DEFAULT_MAX_LENGTH: usize = 4096;

/// Validates and normalizes a reported path.
///
/// - Backslashes become forward slashes, duplicate slashes collapse, `.`
///   segments and trailing slashes are dropped.
/// - Any `..` segment is a [`Traversal`](ErrorKind::Traversal), even when it
///   would stay inside the root after resolution (unlike
///   [`Path::components`], which keeps them around for us to reject).
/// - Null bytes and other control characters are rejected.
/// - The terminal filename must not be hidden or a reserved device name.
///
/// Absolute inputs stay absolute, relative inputs stay relative.
///
/// ```
/// use plexcache_path::validate;
/// use std::path::Path;
///
/// assert_eq!(validate("/plex//movies/./x.mkv", 4096).unwrap(), Path::new("/plex/movies/x.mkv"));
/// assert_eq!(validate(r"tv\show\s01e01.mkv", 4096).unwrap(), Path::new("tv/show/s01e01.mkv"));
/// assert!(validate("/plex/../etc/passwd", 4096).is_err());
/// assert!(validate("/plex/movies/.hidden", 4096).is_err());
/// ```
pub fn validate(input: &str, max_length: usize) -> Result<PathBuf> {
    if input.trim().is_empty() {
        exn::bail!(ErrorKind::Empty);
    }
    if input.len() > max_length {
        exn::bail!(ErrorKind::TooLong { length: input.len(), max: max_length });
    }
    if input.chars().any(char::is_control) {
        exn::bail!(ErrorKind::InvalidCharacter(input.to_string()));
    }

    let normalized = input.replace('\\', "/");
    let mut absolute = false;
    let mut segments = Vec::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(segment) => segments.push(segment),
            Component::RootDir => absolute = true,
            Component::CurDir => {},
            Component::ParentDir => exn::bail!(ErrorKind::Traversal(input.to_string())),
            // Drive letters and UNC prefixes never come from a Unix catalog.
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidCharacter(input.to_string())),
        }
    }

    let Some(filename) = segments.last() else {
        exn::bail!(ErrorKind::Empty);
    };
    let filename = filename.to_string_lossy();
    if is_reserved_name(&filename) {
        exn::bail!(ErrorKind::ReservedName(filename.into_owned()));
    }

    let mut path = match absolute {
        true => PathBuf::from("/"),
        false => PathBuf::new(),
    };
    path.extend(segments);
    // Collapsing separators only ever shrinks the input, but joining onto a
    // root later may not; callers re-check with `check_length`.
    check_length(&path, max_length)?;
    Ok(path)
}

/// Validates a configured root directory: absolute and free of `.`/`..`.
pub(crate) fn validate_root(root: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        exn::bail!(ErrorKind::NotAbsolute(root.to_path_buf()));
    }
    let mut normalized = PathBuf::new();
    for component in root.components() {
        match component {
            Component::ParentDir => exn::bail!(ErrorKind::Traversal(root.display().to_string())),
            Component::CurDir => {},
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

pub(crate) fn check_length(path: &Path, max_length: usize) -> Result<()> {
    let length = path.as_os_str().len();
    if length > max_length {
        exn::bail!(ErrorKind::TooLong { length, max: max_length });
    }
    Ok(())
}

/// Hidden files, and the DOS device names that case-insensitive filesystems
/// (SMB shares, mostly) resolve to devices regardless of extension.
fn is_reserved_name(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    let stem = name.split('.').next().unwrap_or(name).trim_end().to_ascii_uppercase();
    match stem.as_str() {
        "CON" | "PRN" | "AUX" | "NUL" => true,
        s if s.len() == 4 && (s.starts_with("COM") || s.starts_with("LPT")) => {
            matches!(s.as_bytes()[3], b'1'..=b'9')
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MAX: usize = DEFAULT_MAX_LENGTH;

    #[rstest]
    #[case("/plex/movies/x.mkv", "/plex/movies/x.mkv")]
    #[case("/plex//movies///x.mkv", "/plex/movies/x.mkv")]
    #[case("/plex/./movies/x.mkv", "/plex/movies/x.mkv")]
    #[case(r"\plex\movies\x.mkv", "/plex/movies/x.mkv")]
    #[case(r"/plex\movies/x.mkv", "/plex/movies/x.mkv")]
    #[case("movies/x.mkv", "movies/x.mkv")]
    #[case("./movies/x.mkv", "movies/x.mkv")]
    #[case("/plex/movies/x.mkv/", "/plex/movies/x.mkv")]
    #[case("/plex/.config/x.mkv", "/plex/.config/x.mkv")]
    #[case("/plex/movies/Console (2001).mkv", "/plex/movies/Console (2001).mkv")]
    #[case("/plex/movies/COM10.mkv", "/plex/movies/COM10.mkv")]
    fn test_valid(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input, MAX).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("..")]
    #[case("../etc/passwd")]
    #[case("/plex/../etc/passwd")]
    #[case("/plex/movies/..")]
    #[case("/plex/movies/a/../b.mkv")]
    #[case(r"\plex\..\secret.mkv")]
    #[case("movies/../../x.mkv")]
    fn test_traversal_is_security_violation(#[case] input: &str) {
        let err = validate(input, MAX).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Traversal(_)), "{input}: {err:?}");
        assert!(err.is_security_violation());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t")]
    #[case("/")]
    #[case("//")]
    #[case("./")]
    fn test_empty(#[case] input: &str) {
        let err = validate(input, MAX).unwrap_err();
        // A lone tab is a control character, which is also a rejection.
        assert!(matches!(&*err, ErrorKind::Empty | ErrorKind::InvalidCharacter(_)), "{input:?}: {err:?}");
    }

    #[rstest]
    #[case("/plex/a\0b.mkv")]
    #[case("/plex/a\nb.mkv")]
    #[case("/plex/\u{1b}[31m.mkv")]
    fn test_control_characters(#[case] input: &str) {
        let err = validate(input, MAX).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidCharacter(_)));
    }

    #[rstest]
    #[case("/plex/movies/.hidden")]
    #[case("/plex/movies/.x.mkv")]
    #[case("/plex/movies/CON")]
    #[case("/plex/movies/con.mkv")]
    #[case("/plex/movies/Nul.srt")]
    #[case("/plex/movies/aux")]
    #[case("/plex/movies/COM1.txt")]
    #[case("/plex/movies/lpt9")]
    fn test_reserved_names(#[case] input: &str) {
        let err = validate(input, MAX).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReservedName(_)), "{input}: {err:?}");
    }

    #[test]
    fn test_length_limit() {
        let long = format!("/plex/{}.mkv", "a".repeat(100));
        assert!(validate(&long, 200).is_ok());
        let err = validate(&long, 50).unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLong { max: 50, .. }));
    }

    #[test]
    fn test_validate_root() {
        assert_eq!(validate_root(Path::new("/mnt/user/./media/")).unwrap(), Path::new("/mnt/user/media"));
        assert!(validate_root(Path::new("relative/root")).is_err());
        assert!(validate_root(Path::new("/mnt/../etc")).is_err());
    }
}
