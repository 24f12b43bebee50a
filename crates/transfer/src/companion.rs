//! Companion (subtitle) file discovery.
//!
//! A companion shares the media file's stem and carries one of the
//! configured extensions, optionally with tags in between:
//! `Movie (2020).mkv` → `Movie (2020).srt`, `Movie (2020).en.forced.srt`.

use std::io;
use std::path::{Path, PathBuf};

/// Finds companions of `media` in its directory, sorted by name.
pub async fn discover(media: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let (Some(dir), Some(stem)) = (media.parent(), media.file_stem().and_then(|s| s.to_str())) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{stem}.");
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&prefix) || !has_extension(name, extensions) {
            continue;
        }
        if entry.file_type().await.is_ok_and(|t| t.is_file()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };
    extensions.iter().any(|e| e.eq_ignore_ascii_case(extension))
}

/// Where `companion` of `media` goes when `media` goes to `destination`:
/// the same suffix after the destination's stem.
///
/// Returns `None` if `companion` does not belong to `media`.
pub fn destination_for(media: &Path, companion: &Path, destination: &Path) -> Option<PathBuf> {
    let media_stem = media.file_stem()?.to_str()?;
    let name = companion.file_name()?.to_str()?;
    let suffix = name.strip_prefix(media_stem)?;
    if !suffix.starts_with('.') {
        return None;
    }
    let destination_stem = destination.file_stem()?.to_str()?;
    Some(destination.parent()?.join(format!("{destination_stem}{suffix}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn subtitles() -> Vec<String> {
        ["srt", "ass", "vtt"].into_iter().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_discover() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["Movie.mkv", "Movie.srt", "Movie.en.forced.SRT", "Movie.nfo", "Movie 2.srt", "Other.srt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("Movie.ass")).unwrap();
        let found = discover(&dir.path().join("Movie.mkv"), &subtitles()).await.unwrap();
        assert_eq!(found, vec![dir.path().join("Movie.en.forced.SRT"), dir.path().join("Movie.srt")]);
    }

    #[rstest]
    #[case("/array/Movie.mkv", "/array/Movie.en.srt", "/cache/Movie.mkv", Some("/cache/Movie.en.srt"))]
    #[case("/array/Movie.mkv", "/array/Movie.srt", "/cache/Renamed.mkv", Some("/cache/Renamed.srt"))]
    #[case("/array/Movie.mkv", "/array/Movie2.srt", "/cache/Movie.mkv", None)]
    #[case("/array/Movie.mkv", "/array/Other.srt", "/cache/Movie.mkv", None)]
    fn test_destination_for(
        #[case] media: &str,
        #[case] companion: &str,
        #[case] destination: &str,
        #[case] expected: Option<&str>,
    ) {
        let actual = destination_for(Path::new(media), Path::new(companion), Path::new(destination));
        assert_eq!(actual, expected.map(PathBuf::from));
    }
}
