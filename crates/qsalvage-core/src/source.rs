//! Segment file enumeration.
//!
//! Broker message stores name segment files by sequence number
//! (`0.qs`, `1.qs`, ...), and replay order should follow that sequence
//! so recovered messages keep their best-effort chronological order.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default segment file extension
pub const DEFAULT_EXTENSION: &str = "qs";

/// Lists segment files in `dir`, ordered for replay.
///
/// Non-recursive; only regular files with the given extension are
/// returned. Files are ordered by the numeric value of their stem
/// (segment sequence number), with a lexicographic fallback for
/// non-numeric names. A missing or unreadable directory is a
/// configuration error surfaced before any scanning starts.
pub fn list_segment_files(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::not_a_directory(dir));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| Error::directory_read(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::directory_read(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        files.push(path);
    }

    files.sort_by(|a, b| match (sequence_number(a), sequence_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    });

    debug!("found {} segment files in {}", files.len(), dir.display());
    Ok(files)
}

/// Parses the segment sequence number from a file stem
fn sequence_number(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_numeric_ordering() {
        let dir = TempDir::new().unwrap();
        for name in ["10.qs", "2.qs", "1.qs", "100.qs"] {
            touch(dir.path(), name);
        }

        let files = list_segment_files(dir.path(), DEFAULT_EXTENSION).unwrap();
        assert_eq!(names(&files), vec!["1.qs", "2.qs", "10.qs", "100.qs"]);
    }

    #[test]
    fn test_extension_filter() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "0.qs");
        touch(dir.path(), "0.idx");
        touch(dir.path(), "notes.txt");

        let files = list_segment_files(dir.path(), DEFAULT_EXTENSION).unwrap();
        assert_eq!(names(&files), vec!["0.qs"]);
    }

    #[test]
    fn test_non_numeric_names_sort_last() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "5.qs");
        touch(dir.path(), "backup.qs");
        touch(dir.path(), "1.qs");

        let files = list_segment_files(dir.path(), DEFAULT_EXTENSION).unwrap();
        assert_eq!(names(&files), vec!["1.qs", "5.qs", "backup.qs"]);
    }

    #[test]
    fn test_missing_directory_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            list_segment_files(&missing, DEFAULT_EXTENSION),
            Err(Error::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let files = list_segment_files(dir.path(), DEFAULT_EXTENSION).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_subdirectories_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested.qs")).unwrap();
        touch(dir.path(), "0.qs");

        let files = list_segment_files(dir.path(), DEFAULT_EXTENSION).unwrap();
        assert_eq!(names(&files), vec!["0.qs"]);
    }
}
