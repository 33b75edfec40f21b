//! Path and file-creation helpers shared by `StorageEngine::open`/`create`.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Default extension used when a caller passes a bare name with no extension.
pub const DEFAULT_EXTENSION: &str = "blite";

/// Normalizes a user-supplied name or path into a `PathBuf`, defaulting to
/// `blite.blite` in the current directory and appending `DEFAULT_EXTENSION`
/// when the given path has none.
#[must_use]
pub fn normalize_db_path(name_or_path: Option<&str>) -> PathBuf {
    let raw = name_or_path.filter(|s| !s.is_empty()).unwrap_or("blite");
    let path = PathBuf::from(raw);
    if path.extension().is_none() { path.with_extension(DEFAULT_EXTENSION) } else { path }
}

/// Creates a new file at `path`, failing if it already exists. On Unix,
/// restricts permissions to the owner (0600) at creation time.
///
/// # Errors
/// Returns an error if the file cannot be created (including because it
/// already exists).
pub fn create_new(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().read(true).write(true).create_new(true).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().read(true).write(true).create_new(true).open(path)
    }
}

/// Opens an existing file at `path` read-write, or read-only when `read_only`.
///
/// # Errors
/// Returns an error if the file does not exist or cannot be opened.
pub fn open_existing(path: &Path, read_only: bool) -> io::Result<File> {
    OpenOptions::new().read(true).write(!read_only).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_default_extension() {
        assert_eq!(normalize_db_path(Some("mydb")), PathBuf::from("mydb.blite"));
    }

    #[test]
    fn normalize_preserves_existing_extension() {
        assert_eq!(normalize_db_path(Some("mydb.db")), PathBuf::from("mydb.db"));
    }

    #[test]
    fn normalize_defaults_when_empty() {
        assert_eq!(normalize_db_path(None), PathBuf::from("blite.blite"));
        assert_eq!(normalize_db_path(Some("")), PathBuf::from("blite.blite"));
    }
}
