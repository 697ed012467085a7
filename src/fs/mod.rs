//! Abstractions for configuration-source access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the loader and the collector read configuration
//! documents, list configuration directories and check modification times
//! either from the real filesystem or from an in-memory `MockFs`.

mod mock;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use mock::MockFs;

/// Abstraction for the filesystem operations the engine needs.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns `true` if `path` is an existing directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Returns `true` if `path` is an existing regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    ///
    /// # Returns
    /// Paths of all direct children, in no particular order, or an I/O error.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Returns the last modification time of a file or directory.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// Returns the modification time that decides staleness for `path`.
///
/// For a file this is its own mtime. For a directory it is the newest mtime
/// among the directory itself and its regular files, so editing a file in
/// place counts as a change just like adding or removing one.
pub fn source_modified<F: FileSystem + ?Sized>(fs: &F, path: &Path) -> io::Result<SystemTime> {
    let mut newest = fs.modified(path)?;
    if fs.is_dir(path) {
        for entry in fs.read_dir(path)? {
            if !fs.is_file(&entry) {
                continue;
            }
            // A file removed between listing and stat is picked up by the dir mtime.
            if let Ok(t) = fs.modified(&entry)
                && t > newest
            {
                newest = t;
            }
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read_to_string() {
        let fs = RealFs::new();
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read_to_string(&cargo_toml).unwrap();
        assert!(content.contains("[package]"));
        assert!(fs.is_file(&cargo_toml));
        assert!(!fs.is_dir(&cargo_toml));
    }

    #[test]
    fn test_real_fs_read_dir() {
        let fs = RealFs::new();
        let src_dir = env::current_dir().unwrap().join("src");
        assert!(fs.is_dir(&src_dir));
        let entries = fs.read_dir(&src_dir).unwrap();
        assert!(entries.iter().any(|p| p.ends_with("lib.rs")));
    }

    #[test]
    fn test_real_fs_modified_missing() {
        let fs = RealFs::new();
        assert!(fs.modified(Path::new("/nonexistent/path/12345")).is_err());
    }

    #[test]
    fn test_source_modified_tracks_newest_file() {
        let fs = MockFs::new();
        fs.add_dir("/etc/sql");
        fs.add_file("/etc/sql/a.yml", "a");
        fs.add_file("/etc/sql/b.yml", "b");
        let before = source_modified(&fs, Path::new("/etc/sql")).unwrap();

        fs.touch("/etc/sql/a.yml");
        let after = source_modified(&fs, Path::new("/etc/sql")).unwrap();
        assert!(after > before);
        assert_eq!(after, fs.modified(Path::new("/etc/sql/a.yml")).unwrap());
    }
}
