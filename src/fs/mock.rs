//! In-memory mock filesystem for testing the loader and reload logic.
//!
//! Modification times come from a logical clock: every write or `touch`
//! advances it by one second, so staleness checks are deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::FileSystem;

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, (String, SystemTime)>,
    directories: BTreeMap<PathBuf, SystemTime>,
    /// Paths whose reads fail with `PermissionDenied`.
    unreadable: BTreeSet<PathBuf>,
    clock: u64,
}

impl MockState {
    fn tick(&mut self) -> SystemTime {
        self.clock += 1;
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + self.clock)
    }

    fn ensure_parents(&mut self, path: &Path, now: SystemTime) {
        let mut parent = path.parent();
        let mut direct = true;
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                let entry = self.directories.entry(p.to_path_buf()).or_insert(now);
                // Creating or removing a child updates the parent's mtime only.
                if direct {
                    *entry = now;
                }
            }
            direct = false;
            parent = p.parent();
        }
    }
}

/// In-memory filesystem for testing.
///
/// Clones share state, so a test can keep a handle and modify files after
/// handing a clone to a `Collector`.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    state: Arc<Mutex<MockState>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not poison every later access.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds or replaces a file. Parent directories are created automatically.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref();
        let mut state = self.state();
        let now = state.tick();
        let is_new = !state.files.contains_key(path);
        state.files.insert(path.to_path_buf(), (content.into(), now));
        if is_new {
            state.ensure_parents(path, now);
        }
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state();
        let now = state.tick();
        state.directories.insert(path.to_path_buf(), now);
        state.ensure_parents(path, now);
    }

    /// Removes a file, updating its parent directory's mtime.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state();
        if state.files.remove(path).is_some() {
            let now = state.tick();
            state.ensure_parents(path, now);
        }
    }

    /// Advances the modification time of a file or directory.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state();
        let now = state.tick();
        if let Some(file) = state.files.get_mut(path) {
            file.1 = now;
        } else if let Some(dir) = state.directories.get_mut(path) {
            *dir = now;
        }
    }

    /// Makes reads of `path` fail while it is still listed and stat-able.
    pub fn make_unreadable(&self, path: impl AsRef<Path>) {
        self.state().unreadable.insert(path.as_ref().to_path_buf());
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let state = self.state();
        if state.unreadable.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{}: permission denied", path.display()),
            ));
        }
        state
            .files
            .get(path)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| not_found(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state().directories.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.state();
        if !state.directories.contains_key(path) {
            return Err(not_found(path));
        }
        let children = state
            .files
            .keys()
            .chain(state.directories.keys())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        Ok(children)
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        let state = self.state();
        state
            .files
            .get(path)
            .map(|(_, t)| *t)
            .or_else(|| state.directories.get(path).copied())
            .ok_or_else(|| not_found(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_files_and_dirs() {
        let fs = MockFs::new();
        fs.add_file("/cfg/jobs/a.yml", "jobs: []");
        fs.add_dir("/cfg/jobs/nested");

        assert!(fs.is_dir(Path::new("/cfg/jobs")));
        assert!(fs.is_file(Path::new("/cfg/jobs/a.yml")));
        assert_eq!(
            fs.read_to_string(Path::new("/cfg/jobs/a.yml")).unwrap(),
            "jobs: []"
        );

        let mut entries = fs.read_dir(Path::new("/cfg/jobs")).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/cfg/jobs/a.yml"),
                PathBuf::from("/cfg/jobs/nested")
            ]
        );
    }

    #[test]
    fn test_mock_fs_clones_share_state() {
        let fs = MockFs::new();
        let handle = fs.clone();
        handle.add_file("/cfg.yml", "x");
        assert!(fs.is_file(Path::new("/cfg.yml")));

        let before = fs.modified(Path::new("/cfg.yml")).unwrap();
        handle.touch("/cfg.yml");
        assert!(fs.modified(Path::new("/cfg.yml")).unwrap() > before);
    }

    #[test]
    fn test_mock_fs_unreadable_and_missing() {
        let fs = MockFs::new();
        fs.add_file("/cfg.yml", "x");
        fs.make_unreadable("/cfg.yml");
        let err = fs.read_to_string(Path::new("/cfg.yml")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        fs.remove_file("/cfg.yml");
        assert!(fs.modified(Path::new("/cfg.yml")).is_err());
    }
}
