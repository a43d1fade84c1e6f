//! [`TestTree`] builder for physical-tree test scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// A temporary directory tree with helper methods for test setup and
/// assertion.
///
/// # Example
///
/// ```rust,no_run
/// use mirror_test_utils::TestTree;
///
/// let tree = TestTree::new();
/// tree.write_file("docs/readme.md", "hello");
/// tree.assert_exists("docs/readme.md");
/// ```
pub struct TestTree {
    _temp_dir: TempDir,
    /// Canonicalized so paths match the engine's canonicalized anchors
    /// even when the system temp directory is a symlink.
    root: PathBuf,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    /// Create an empty temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    /// Return the root path of the temporary directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a relative entry.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Write a file, creating parent directories as needed.
    pub fn write_file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Create a directory (and parents).
    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Hardlink an existing entry to a second name.
    pub fn hardlink(&self, existing: &str, link: &str) -> PathBuf {
        let link_path = self.path(link);
        fs::hard_link(self.path(existing), &link_path).unwrap();
        link_path
    }

    /// Rename an entry.
    pub fn rename(&self, from: &str, to: &str) -> PathBuf {
        let to_path = self.path(to);
        fs::rename(self.path(from), &to_path).unwrap();
        to_path
    }

    /// Remove a file or directory tree.
    pub fn remove(&self, rel: &str) {
        let path = self.path(rel);
        if path.is_dir() {
            fs::remove_dir_all(&path).unwrap();
        } else {
            fs::remove_file(&path).unwrap();
        }
    }

    /// Bump an entry's modification time without touching its content.
    ///
    /// Jumps well past filesystem timestamp granularity so the change is
    /// always observable.
    pub fn touch(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        path
    }

    pub fn assert_exists(&self, rel: &str) {
        assert!(
            self.path(rel).exists(),
            "expected {rel} to exist under {}",
            self.root().display()
        );
    }

    pub fn assert_missing(&self, rel: &str) {
        assert!(
            !self.path(rel).exists(),
            "expected {rel} to be missing under {}",
            self.root().display()
        );
    }
}
