//! Persistent root table.
//!
//! The table records which stores are linked at which absolute paths so the
//! engine can re-mount them after a restart. Persistence is TOML with
//! advisory locking and atomic replace; a crash between the in-memory
//! update and the save leaves a stale table, which the startup rescan
//! reconciles against reality.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mirror_store::StoreId;

use crate::Result;

/// One linked root as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootEntry {
    /// Store identifier
    pub store: Uuid,
    /// Absolute anchor path
    pub path: PathBuf,
    /// When this root was linked
    pub linked_at: DateTime<Utc>,
}

/// The persisted table of linked roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootTable {
    /// Table format version for forward compatibility
    version: String,
    /// All linked roots
    #[serde(default)]
    roots: Vec<RootEntry>,
}

impl Default for RootTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RootTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self {
            version: "1.0".to_string(),
            roots: Vec::new(),
        }
    }

    /// Load the table from a TOML file with shared lock
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, locked, or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        file.lock_shared()?;

        // Read through the locked file handle to avoid TOCTOU race
        let mut content = String::new();
        use std::io::Read;
        (&file).read_to_string(&mut content)?;
        let table: RootTable = toml::from_str(&content)?;

        // Lock released when file is dropped
        Ok(table)
    }

    /// Load the table, or start empty if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save the table to a TOML file atomically with exclusive lock
    ///
    /// Uses write-to-temp-then-rename with file locking to prevent
    /// corruption and race conditions.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        // Create or open the target file for locking
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // Acquire exclusive lock (blocks if another process holds lock)
        lock_file.lock_exclusive()?;

        // Write to temporary file first
        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content)?;

        // Atomically rename to target
        fs::rename(&temp_path, path)?;

        // Lock released when lock_file is dropped
        Ok(())
    }

    /// All entries in the table
    pub fn entries(&self) -> &[RootEntry] {
        &self.roots
    }

    /// Record a root, replacing any previous entry for the same store.
    pub fn add(&mut self, store: StoreId, path: PathBuf) {
        self.roots.retain(|entry| entry.store != store.0);
        self.roots.push(RootEntry {
            store: store.0,
            path,
            linked_at: Utc::now(),
        });
    }

    /// Remove a root by store id.
    ///
    /// Returns the removed entry if found, None otherwise.
    pub fn remove(&mut self, store: StoreId) -> Option<RootEntry> {
        let pos = self.roots.iter().position(|e| e.store == store.0)?;
        Some(self.roots.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_new_has_correct_version() {
        let table = RootTable::new();
        assert_eq!(table.version, "1.0");
    }

    #[test]
    fn table_save_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roots.toml");

        let mut table = RootTable::new();
        table.add(StoreId::generate(), PathBuf::from("/data/docs"));
        table.save(&path).unwrap();

        // Verify no temp file left behind
        let temp_path = path.with_extension("toml.tmp");
        assert!(!temp_path.exists(), "Temporary file should be cleaned up");

        let loaded = RootTable::load(&path).unwrap();
        assert_eq!(loaded.entries().len(), 1);
        assert_eq!(loaded.entries()[0].path, PathBuf::from("/data/docs"));
    }

    #[test]
    fn add_replaces_entry_for_same_store() {
        let mut table = RootTable::new();
        let store = StoreId::generate();

        table.add(store, PathBuf::from("/old"));
        table.add(store, PathBuf::from("/new"));

        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.entries()[0].path, PathBuf::from("/new"));
    }

    #[test]
    fn remove_returns_the_entry() {
        let mut table = RootTable::new();
        let store = StoreId::generate();
        table.add(store, PathBuf::from("/data"));

        let removed = table.remove(store).unwrap();
        assert_eq!(removed.path, PathBuf::from("/data"));
        assert!(table.entries().is_empty());
        assert!(table.remove(store).is_none());
    }

    #[test]
    fn load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = RootTable::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert!(table.entries().is_empty());
    }
}
