//! Root registry: synchronized roots and their lifecycle.
//!
//! A root binds a store to an absolute anchor path, carries the filesystem
//! capability bits probed at link time, and owns a removal flag that only
//! becomes effective when the surrounding transaction commits.

pub mod table;

pub use table::{RootEntry, RootTable};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use mirror_fs::{FsCapabilities, LogicalPath, canonicalize_anchor, probe};
use mirror_store::{StoreId, Transaction, TxOutcome};

use crate::{Error, Result};

/// One synchronized root.
#[derive(Debug)]
pub struct Root {
    store: StoreId,
    anchor: PathBuf,
    capabilities: FsCapabilities,
    removed: AtomicBool,
}

impl Root {
    pub fn store(&self) -> StoreId {
        self.store
    }

    /// Absolute, canonicalized anchor path.
    pub fn anchor(&self) -> &Path {
        &self.anchor
    }

    pub fn capabilities(&self) -> FsCapabilities {
        self.capabilities
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    /// Physical path of a logical path under this root.
    pub fn physical(&self, logical: &LogicalPath) -> PathBuf {
        logical.to_physical(&self.anchor)
    }
}

/// Registry of all linked roots, owned by the orchestrator.
///
/// Explicit object with ordinary method calls; lifecycle is tied to the
/// orchestrator, not to process-wide statics.
#[derive(Clone, Default)]
pub struct RootRegistry {
    inner: Arc<Mutex<HashMap<StoreId, Arc<Root>>>>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active root for a store, if linked and not marked removed.
    pub fn get(&self, store: StoreId) -> Option<Arc<Root>> {
        self.inner
            .lock()
            .get(&store)
            .filter(|root| !root.is_removed())
            .cloned()
    }

    /// The deepest active root whose anchor contains `path`.
    ///
    /// Shared-folder anchors nest inside their parent root's tree, so the
    /// deepest match is the owning root.
    pub fn by_path(&self, path: &Path) -> Option<Arc<Root>> {
        self.inner
            .lock()
            .values()
            .filter(|root| !root.is_removed() && path.starts_with(&root.anchor))
            .max_by_key(|root| root.anchor.components().count())
            .cloned()
    }

    /// All active roots, in stable store order.
    pub fn list(&self) -> Vec<Arc<Root>> {
        let mut roots: Vec<_> = self
            .inner
            .lock()
            .values()
            .filter(|root| !root.is_removed())
            .cloned()
            .collect();
        roots.sort_by_key(|root| root.store());
        roots
    }

    /// Link a store to an anchor path, probing filesystem capabilities.
    ///
    /// The registration is undone if the transaction rolls back.
    pub fn link(
        &self,
        tx: &mut Transaction,
        store: StoreId,
        anchor: &Path,
    ) -> Result<Arc<Root>> {
        let anchor = canonicalize_anchor(anchor)?;

        {
            let registry = self.inner.lock();
            if let Some(existing) = registry.get(&store)
                && !existing.is_removed()
            {
                return Err(Error::RootExists {
                    path: existing.anchor.clone(),
                });
            }
            if registry
                .values()
                .any(|root| !root.is_removed() && root.anchor == anchor)
            {
                return Err(Error::RootExists { path: anchor });
            }
        }

        let capabilities = probe(&anchor)?;
        let root = Arc::new(Root {
            store,
            anchor,
            capabilities,
            removed: AtomicBool::new(false),
        });

        self.inner.lock().insert(store, root.clone());
        info!(%store, anchor = %root.anchor.display(), "linked root");

        let inner = self.inner.clone();
        tx.push_undo(move || {
            inner.lock().remove(&store);
        });
        Ok(root)
    }

    /// Mark a root removed; the entry disappears when the transaction
    /// commits and the flag reverts if it rolls back.
    pub fn unlink(&self, tx: &mut Transaction, store: StoreId) -> Result<()> {
        let root = self
            .get(store)
            .ok_or(Error::RootNotFound { store })?;

        root.removed.store(true, Ordering::SeqCst);
        debug!(%store, "root marked removed");

        let undo_root = root.clone();
        tx.push_undo(move || {
            undo_root.removed.store(false, Ordering::SeqCst);
        });

        let inner = self.inner.clone();
        tx.on_outcome(move |outcome| {
            if outcome == TxOutcome::Committed {
                inner.lock().remove(&store);
                info!(%store, "unlinked root");
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for RootRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootRegistry")
            .field("roots", &self.inner.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_in_tx(registry: &RootRegistry, store: StoreId, path: &Path) -> Arc<Root> {
        let mut tx = Transaction::new();
        let root = registry.link(&mut tx, store, path).unwrap();
        tx.commit().unwrap();
        root
    }

    #[test]
    fn link_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RootRegistry::new();
        let store = StoreId::generate();

        let root = link_in_tx(&registry, store, dir.path());
        assert_eq!(registry.get(store).unwrap().anchor(), root.anchor());
    }

    #[test]
    fn link_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RootRegistry::new();
        let store = StoreId::generate();

        let mut tx = Transaction::new();
        registry.link(&mut tx, store, dir.path()).unwrap();
        tx.rollback();

        assert!(registry.get(store).is_none());
    }

    #[test]
    fn duplicate_anchor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RootRegistry::new();
        link_in_tx(&registry, StoreId::generate(), dir.path());

        let mut tx = Transaction::new();
        let err = registry
            .link(&mut tx, StoreId::generate(), dir.path())
            .unwrap_err();
        assert!(matches!(err, Error::RootExists { .. }));
    }

    #[test]
    fn unlink_takes_effect_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RootRegistry::new();
        let store = StoreId::generate();
        link_in_tx(&registry, store, dir.path());

        let mut tx = Transaction::new();
        registry.unlink(&mut tx, store).unwrap();
        // Marked removed: invisible already, but revivable on rollback
        assert!(registry.get(store).is_none());
        tx.commit().unwrap();

        assert!(registry.get(store).is_none());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn unlink_rolls_back_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RootRegistry::new();
        let store = StoreId::generate();
        link_in_tx(&registry, store, dir.path());

        let mut tx = Transaction::new();
        registry.unlink(&mut tx, store).unwrap();
        tx.rollback();

        assert!(registry.get(store).is_some());
    }

    #[test]
    fn by_path_picks_the_deepest_root() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let nested = base.join("outer/inner");
        std::fs::create_dir_all(&nested).unwrap();

        let registry = RootRegistry::new();
        let outer = StoreId::generate();
        let inner = StoreId::generate();
        link_in_tx(&registry, outer, &base);
        link_in_tx(&registry, inner, &nested);

        let root = registry
            .by_path(&nested.join("deep/file.txt"))
            .unwrap();
        assert_eq!(root.store(), inner);

        let root = registry.by_path(&base.join("other.txt")).unwrap();
        assert_eq!(root.store(), outer);
    }
}
