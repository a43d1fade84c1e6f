//! The [`ObjectStore`] trait and its transaction type.
//!
//! The reconciliation engine mutates logical state only through this
//! interface, and only inside an open [`Transaction`]. Transactions are
//! never interleaved: the engine's cooperative scheduler runs one logical
//! mutation at a time, so an open transaction sees and owns the whole store.

use mirror_fs::{Fid, LogicalPath};

use crate::Result;
use crate::object::{Branch, ContentAttr, ObjectAttr, ObjectType, Soid, StoreId};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Aborted,
}

/// An open transaction against an [`ObjectStore`].
///
/// Mutations apply immediately and record their inverse; rollback replays
/// the inverses in reverse order. Outcome hooks fire exactly once when the
/// transaction commits or rolls back; the hash queue uses them to abort
/// requests whose owning transaction died. A transaction dropped without an
/// explicit commit rolls back.
#[derive(Default)]
pub struct Transaction {
    undo: Vec<Box<dyn FnOnce() + Send>>,
    hooks: Vec<Box<dyn FnOnce(TxOutcome) + Send>>,
    finished: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inverse of a mutation just applied.
    pub fn push_undo(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.undo.push(Box::new(undo));
    }

    /// Register a hook to run when the transaction commits or rolls back.
    pub fn on_outcome(&mut self, hook: impl FnOnce(TxOutcome) + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Commit: discard the undo log and fire hooks.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.undo.clear();
        for hook in self.hooks.drain(..) {
            hook(TxOutcome::Committed);
        }
        Ok(())
    }

    /// Roll back: replay the undo log in reverse and fire hooks.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        self.finished = true;
        for undo in self.undo.drain(..).rev() {
            undo();
        }
        for hook in self.hooks.drain(..) {
            hook(TxOutcome::Aborted);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("undo_depth", &self.undo.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// The logical object store the engine reconciles against.
///
/// Read methods are valid at any time; mutations require an open
/// transaction and are undone if it rolls back.
pub trait ObjectStore: Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> Transaction;

    fn has_store(&self, store: StoreId) -> bool;

    fn list_stores(&self) -> Vec<StoreId>;

    /// Resolve a store-relative path to an object, strictly within `store`.
    fn resolve(&self, store: StoreId, path: &LogicalPath) -> Option<Soid>;

    fn attributes(&self, soid: Soid) -> Result<ObjectAttr>;

    fn child(&self, parent: Soid, name: &str) -> Option<Soid>;

    /// All children of a container, sorted by name.
    fn children(&self, parent: Soid) -> Result<Vec<(String, Soid)>>;

    /// The object currently bound to `fid` in `store`, if any.
    fn object_by_fid(&self, store: StoreId, fid: Fid) -> Option<Soid>;

    /// The store-relative path of an object.
    fn path_of(&self, soid: Soid) -> Result<LogicalPath>;

    fn content(&self, soid: Soid, branch: Branch) -> Option<ContentAttr>;

    /// Version counter for one branch; 0 when the branch does not exist.
    fn version(&self, soid: Soid, branch: Branch) -> u64;

    /// Create a store with an empty root object.
    fn create_store(&self, tx: &mut Transaction, store: StoreId) -> Result<()>;

    /// Remove a store and all its objects.
    fn remove_store(&self, tx: &mut Transaction, store: StoreId) -> Result<()>;

    fn create_object(
        &self,
        tx: &mut Transaction,
        parent: Soid,
        name: &str,
        otype: ObjectType,
        fid: Option<Fid>,
    ) -> Result<Soid>;

    fn move_object(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        new_parent: Soid,
        new_name: &str,
    ) -> Result<()>;

    fn set_fid(&self, tx: &mut Transaction, soid: Soid, fid: Option<Fid>) -> Result<()>;

    /// Write one branch's content attributes, bumping its version if asked.
    fn set_content(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        branch: Branch,
        attr: ContentAttr,
        bump: bool,
    ) -> Result<()>;

    fn set_expelled(&self, tx: &mut Transaction, soid: Soid, expelled: bool) -> Result<()>;

    fn set_non_representable(&self, tx: &mut Transaction, soid: Soid, flag: bool) -> Result<()>;

    /// Remove an object and, for containers, its whole subtree.
    fn remove_object(&self, tx: &mut Transaction, soid: Soid) -> Result<()>;
}
