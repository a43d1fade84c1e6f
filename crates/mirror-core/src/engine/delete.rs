//! Delete decision engine.
//!
//! A "might have been deleted" observation never deletes anything directly;
//! at most it stages the resolved object in the deletion buffer. Objects
//! with no physical standing (expelled, non-representable, or files that
//! never completed their first hash) are left alone entirely.

use std::sync::Arc;

use tracing::trace;

use mirror_fs::{IgnoreFilter, PathPair};
use mirror_store::{Branch, ObjectStore, ObjectType, Soid};

use crate::buffer::DeletionBuffer;
use crate::roots::Root;

/// The delete decision engine.
pub struct DeleteEngine {
    store: Arc<dyn ObjectStore>,
    buffer: DeletionBuffer,
    filter: IgnoreFilter,
}

impl DeleteEngine {
    pub fn new(store: Arc<dyn ObjectStore>, buffer: DeletionBuffer, filter: IgnoreFilter) -> Self {
        Self {
            store,
            buffer,
            filter,
        }
    }

    /// Stage the object at `pair` for deletion if it qualifies.
    ///
    /// Returns the staged SOID, or None when the observation is moot.
    /// Infallible, and in particular cannot fail after the buffer add:
    /// callers needing atomic failure handling rely on every precondition
    /// being checked first.
    pub fn handle(&self, root: &Root, pair: &PathPair) -> Option<Soid> {
        let name = pair.name()?;
        if self.filter.is_ignored_str(name) {
            return None;
        }

        let soid = self.store.resolve(root.store(), pair.logical())?;
        let attr = self.store.attributes(soid).ok()?;

        if attr.expelled || attr.non_representable {
            trace!(%soid, "not materialized, skipping deletion staging");
            return None;
        }
        // A file whose first hash never landed has nothing worth deleting;
        // letting it expire here would race the hash completion.
        if attr.otype == ObjectType::File && self.store.content(soid, Branch::MASTER).is_none() {
            trace!(%soid, "content-incomplete, skipping deletion staging");
            return None;
        }

        self.buffer.add(soid);
        Some(soid)
    }
}

impl std::fmt::Debug for DeleteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteEngine").finish_non_exhaustive()
    }
}
