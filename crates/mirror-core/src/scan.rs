//! Recursive tree scanning.
//!
//! A scan walks a physical subtree breadth-first, feeding every entry
//! through the create decision engine and staging logical children with no
//! physical counterpart through the delete engine. Objects provisionally
//! suspected gone are pinned with a deletion-buffer holder until the walk
//! finishes, so a slow scan can never let a sweep delete something the
//! unvisited remainder of the tree still accounts for.

use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;

use tracing::trace;

use mirror_fs::{IgnoreFilter, LogicalPath, PathPair};
use mirror_store::{ObjectStore, ObjectType};

use crate::Result;
use crate::buffer::{DeletionBuffer, Holder};
use crate::engine::{CreateEngine, Decision, DeleteEngine};
use crate::roots::Root;

/// Summary of one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Directories walked
    pub scanned_dirs: usize,
    /// Files reconciled
    pub files: usize,
    /// Directories freshly created or FID-replaced
    pub new_folders: usize,
    /// Logical children staged in the deletion buffer
    pub buffered_deletes: usize,
    /// Entries skipped by the ignore filter or as expected races
    pub ignored: usize,
}

impl ScanReport {
    /// Combine two passes, summing their counters.
    pub fn merge(mut self, other: ScanReport) -> Self {
        self.scanned_dirs += other.scanned_dirs;
        self.files += other.files;
        self.new_folders += other.new_folders;
        self.buffered_deletes += other.buffered_deletes;
        self.ignored += other.ignored;
        self
    }
}

/// Walks physical subtrees and reconciles them entry by entry.
pub(crate) struct Scanner {
    store: Arc<dyn ObjectStore>,
    create: Arc<CreateEngine>,
    delete: Arc<DeleteEngine>,
    buffer: DeletionBuffer,
    filter: IgnoreFilter,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        create: Arc<CreateEngine>,
        delete: Arc<DeleteEngine>,
        buffer: DeletionBuffer,
        filter: IgnoreFilter,
    ) -> Self {
        Self {
            store,
            create,
            delete,
            buffer,
            filter,
        }
    }

    /// Scan the subtree rooted at `start`.
    ///
    /// On success the holder releases its pins and survivors become
    /// eligible for their deadlines; on failure the held entries are
    /// dropped outright; the retry rescan re-derives truth from disk.
    pub fn scan(&self, root: &Root, start: &LogicalPath) -> Result<ScanReport> {
        let mut holder = self.buffer.holder();
        let mut report = ScanReport::default();

        match self.walk(root, start, &mut holder, &mut report) {
            Ok(()) => {
                holder.release_all();
                Ok(report)
            }
            Err(e) => {
                holder.remove_all();
                Err(e)
            }
        }
    }

    fn walk(
        &self,
        root: &Root,
        start: &LogicalPath,
        holder: &mut Holder,
        report: &mut ScanReport,
    ) -> Result<()> {
        let mut pending = VecDeque::from([start.clone()]);

        while let Some(dir_logical) = pending.pop_front() {
            let dir_physical = root.physical(&dir_logical);
            let entries = match fs::read_dir(&dir_physical) {
                Ok(entries) => entries,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                    ) =>
                {
                    // The directory vanished mid-scan; its own deletion
                    // notification handles the rest.
                    trace!(path = %dir_physical.display(), "directory gone mid-scan");
                    continue;
                }
                Err(e) => return Err(mirror_fs::Error::io(&dir_physical, e).into()),
            };
            report.scanned_dirs += 1;

            let mut seen = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| mirror_fs::Error::io(&dir_physical, e))?;
                let name = entry.file_name();
                if self.filter.is_ignored(&name) {
                    report.ignored += 1;
                    continue;
                }
                let name = name.to_str().expect("the filter rejects non-UTF-8 names");
                seen.push(name.to_string());

                let pair = PathPair::from_logical(root.anchor(), dir_logical.join(name));
                let mut tx = self.store.begin();
                let decision = self.create.handle(&mut tx, root, &pair)?;
                tx.commit()?;

                match decision {
                    Decision::NewOrReplacedFolder => {
                        report.new_folders += 1;
                        if self.should_descend(root, &pair) {
                            pending.push_back(pair.logical().clone());
                        }
                    }
                    Decision::ExistingFolder => {
                        if self.should_descend(root, &pair) {
                            pending.push_back(pair.logical().clone());
                        }
                    }
                    Decision::File => report.files += 1,
                    Decision::Ignored => report.ignored += 1,
                }
            }

            // Logical children with no physical counterpart might be gone.
            if let Some(dir_soid) = self.store.resolve(root.store(), &dir_logical) {
                let caps = root.capabilities();
                for (child_name, _) in self.store.children(dir_soid)? {
                    if seen.iter().any(|s| caps.names_equivalent(s, &child_name)) {
                        continue;
                    }
                    let child_pair =
                        PathPair::from_logical(root.anchor(), dir_logical.join(&child_name));
                    if let Some(staged) = self.delete.handle(root, &child_pair) {
                        holder.hold(staged);
                        report.buffered_deletes += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Anchors mount another store; their subtree is that root's business.
    fn should_descend(&self, root: &Root, pair: &PathPair) -> bool {
        match self.store.resolve(root.store(), pair.logical()) {
            Some(soid) => !matches!(
                self.store.attributes(soid).map(|attr| attr.otype),
                Ok(ObjectType::Anchor(_))
            ),
            None => false,
        }
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner").finish_non_exhaustive()
    }
}
