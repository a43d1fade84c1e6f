//! Operation executor.
//!
//! Applies the operation set decided by the create engine: FID
//! randomization, conflicting-target renames, creates, moves, and FID
//! replacement, all inside the caller's transaction. Content work is handed
//! to the hash queue; anchor marker maintenance is deferred to a scheduled
//! task because immediate writes race OS-level delete/rename sequences.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use mirror_fs::{ControlName, Fid, PathPair};
use mirror_store::{
    Branch, ContentAttr, ObjectAttr, ObjectStore, ObjectType, Soid, StoreId, Transaction,
};

use crate::buffer::DeletionBuffer;
use crate::engine::PhysicalFacts;
use crate::engine::create::{OpPlan, PlanAction, RenameTarget};
use crate::hasher::{HashQueue, HashRequest};
use crate::roots::Root;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Delay before a scheduled anchor-marker fix runs.
const MARKER_FIX_DELAY: Duration = Duration::from_millis(500);

/// Applies decided operations to the logical store.
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn ObjectStore>,
    buffer: DeletionBuffer,
    hasher: Arc<HashQueue>,
    scheduler: Scheduler,
}

impl Executor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        buffer: DeletionBuffer,
        hasher: Arc<HashQueue>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            store,
            buffer,
            hasher,
            scheduler,
        }
    }

    /// Apply `plan` for the observed physical object.
    ///
    /// Returns the logical object that now corresponds to the physical one.
    pub fn apply(
        &self,
        tx: &mut Transaction,
        root: &Root,
        pair: &PathPair,
        physical: &PhysicalFacts,
        source: Option<&(Soid, ObjectAttr)>,
        target: Option<&(Soid, ObjectAttr)>,
        plan: &OpPlan,
    ) -> Result<Soid> {
        if plan.randomize_source_fid
            && let Some((source_soid, _)) = source
        {
            // The FID reuse is coincidence, not identity; divorce the
            // source from it so the new object can claim it.
            self.store.set_fid(tx, *source_soid, Some(Fid::random()))?;
        }

        if let Some(rename) = &plan.rename_target
            && let Some((target_soid, target_attr)) = target
        {
            self.rename_target(tx, root, pair, *target_soid, target_attr, physical.fid, rename)?;
        }

        let soid = match plan.action {
            PlanAction::Create => self.create(tx, root, pair, physical)?,
            PlanAction::Update => {
                let (source_soid, _) = source.expect("update requires a source");
                self.update(tx, root, pair, *source_soid, physical, false)?
            }
            PlanAction::Replace => {
                let (target_soid, target_attr) = target.expect("replace requires a target");
                self.replace(tx, pair, *target_soid, target_attr, source, physical)?
            }
        };

        // The object is demonstrably present again; cancel any staged
        // deletion.
        self.buffer.remove(soid);

        if physical.is_dir
            && let Ok(attr) = self.store.attributes(soid)
            && let ObjectType::Anchor(child) = attr.otype
        {
            self.schedule_marker_fix(pair.physical().to_path_buf(), child);
        }

        Ok(soid)
    }

    /// Move a conflicting logical object to an unused sibling name.
    fn rename_target(
        &self,
        tx: &mut Transaction,
        root: &Root,
        pair: &PathPair,
        target_soid: Soid,
        target_attr: &ObjectAttr,
        claimed_fid: Fid,
        rename: &RenameTarget,
    ) -> Result<()> {
        if target_attr.fid == Some(claimed_fid) {
            // The target collided with the FID being claimed; free it first.
            self.store.set_fid(tx, target_soid, Some(Fid::random()))?;
        }

        let parent_physical = pair
            .physical()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.anchor().to_path_buf());
        let free_name =
            self.free_sibling_name(target_attr.parent, &parent_physical, &target_attr.name);

        debug!(
            %target_soid,
            from = %target_attr.name,
            to = %free_name,
            mode = ?rename.mode,
            "renaming conflicting target"
        );
        self.store
            .move_object(tx, target_soid, target_attr.parent, &free_name)?;

        if rename.non_representable {
            // The fresh name is unique, so the object is representable again.
            self.store.set_non_representable(tx, target_soid, false)?;
        }
        Ok(())
    }

    /// Probe `name (2)`, `name (3)`, ... against both the physical
    /// directory and the logical children until one is free.
    fn free_sibling_name(&self, parent: Soid, parent_physical: &Path, name: &str) -> String {
        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx + 1..])),
            _ => (name, None),
        };

        for i in 2.. {
            let candidate = match ext {
                Some(ext) => format!("{stem} ({i}).{ext}"),
                None => format!("{stem} ({i})"),
            };
            let logically_free = self.store.child(parent, &candidate).is_none();
            let physically_free = fs::symlink_metadata(parent_physical.join(&candidate)).is_err();
            if logically_free && physically_free {
                return candidate;
            }
        }
        unreachable!("the candidate space is unbounded")
    }

    /// Materialize a new logical object for the physical one.
    fn create(
        &self,
        tx: &mut Transaction,
        root: &Root,
        pair: &PathPair,
        physical: &PhysicalFacts,
    ) -> Result<Soid> {
        let parent = self.resolve_create_parent(root, pair)?;
        let name = pair.name().expect("non-root checked by the decision engine");
        let otype = if physical.is_dir {
            ObjectType::Dir
        } else {
            ObjectType::File
        };

        let soid = self
            .store
            .create_object(tx, parent, name, otype, Some(physical.fid))?;
        trace!(%soid, path = %pair.logical(), "created logical object");

        if !physical.is_dir {
            // The master slot appears when the first hash lands; until then
            // the object counts as content-incomplete.
            self.request_hash(tx, soid, pair, physical, None);
        }
        Ok(soid)
    }

    /// Move an existing object to match the physical path, then check its
    /// content for modification.
    fn update(
        &self,
        tx: &mut Transaction,
        root: &Root,
        pair: &PathPair,
        soid: Soid,
        physical: &PhysicalFacts,
        force: bool,
    ) -> Result<Soid> {
        let current = self.store.path_of(soid)?;
        if current != *pair.logical() {
            let new_parent = self.resolve_create_parent(root, pair)?;
            let name = pair.name().expect("non-root checked by the decision engine");
            trace!(%soid, from = %current, to = %pair.logical(), "moving logical object");
            self.store
                .move_object(tx, soid, new_parent, name)
                .map_err(|e| match e {
                    mirror_store::Error::NameTaken { .. } => Error::Inconsistent {
                        path: pair.physical().to_path_buf(),
                        message: "name collision while moving object into place".to_string(),
                    },
                    other => Error::Store(other),
                })?;
        }

        if !physical.is_dir {
            self.detect_modification(tx, soid, pair, physical, force)?;
        }
        Ok(soid)
    }

    /// Rebind the target to the observed physical identity, demoting a
    /// displaced source if one exists.
    fn replace(
        &self,
        tx: &mut Transaction,
        pair: &PathPair,
        target_soid: Soid,
        target_attr: &ObjectAttr,
        source: Option<&(Soid, ObjectAttr)>,
        physical: &PhysicalFacts,
    ) -> Result<Soid> {
        if let Some((source_soid, source_attr)) = source
            && *source_soid != target_soid
        {
            // A physical move landed exactly on an existing target. The
            // source loses the FID and gets the assume-changed sentinel so
            // a timestamp coincidence can never mask its next change.
            self.store.set_fid(tx, *source_soid, Some(Fid::random()))?;
            if source_attr.otype == ObjectType::File {
                self.store.set_content(
                    tx,
                    *source_soid,
                    Branch::MASTER,
                    ContentAttr::assume_changed(),
                    false,
                )?;
            }
            debug!(source = %source_soid, target = %target_soid, "demoted displaced source");
        }

        self.store.set_fid(tx, target_soid, Some(physical.fid))?;
        trace!(%target_soid, path = %pair.logical(), "replaced fid binding");

        if !physical.is_dir && target_attr.otype == ObjectType::File {
            self.detect_modification(tx, target_soid, pair, physical, false)?;
        }
        Ok(target_soid)
    }

    /// Skip the hash when nothing observable changed; otherwise let the
    /// hash queue decide whether this is a real change.
    fn detect_modification(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        pair: &PathPair,
        physical: &PhysicalFacts,
        force: bool,
    ) -> Result<()> {
        let master = self.store.content(soid, Branch::MASTER);
        if !force
            && let Some(attr) = &master
            && attr.length == physical.length
            && attr.mtime == physical.mtime
            && attr.hash.is_some()
        {
            trace!(%soid, "content attributes unchanged, skipping hash");
            return Ok(());
        }
        self.request_hash(tx, soid, pair, physical, master);
        Ok(())
    }

    fn request_hash(
        &self,
        tx: &mut Transaction,
        soid: Soid,
        pair: &PathPair,
        physical: &PhysicalFacts,
        prior: Option<ContentAttr>,
    ) {
        self.hasher.request(
            tx,
            HashRequest {
                soid,
                path: pair.physical().to_path_buf(),
                length: physical.length,
                mtime: physical.mtime,
                prior,
            },
        );
    }

    /// Resolve the parent container for a create/move, following an anchor
    /// into the mounted store's root.
    fn resolve_create_parent(&self, root: &Root, pair: &PathPair) -> Result<Soid> {
        let inconsistent = |message: &str| Error::Inconsistent {
            path: pair.physical().to_path_buf(),
            message: message.to_string(),
        };

        let parent_logical = pair
            .logical()
            .parent()
            .ok_or_else(|| inconsistent("the root itself cannot be created"))?;
        let parent_soid = self
            .store
            .resolve(root.store(), &parent_logical)
            .ok_or_else(|| inconsistent("parent vanished between decision and execution"))?;

        match self.store.attributes(parent_soid)?.otype {
            ObjectType::Anchor(child) if self.store.has_store(child) => Ok(Soid::root(child)),
            ObjectType::Anchor(child) => {
                Err(inconsistent(&format!("anchor references unknown store {child}")))
            }
            _ => Ok(parent_soid),
        }
    }

    /// Schedule a deferred pass that makes the anchor's marker file name
    /// the mounted store.
    fn schedule_marker_fix(&self, anchor_dir: PathBuf, child: StoreId) {
        self.scheduler.schedule_in(MARKER_FIX_DELAY, move || {
            fix_anchor_marker(&anchor_dir, child);
        });
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

/// Rewrite the marker file if it is missing or names the wrong store.
fn fix_anchor_marker(anchor_dir: &Path, child: StoreId) {
    if !anchor_dir.is_dir() {
        return; // the anchor vanished again; a later pass will retry
    }
    let marker = anchor_dir.join(ControlName::AnchorMarker.as_str());
    let expected = child.0.simple().to_string();

    match fs::read_to_string(&marker) {
        Ok(content) if content.trim() == expected => {}
        _ => {
            if let Err(e) = fs::write(&marker, format!("{expected}\n")) {
                warn!(path = %marker.display(), error = %e, "failed to fix anchor marker");
            } else {
                debug!(path = %marker.display(), %child, "fixed anchor marker");
            }
        }
    }
}

/// Read the store a marker file names, if any.
pub(crate) fn read_anchor_marker(anchor_dir: &Path) -> Option<StoreId> {
    let marker = anchor_dir.join(ControlName::AnchorMarker.as_str());
    let content = fs::read_to_string(marker).ok()?;
    uuid::Uuid::parse_str(content.trim()).ok().map(StoreId)
}
