//! Create decision engine.
//!
//! Given a "might have been created or modified" observation, decide which
//! logical operations reconcile the store with it. The hard part is that
//! physical signals are weak: FIDs get reused, hardlinks alias one identity
//! across paths, and insensitive filesystems fold names. The decision
//! matrix below resolves every combination deterministically; expected
//! races collapse to [`Decision::Ignored`] rather than errors.

use std::fs;
use std::sync::Arc;

use tracing::{debug, trace};

use mirror_fs::{Fid, FsCapabilities, IgnoreFilter, LogicalPath, PathPair};
use mirror_store::{ObjectAttr, ObjectStore, ObjectType, Soid, Transaction};

use crate::Result;
use crate::engine::executor::{Executor, read_anchor_marker};
use crate::engine::{PhysicalFacts, PhysicalOpMode};
use crate::roots::Root;

/// What a create observation turned out to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A directory or anchor was freshly created or had its FID replaced;
    /// the caller must scan its subtree immediately because child events
    /// may have raced ahead of watch registration
    NewOrReplacedFolder,
    /// A directory we already tracked at this identity
    ExistingFolder,
    /// A file was reconciled
    File,
    /// Nothing to do: filtered name, expected race, or hardlink duplicate
    Ignored,
}

/// The operation set to apply for one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpPlan {
    pub action: PlanAction,
    /// Divorce the source object from the observed FID before acting
    pub randomize_source_fid: bool,
    /// Move the conflicting target out of the way before acting
    pub rename_target: Option<RenameTarget>,
}

/// The main operation of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    /// Materialize a new logical object
    Create,
    /// Move the source into place and re-check content
    Update,
    /// Rebind the target's FID to the observed identity
    Replace,
}

/// A pending rename of the conflicting target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameTarget {
    /// The target was non-representable rather than a plain conflict
    pub non_representable: bool,
    /// Physical-op realization, forwarded untouched
    pub mode: PhysicalOpMode,
}

/// What the planner needs to know about the source object (the one bound
/// to the observed FID).
#[derive(Debug, Clone, Copy)]
pub struct SourceFacts {
    pub soid: Soid,
    pub otype: ObjectType,
}

/// What the planner needs to know about the target object (the one
/// resolved at the observed path).
#[derive(Debug, Clone, Copy)]
pub struct TargetFacts {
    pub soid: Soid,
    pub otype: ObjectType,
    pub expelled: bool,
    pub non_representable: bool,
}

/// Compute the operation set from the (source, target, type-match) matrix.
///
/// Pure so the whole matrix can be tested exhaustively.
pub fn plan(
    source: Option<&SourceFacts>,
    target: Option<&TargetFacts>,
    physical_is_dir: bool,
    anchor_marker_matches: bool,
) -> OpPlan {
    let update_source = |rename_target: Option<RenameTarget>| match source {
        None => OpPlan {
            action: PlanAction::Create,
            randomize_source_fid: false,
            rename_target,
        },
        Some(source) if source.otype.matches_physical(physical_is_dir) => OpPlan {
            action: PlanAction::Update,
            randomize_source_fid: false,
            rename_target,
        },
        // The FID is bound to an object of a different type: ID reuse by
        // the filesystem, not identity.
        Some(_) => OpPlan {
            action: PlanAction::Create,
            randomize_source_fid: true,
            rename_target,
        },
    };

    let Some(target) = target else {
        return update_source(None);
    };

    if target.non_representable {
        // The target never made it to disk under this name; rename it away
        // with an apply-now op since it is already hidden from scans.
        return update_source(Some(RenameTarget {
            non_representable: true,
            mode: PhysicalOpMode::Apply,
        }));
    }

    if let Some(source) = source
        && source.soid == target.soid
        && target.otype.matches_physical(physical_is_dir)
    {
        return OpPlan {
            action: PlanAction::Update,
            randomize_source_fid: false,
            rename_target: None,
        };
    }

    if replace_is_safe(source, target, physical_is_dir, anchor_marker_matches) {
        return OpPlan {
            action: PlanAction::Replace,
            randomize_source_fid: false,
            rename_target: None,
        };
    }

    update_source(Some(RenameTarget {
        non_representable: false,
        mode: PhysicalOpMode::Map,
    }))
}

/// Whether the target's FID binding may be replaced by the observed one.
fn replace_is_safe(
    source: Option<&SourceFacts>,
    target: &TargetFacts,
    physical_is_dir: bool,
    anchor_marker_matches: bool,
) -> bool {
    if target.expelled || !target.otype.matches_physical(physical_is_dir) {
        return false;
    }
    match target.otype {
        // Only adopt a directory as a shared-folder mount if the marker on
        // disk genuinely names that anchor's store.
        ObjectType::Anchor(_) => anchor_marker_matches,
        // A directory may only absorb a FID nothing else claims.
        ObjectType::Dir => source.is_none_or(|s| s.soid == target.soid),
        ObjectType::File => true,
    }
}

/// The create decision engine.
pub struct CreateEngine {
    store: Arc<dyn ObjectStore>,
    filter: IgnoreFilter,
    executor: Executor,
}

impl CreateEngine {
    pub fn new(store: Arc<dyn ObjectStore>, filter: IgnoreFilter, executor: Executor) -> Self {
        Self {
            store,
            filter,
            executor,
        }
    }

    /// Reconcile one "might have been created or modified" observation.
    ///
    /// Expected races (filtered names, vanished objects, missing or
    /// expelled parents, hardlink duplicates) return
    /// [`Decision::Ignored`]. Anything else that fails propagates so the
    /// orchestrator can escalate to a full root rescan.
    pub fn handle(&self, tx: &mut Transaction, root: &Root, pair: &PathPair) -> Result<Decision> {
        let store_id = root.store();

        let Some(name) = pair.name() else {
            return Ok(Decision::ExistingFolder); // the root itself
        };
        if self.filter.is_ignored_str(name) {
            return Ok(Decision::Ignored);
        }

        // Parent must exist and not be expelled; a miss is a race with the
        // parent's own notification, which will retry this subtree.
        let parent_path = pair.logical().parent().expect("non-root has a parent");
        let Some(parent_soid) = self.store.resolve(store_id, &parent_path) else {
            trace!(path = %pair.logical(), "parent not yet known, ignoring");
            return Ok(Decision::Ignored);
        };
        if self.store.attributes(parent_soid)?.expelled {
            trace!(path = %pair.logical(), "parent is expelled, ignoring");
            return Ok(Decision::Ignored);
        }

        // Observe the physical object. Races on the way are benign.
        let metadata = match fs::symlink_metadata(pair.physical()) {
            Ok(metadata) => metadata,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                trace!(path = %pair.physical().display(), "object vanished before stat, ignoring");
                return Ok(Decision::Ignored);
            }
            Err(e) => return Err(mirror_fs::Error::io(pair.physical(), e).into()),
        };
        if metadata.file_type().is_symlink() {
            return Ok(Decision::Ignored);
        }
        let physical = match PhysicalFacts::from_metadata(pair.physical(), &metadata) {
            Ok(physical) => physical,
            Err(e) if e.is_benign() => return Ok(Decision::Ignored),
            Err(e) => return Err(e.into()),
        };

        let source = self.lookup(self.store.object_by_fid(store_id, physical.fid))?;
        let target = self.lookup(self.store.resolve(store_id, pair.logical()))?;

        if self.is_hardlink_duplicate(root, pair, &source, physical.fid)? {
            debug!(path = %pair.logical(), "hardlink duplicate, ignoring");
            return Ok(Decision::Ignored);
        }

        let source_facts = source.as_ref().map(|(soid, attr)| SourceFacts {
            soid: *soid,
            otype: attr.otype,
        });
        let target_facts = target.as_ref().map(|(soid, attr)| TargetFacts {
            soid: *soid,
            otype: attr.otype,
            expelled: attr.expelled,
            non_representable: attr.non_representable,
        });

        let anchor_marker_matches = match target.as_ref().map(|(_, attr)| attr.otype) {
            Some(ObjectType::Anchor(child)) => {
                read_anchor_marker(pair.physical()) == Some(child)
            }
            _ => false,
        };

        let plan = plan(
            source_facts.as_ref(),
            target_facts.as_ref(),
            physical.is_dir,
            anchor_marker_matches,
        );
        trace!(path = %pair.logical(), ?plan, "decided operation set");

        self.executor.apply(
            tx,
            root,
            pair,
            &physical,
            source.as_ref(),
            target.as_ref(),
            &plan,
        )?;

        Ok(match (physical.is_dir, plan.action) {
            (true, PlanAction::Create | PlanAction::Replace) => Decision::NewOrReplacedFolder,
            (true, PlanAction::Update) => Decision::ExistingFolder,
            (false, _) => Decision::File,
        })
    }

    fn lookup(&self, soid: Option<Soid>) -> Result<Option<(Soid, ObjectAttr)>> {
        match soid {
            Some(soid) => Ok(Some((soid, self.store.attributes(soid)?))),
            None => Ok(None),
        }
    }

    /// Whether the observed path is a hardlink alias of the source's path.
    ///
    /// If the source lives at a different, not-physically-equivalent path
    /// whose FID (statted fresh) still equals the observed one, the two
    /// paths alias one physical object; only one logical object may exist
    /// for it.
    fn is_hardlink_duplicate(
        &self,
        root: &Root,
        pair: &PathPair,
        source: &Option<(Soid, ObjectAttr)>,
        fid: Fid,
    ) -> Result<bool> {
        let Some((source_soid, _)) = source else {
            return Ok(false);
        };
        let source_path = self.store.path_of(*source_soid)?;
        if source_path == *pair.logical() {
            return Ok(false);
        }
        if paths_fold_equal(&source_path, pair.logical(), root.capabilities()) {
            // Same directory entry spelled differently on an insensitive
            // filesystem, not a second link.
            return Ok(false);
        }

        let source_physical = root.physical(&source_path);
        Ok(matches!(Fid::from_path(&source_physical), Ok(fresh) if fresh == fid))
    }
}

impl std::fmt::Debug for CreateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateEngine").finish_non_exhaustive()
    }
}

/// Component-wise name equivalence under the root's capability bits.
fn paths_fold_equal(a: &LogicalPath, b: &LogicalPath, caps: FsCapabilities) -> bool {
    let mut a_components = a.components();
    let mut b_components = b.components();
    loop {
        match (a_components.next(), b_components.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if caps.names_equivalent(x, y) => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn source(otype: ObjectType) -> SourceFacts {
        SourceFacts {
            soid: Soid::new(mirror_store::StoreId::generate(), mirror_store::ObjectId::generate()),
            otype,
        }
    }

    fn target(otype: ObjectType) -> TargetFacts {
        TargetFacts {
            soid: Soid::new(mirror_store::StoreId::generate(), mirror_store::ObjectId::generate()),
            otype,
            expelled: false,
            non_representable: false,
        }
    }

    #[test]
    fn no_source_no_target_is_create() {
        let p = plan(None, None, false, false);
        assert_eq!(p.action, PlanAction::Create);
        assert!(!p.randomize_source_fid);
        assert!(p.rename_target.is_none());
    }

    #[test]
    fn matching_source_without_target_is_update() {
        let s = source(ObjectType::File);
        let p = plan(Some(&s), None, false, false);
        assert_eq!(p.action, PlanAction::Update);
    }

    #[test]
    fn type_mismatched_source_is_create_with_randomized_fid() {
        let s = source(ObjectType::Dir);
        let p = plan(Some(&s), None, false, false);
        assert_eq!(p.action, PlanAction::Create);
        assert!(p.randomize_source_fid);
    }

    #[test]
    fn same_object_at_path_is_plain_update() {
        let s = source(ObjectType::File);
        let t = TargetFacts {
            soid: s.soid,
            otype: ObjectType::File,
            expelled: false,
            non_representable: false,
        };
        let p = plan(Some(&s), Some(&t), false, false);
        assert_eq!(p.action, PlanAction::Update);
        assert!(p.rename_target.is_none());
    }

    #[test]
    fn non_representable_target_renames_with_apply_op() {
        let t = TargetFacts {
            non_representable: true,
            ..target(ObjectType::File)
        };
        let p = plan(None, Some(&t), false, false);
        assert_eq!(p.action, PlanAction::Create);
        let rename = p.rename_target.unwrap();
        assert!(rename.non_representable);
        assert_eq!(rename.mode, PhysicalOpMode::Apply);
    }

    #[test]
    fn plain_file_target_is_replaced() {
        let t = target(ObjectType::File);
        let p = plan(None, Some(&t), false, false);
        assert_eq!(p.action, PlanAction::Replace);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn expelled_target_is_never_replaced(#[case] physical_is_dir: bool) {
        let t = TargetFacts {
            expelled: true,
            ..target(if physical_is_dir {
                ObjectType::Dir
            } else {
                ObjectType::File
            })
        };
        let p = plan(None, Some(&t), physical_is_dir, true);
        assert_ne!(p.action, PlanAction::Replace);
    }

    #[test]
    fn type_mismatched_target_is_never_replaced() {
        let t = target(ObjectType::Dir);
        let p = plan(None, Some(&t), false, false);
        assert_ne!(p.action, PlanAction::Replace);
        assert!(p.rename_target.is_some());
    }

    #[test]
    fn directory_target_with_foreign_source_is_not_replaced() {
        let s = source(ObjectType::Dir);
        let t = target(ObjectType::Dir);
        let p = plan(Some(&s), Some(&t), true, false);
        assert_ne!(p.action, PlanAction::Replace);
    }

    #[test]
    fn directory_target_without_source_is_replaced() {
        let t = target(ObjectType::Dir);
        let p = plan(None, Some(&t), true, false);
        assert_eq!(p.action, PlanAction::Replace);
    }

    #[rstest]
    #[case(true, PlanAction::Replace)]
    #[case(false, PlanAction::Create)]
    fn anchor_replacement_requires_matching_marker(
        #[case] marker_matches: bool,
        #[case] expected: PlanAction,
    ) {
        let t = target(ObjectType::Anchor(mirror_store::StoreId::generate()));
        let p = plan(None, Some(&t), true, marker_matches);
        assert_eq!(p.action, expected);
    }

    #[test]
    fn fold_equal_paths_under_case_insensitive_caps() {
        let caps = FsCapabilities {
            case_insensitive: true,
            norm_insensitive: false,
        };
        assert!(paths_fold_equal(
            &LogicalPath::new("Docs/Readme.MD"),
            &LogicalPath::new("docs/readme.md"),
            caps
        ));
        assert!(!paths_fold_equal(
            &LogicalPath::new("docs/readme.md"),
            &LogicalPath::new("docs/other.md"),
            FsCapabilities::sensitive()
        ));
    }
}
