//! Exhaustive property tests over the create decision matrix.

use mirror_core::engine::create::{PlanAction, SourceFacts, TargetFacts, plan};
use mirror_store::{ObjectId, ObjectType, Soid, StoreId};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Shape {
    File,
    Dir,
    Anchor,
}

fn shapes() -> impl Strategy<Value = Shape> {
    prop_oneof![Just(Shape::File), Just(Shape::Dir), Just(Shape::Anchor)]
}

fn otype(shape: Shape, store: StoreId) -> ObjectType {
    match shape {
        Shape::File => ObjectType::File,
        Shape::Dir => ObjectType::Dir,
        Shape::Anchor => ObjectType::Anchor(store),
    }
}

#[derive(Debug, Clone)]
struct Case {
    source_shape: Option<Shape>,
    target_shape: Option<Shape>,
    same_object: bool,
    target_expelled: bool,
    target_non_representable: bool,
    physical_is_dir: bool,
    marker_matches: bool,
}

fn cases() -> impl Strategy<Value = Case> {
    (
        proptest::option::of(shapes()),
        proptest::option::of(shapes()),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(
                source_shape,
                target_shape,
                same_object,
                target_expelled,
                target_non_representable,
                physical_is_dir,
                marker_matches,
            )| Case {
                source_shape,
                target_shape,
                same_object,
                target_expelled,
                target_non_representable,
                physical_is_dir,
                marker_matches,
            },
        )
}

struct Built {
    source: Option<SourceFacts>,
    target: Option<TargetFacts>,
}

fn build(case: &Case) -> Built {
    let store = StoreId::generate();
    let shared_soid = Soid::new(store, ObjectId::generate());

    let target = case.target_shape.map(|shape| TargetFacts {
        soid: shared_soid,
        otype: otype(shape, StoreId::generate()),
        expelled: case.target_expelled,
        non_representable: case.target_non_representable,
    });
    // One SOID has one type: when source and target are the same object,
    // the source mirrors the target's type.
    let source = case.source_shape.map(|shape| {
        let same = case.same_object && target.is_some();
        SourceFacts {
            soid: if same {
                shared_soid
            } else {
                Soid::new(store, ObjectId::generate())
            },
            otype: match (same, &target) {
                (true, Some(target)) => target.otype,
                _ => otype(shape, StoreId::generate()),
            },
        }
    });
    Built { source, target }
}

proptest! {
    /// Replacement safety: never replace an expelled or type-mismatched
    /// target, never adopt an anchor without its marker, never let a
    /// directory absorb a FID another object binds.
    #[test]
    fn replace_is_only_chosen_when_safe(case in cases()) {
        let built = build(&case);
        let p = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );

        if p.action == PlanAction::Replace {
            let target = built.target.as_ref().expect("replace requires a target");
            prop_assert!(!target.expelled);
            prop_assert!(target.otype.matches_physical(case.physical_is_dir));
            match target.otype {
                ObjectType::Anchor(_) => prop_assert!(case.marker_matches),
                ObjectType::Dir => prop_assert!(
                    built.source.as_ref().is_none_or(|s| s.soid == target.soid)
                ),
                ObjectType::File => {}
            }
        }
    }

    /// An update only ever moves the object already bound to the FID, and
    /// only when its type matches the physical object.
    #[test]
    fn update_requires_a_type_matched_source(case in cases()) {
        let built = build(&case);
        let p = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );

        if p.action == PlanAction::Update {
            let source = built.source.as_ref().expect("update requires a source");
            prop_assert!(source.otype.matches_physical(case.physical_is_dir));
            prop_assert!(!p.randomize_source_fid);
        }
    }

    /// The FID is freed exactly when a type-mismatched source would
    /// otherwise collide with the create.
    #[test]
    fn fid_randomization_accompanies_creates_over_mismatched_sources(case in cases()) {
        let built = build(&case);
        let p = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );

        if p.randomize_source_fid {
            prop_assert_eq!(p.action, PlanAction::Create);
            let source = built.source.as_ref().expect("randomization needs a source");
            prop_assert!(!source.otype.matches_physical(case.physical_is_dir));
        }
    }

    /// A conflicting target is always cleared out of the way: every plan
    /// with a target either updates-in-place the same object, replaces it,
    /// or renames it first.
    #[test]
    fn targets_are_never_silently_overwritten(case in cases()) {
        let built = build(&case);
        let p = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );

        if let Some(target) = built.target.as_ref() {
            let same = built.source.as_ref().is_some_and(|s| s.soid == target.soid);
            let handled = p.action == PlanAction::Replace
                || p.rename_target.is_some()
                || (same && p.action == PlanAction::Update);
            prop_assert!(handled, "plan {:?} leaves the target unaccounted for", p);
        }
    }

    /// A non-representable target is always renamed away first, with the
    /// apply-now physical op.
    #[test]
    fn non_representable_targets_rename_first(case in cases()) {
        let built = build(&case);
        let p = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );

        if built
            .target
            .as_ref()
            .is_some_and(|target| target.non_representable)
        {
            let rename = p.rename_target.expect("non-representable target must move");
            prop_assert!(rename.non_representable);
            prop_assert_ne!(p.action, PlanAction::Replace);
        }
    }

    /// The planner is deterministic.
    #[test]
    fn planning_is_deterministic(case in cases()) {
        let built = build(&case);
        let first = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );
        let second = plan(
            built.source.as_ref(),
            built.target.as_ref(),
            case.physical_is_dir,
            case.marker_matches,
        );
        prop_assert_eq!(first, second);
    }
}
