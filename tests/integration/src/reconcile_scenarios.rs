//! End-to-end reconciliation scenarios.
//!
//! Each test drives the orchestrator the way the notifier would, with a
//! manual clock so timeouts are deterministic.

use mirror_core::{DEFAULT_DELETION_TIMEOUT, Decision};
use mirror_store::{ObjectStore, ObjectType};
use mirror_test_utils::{TestEngine, TestTree};
use pretty_assertions::assert_eq;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

#[test]
fn create_then_touch_updates_metadata_without_version_bump() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a.txt", "0123456789");
    let sid = engine.link(&tree);
    let soid = engine.resolve(sid, "a.txt").unwrap();

    let before = engine.master_content(soid).unwrap();
    let version_before = engine.master_version(soid);
    assert_eq!(before.length, 10);
    assert!(before.hash.is_some(), "initial scan must hash the file");

    // Touch only the mtime; the bytes are unchanged.
    tree.touch("a.txt");
    assert_eq!(engine.notify_create(&tree.path("a.txt")), Decision::File);

    let after = engine.master_content(soid).unwrap();
    assert_eq!(
        engine.master_version(soid),
        version_before,
        "a timestamp-only touch must not bump the version"
    );
    assert_ne!(after.mtime, before.mtime, "metadata must still be updated");
    assert_eq!(after.length, 10);
    assert_eq!(after.hash, before.hash);
}

#[test]
fn rename_seen_as_delete_plus_create_is_a_single_move() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a.txt", "same bytes throughout");
    let sid = engine.link(&tree);
    let soid = engine.resolve(sid, "a.txt").unwrap();
    let version_before = engine.master_version(soid);

    // The OS reports a rename as delete(old) + create(new).
    tree.rename("a.txt", "b.txt");
    engine.notify_delete(&tree.path("a.txt"));
    assert!(engine.engine.deletion_buffer().pending(soid));

    assert_eq!(engine.notify_create(&tree.path("b.txt")), Decision::File);

    // The FID match reinstated the object: one move, zero deletions.
    assert_eq!(engine.resolve(sid, "b.txt"), Some(soid));
    assert_eq!(engine.resolve(sid, "a.txt"), None);
    assert!(!engine.engine.deletion_buffer().pending(soid));

    engine.advance(DEFAULT_DELETION_TIMEOUT * 2);
    assert_eq!(engine.resolve(sid, "b.txt"), Some(soid));
    assert_eq!(engine.master_version(soid), version_before);
}

#[test]
fn second_hardlink_is_ignored() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a", "linked content");
    let sid = engine.link(&tree);
    let original = engine.resolve(sid, "a").unwrap();

    tree.hardlink("a", "b");
    assert_eq!(engine.notify_create(&tree.path("b")), Decision::Ignored);

    assert_eq!(engine.resolve(sid, "a"), Some(original));
    assert_eq!(
        engine.resolve(sid, "b"),
        None,
        "one FID, one logical object"
    );
}

#[test]
fn hardlinked_pair_in_initial_scan_yields_one_object() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a", "linked content");
    tree.hardlink("a", "b");
    let sid = engine.link(&tree);

    // Scan order is filesystem-dependent; exactly one path wins.
    let a = engine.resolve(sid, "a");
    let b = engine.resolve(sid, "b");
    assert!(
        a.is_some() ^ b.is_some(),
        "exactly one of the hardlinked paths may resolve, got a={a:?} b={b:?}"
    );
}

#[test]
fn replacing_file_content_keeps_identity_and_bumps_version() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a.txt", "first contents");
    let sid = engine.link(&tree);
    let soid = engine.resolve(sid, "a.txt").unwrap();
    let version_before = engine.master_version(soid);

    // Atomic-replace pattern: write a temp file, rename it over the
    // original. The path keeps its object; the FID binding moves.
    tree.write_file("a.txt.tmp", "second contents, longer");
    tree.rename("a.txt.tmp", "a.txt");
    assert_eq!(engine.notify_create(&tree.path("a.txt")), Decision::File);

    assert_eq!(engine.resolve(sid, "a.txt"), Some(soid));
    assert_eq!(engine.master_version(soid), version_before + 1);
    assert_eq!(
        engine.master_content(soid).unwrap().length,
        "second contents, longer".len() as u64
    );
}

#[test]
fn deleted_subtree_is_removed_after_timeout() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("dir/f.txt", "doomed");
    let sid = engine.link(&tree);
    assert!(engine.resolve(sid, "dir/f.txt").is_some());
    let dir_soid = engine.resolve(sid, "dir").unwrap();

    tree.remove("dir");
    engine.notify_delete(&tree.path("dir"));
    assert!(engine.engine.deletion_buffer().pending(dir_soid));

    // Still present within the grace period.
    engine.advance(DEFAULT_DELETION_TIMEOUT / 2);
    assert!(engine.resolve(sid, "dir").is_some());

    engine.advance(DEFAULT_DELETION_TIMEOUT);
    assert_eq!(engine.resolve(sid, "dir"), None);
    assert_eq!(engine.resolve(sid, "dir/f.txt"), None);
}

#[test]
fn type_change_renames_the_old_object_aside() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a.txt", "used to be a file");
    let sid = engine.link(&tree);
    let file_soid = engine.resolve(sid, "a.txt").unwrap();

    // The path becomes a directory.
    tree.remove("a.txt");
    tree.mkdir("a.txt");
    assert_eq!(
        engine.notify_create(&tree.path("a.txt")),
        Decision::NewOrReplacedFolder
    );

    let dir_soid = engine.resolve(sid, "a.txt").unwrap();
    assert_ne!(dir_soid, file_soid);
    assert!(
        engine
            .store
            .attributes(dir_soid)
            .unwrap()
            .otype
            .is_dir_like()
    );
    // The old file object was moved to a free sibling name, not destroyed.
    assert_eq!(engine.resolve(sid, "a (2).txt"), Some(file_soid));
    assert_eq!(
        engine.store.attributes(file_soid).unwrap().otype,
        ObjectType::File
    );
}

#[test]
fn non_representable_target_is_renamed_before_reconciling() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("a.txt", "original");
    let sid = engine.link(&tree);
    let old_soid = engine.resolve(sid, "a.txt").unwrap();

    // Mark the logical object non-representable, as the remote name
    // collision path would.
    let mut tx = engine.store.begin();
    engine
        .store
        .set_non_representable(&mut tx, old_soid, true)
        .unwrap();
    tx.commit().unwrap();

    // A new physical object claims the path. The claimant is created
    // before the removal so it cannot inherit the old file's inode.
    tree.write_file("claimant.tmp", "new owner of the name");
    tree.remove("a.txt");
    tree.rename("claimant.tmp", "a.txt");
    assert_eq!(engine.notify_create(&tree.path("a.txt")), Decision::File);

    let new_soid = engine.resolve(sid, "a.txt").unwrap();
    assert_ne!(new_soid, old_soid);
    // The old object moved to a free sibling name and is representable
    // again.
    assert_eq!(engine.resolve(sid, "a (2).txt"), Some(old_soid));
    assert!(
        !engine
            .store
            .attributes(old_soid)
            .unwrap()
            .non_representable
    );
}

#[test]
fn rescan_converges_after_missed_events() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file("seen.txt", "before");
    let sid = engine.link(&tree);

    // These changes produce no notifications at all.
    tree.write_file("missed/deep.txt", "no event fired");
    tree.remove("seen.txt");

    engine.engine.request_rescan(sid);
    engine.settle();
    assert!(engine.resolve(sid, "missed/deep.txt").is_some());

    // The vanished file is staged, not yet deleted.
    let seen = engine.resolve(sid, "seen.txt").unwrap();
    assert!(engine.engine.deletion_buffer().pending(seen));
    engine.advance(DEFAULT_DELETION_TIMEOUT * 2);
    assert_eq!(engine.resolve(sid, "seen.txt"), None);
}

#[test]
fn duplicate_notifications_are_idempotent() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    let path = tree.write_file("a.txt", "content");
    let sid = engine.link(&tree);
    let soid = engine.resolve(sid, "a.txt").unwrap();
    let version = engine.master_version(soid);

    for _ in 0..3 {
        assert_eq!(engine.notify_create(&path), Decision::File);
        assert_eq!(engine.resolve(sid, "a.txt"), Some(soid));
        assert_eq!(engine.master_version(soid), version);
    }
}

#[test]
fn ignored_names_never_reach_the_store() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();

    tree.write_file(".DS_Store", "junk");
    tree.write_file(".mirror-anchor", "control file");
    tree.write_file("real.txt", "content");
    let sid = engine.link(&tree);

    assert!(engine.resolve(sid, "real.txt").is_some());
    assert_eq!(engine.resolve(sid, ".DS_Store"), None);
    assert_eq!(engine.resolve(sid, ".mirror-anchor"), None);

    assert_eq!(
        engine.notify_create(&tree.path(".DS_Store")),
        Decision::Ignored
    );
}

#[test]
fn delete_of_unknown_path_is_a_no_op() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let _sid = engine.link(&tree);

    engine.notify_delete(&tree.path("never-existed.txt"));
    assert!(engine.engine.deletion_buffer().is_empty());
}
