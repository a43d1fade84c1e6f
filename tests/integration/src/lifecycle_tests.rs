//! Root lifecycle, pause/resume, and shared-folder anchor behavior.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use mirror_core::{Clock, EngineConfig, EngineState, Orchestrator};
use mirror_fs::{ControlName, Fid, LogicalPath};
use mirror_store::{MemoryStore, ObjectStore, ObjectType, Soid, StoreId};
use mirror_test_utils::{TestEngine, TestTree};
use pretty_assertions::assert_eq;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

#[test]
fn pause_drops_events_and_resume_rescans() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let sid = engine.link(&tree);

    engine.engine.pause();
    assert_eq!(engine.engine.state(), EngineState::Paused);

    let path = tree.write_file("while-paused.txt", "dropped event");
    assert_eq!(
        engine.notify_create(&path),
        mirror_core::Decision::Ignored
    );
    assert_eq!(engine.resolve(sid, "while-paused.txt"), None);

    engine.engine.resume();
    engine.settle();
    assert!(engine.resolve(sid, "while-paused.txt").is_some());
}

#[test]
fn unlinked_root_stops_reconciling() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let sid = engine.link(&tree);

    engine.engine.unlink_root(sid).unwrap();

    let path = tree.write_file("after-unlink.txt", "orphan");
    assert_eq!(
        engine.notify_create(&path),
        mirror_core::Decision::Ignored
    );
    assert_eq!(engine.resolve(sid, "after-unlink.txt"), None);

    // Logical objects survive the unlink; only the binding is gone.
    assert!(engine.store.has_store(sid));
}

#[test]
fn unlink_removes_the_persisted_entry() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    let table_path = dir.path().join("roots.toml");

    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(
        store,
        EngineConfig {
            clock: Clock::manual(),
            root_table: Some(table_path.clone()),
            hash_workers: 0,
            hash_queue_capacity: 0,
            ..EngineConfig::default()
        },
    )
    .unwrap();

    let sid = StoreId::generate();
    orchestrator.link_root(sid, &data).unwrap();
    orchestrator.run_until_idle();
    orchestrator.unlink_root(sid).unwrap();

    // A fresh engine finds nothing to recover.
    let store = Arc::new(MemoryStore::new());
    let fresh = Orchestrator::new(
        store,
        EngineConfig {
            clock: Clock::manual(),
            root_table: Some(table_path),
            hash_workers: 0,
            hash_queue_capacity: 0,
            ..EngineConfig::default()
        },
    )
    .unwrap();
    assert_eq!(fresh.recover().unwrap(), 0);
}

#[test]
fn relink_after_unlink_resyncs() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let sid = engine.link(&tree);

    engine.engine.unlink_root(sid).unwrap();
    tree.write_file("added-while-unlinked.txt", "catch me later");

    engine.engine.link_root(sid, tree.root()).unwrap();
    engine.settle();
    assert!(engine.resolve(sid, "added-while-unlinked.txt").is_some());
}

#[test]
fn anchor_marker_is_fixed_by_a_deferred_task() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let parent_sid = engine.link(&tree);

    // A shared folder: physical directory plus a logical anchor mounting a
    // child store.
    let anchor_dir = tree.mkdir("shared");
    let child_sid = StoreId::generate();
    let mut tx = engine.store.begin();
    engine.store.create_store(&mut tx, child_sid).unwrap();
    engine
        .store
        .create_object(
            &mut tx,
            Soid::root(parent_sid),
            "shared",
            ObjectType::Anchor(child_sid),
            Some(Fid::from_path(&anchor_dir).unwrap()),
        )
        .unwrap();
    tx.commit().unwrap();

    // Reconciling the anchor schedules the deferred marker fix.
    assert_eq!(
        engine.notify_create(&anchor_dir),
        mirror_core::Decision::ExistingFolder
    );
    engine.advance(Duration::from_secs(1));

    let marker = anchor_dir.join(ControlName::AnchorMarker.as_str());
    let content = fs::read_to_string(&marker).unwrap();
    assert_eq!(content.trim(), child_sid.0.simple().to_string());
}

#[test]
fn create_under_an_anchor_lands_in_the_child_store() {
    init_logging();
    let tree = TestTree::new();
    let engine = TestEngine::new();
    let parent_sid = engine.link(&tree);

    let anchor_dir = tree.mkdir("shared");
    let child_sid = StoreId::generate();
    let mut tx = engine.store.begin();
    engine.store.create_store(&mut tx, child_sid).unwrap();
    engine
        .store
        .create_object(
            &mut tx,
            Soid::root(parent_sid),
            "shared",
            ObjectType::Anchor(child_sid),
            Some(Fid::from_path(&anchor_dir).unwrap()),
        )
        .unwrap();
    tx.commit().unwrap();

    let inner = tree.write_file("shared/inner.txt", "crosses the mount");
    assert_eq!(engine.notify_create(&inner), mirror_core::Decision::File);

    assert!(
        engine
            .store
            .resolve(child_sid, &LogicalPath::new("inner.txt"))
            .is_some(),
        "objects under an anchor belong to the mounted store"
    );
    assert_eq!(
        engine
            .store
            .resolve(parent_sid, &LogicalPath::new("shared/inner.txt")),
        None
    );
}
