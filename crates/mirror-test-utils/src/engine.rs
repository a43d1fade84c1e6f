//! [`TestEngine`]: a fully wired engine on a manual clock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mirror_core::{Clock, Decision, EngineConfig, Orchestrator};
use mirror_fs::LogicalPath;
use mirror_store::{Branch, ContentAttr, MemoryStore, ObjectStore, Soid, StoreId};

use crate::tree::TestTree;

/// An orchestrator over an in-memory store, deterministic for tests:
/// manual clock, no hash worker threads (all hashing inline).
pub struct TestEngine {
    pub store: Arc<MemoryStore>,
    pub engine: Orchestrator,
    pub clock: Clock,
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Build with overrides; clock and hash workers are always forced to
    /// the deterministic test configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Clock::manual();
        let store = Arc::new(MemoryStore::new());
        let engine = Orchestrator::new(
            store.clone(),
            EngineConfig {
                clock: clock.clone(),
                hash_workers: 0,
                hash_queue_capacity: 0,
                ..config
            },
        )
        .unwrap();
        Self {
            store,
            engine,
            clock,
        }
    }

    /// Link a tree as a fresh store and settle the initial scan.
    pub fn link(&self, tree: &TestTree) -> StoreId {
        let store_id = StoreId::generate();
        self.engine.link_root(store_id, tree.root()).unwrap();
        self.settle();
        store_id
    }

    /// Run scheduled work until the engine is idle.
    pub fn settle(&self) {
        self.engine.run_until_idle();
    }

    /// Advance the clock and settle, letting timeouts fire.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.settle();
    }

    /// Deliver a might-create notification and settle.
    pub fn notify_create(&self, path: &Path) -> Decision {
        let decision = self.engine.might_create(path);
        self.settle();
        decision
    }

    /// Deliver a might-delete notification (no settle: staged deletions
    /// wait for the clock).
    pub fn notify_delete(&self, path: &Path) {
        self.engine.might_delete(path);
    }

    pub fn resolve(&self, store_id: StoreId, path: &str) -> Option<Soid> {
        self.store.resolve(store_id, &LogicalPath::new(path))
    }

    pub fn master_content(&self, soid: Soid) -> Option<ContentAttr> {
        self.store.content(soid, Branch::MASTER)
    }

    pub fn master_version(&self, soid: Soid) -> u64 {
        self.store.version(soid, Branch::MASTER)
    }
}
