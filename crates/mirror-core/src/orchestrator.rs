//! Reconciliation orchestrator.
//!
//! Wires filesystem observations and tree scans to the decision engines,
//! owns root lifecycle and the engine's pause state, and escalates
//! unclassified failures to full rescans. Everything dispatches through
//! the cooperative scheduler; callers drive it with
//! [`Orchestrator::run_until_idle`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use mirror_fs::{IgnoreFilter, LogicalPath, PathPair};
use mirror_store::{ObjectStore, StoreId};

use crate::buffer::{DEFAULT_DELETION_TIMEOUT, DeletionBuffer};
use crate::engine::{CreateEngine, Decision, DeleteEngine, Executor};
use crate::hasher::HashQueue;
use crate::roots::{Root, RootRegistry, RootTable};
use crate::scan::Scanner;
use crate::scheduler::{Clock, Scheduler};
use crate::Result;

/// Delay before retrying after a failed scan.
const SCAN_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Whether the engine is reacting to observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Active,
    Paused,
}

/// Per-root scan progress.
enum ScanState {
    Idle,
    Scanning { remaining: VecDeque<LogicalPath> },
}

/// Engine construction options.
pub struct EngineConfig {
    /// Grace period for buffered deletions
    pub deletion_timeout: Duration,
    /// Where to persist the root table; None keeps it in memory only
    pub root_table: Option<PathBuf>,
    /// Time source; tests use [`Clock::manual`]
    pub clock: Clock,
    /// Hash worker threads; 0 forces every hash onto the submitting thread
    pub hash_workers: usize,
    /// Bounded hash queue depth; overflow falls back to inline hashing
    pub hash_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deletion_timeout: DEFAULT_DELETION_TIMEOUT,
            root_table: None,
            clock: Clock::system(),
            hash_workers: 2,
            hash_queue_capacity: 32,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("deletion_timeout", &self.deletion_timeout)
            .field("root_table", &self.root_table)
            .finish_non_exhaustive()
    }
}

struct Inner {
    store: Arc<dyn ObjectStore>,
    scheduler: Scheduler,
    roots: RootRegistry,
    buffer: DeletionBuffer,
    create: Arc<CreateEngine>,
    delete: Arc<DeleteEngine>,
    scanner: Scanner,
    state: Mutex<EngineState>,
    scan_states: Mutex<HashMap<StoreId, ScanState>>,
    table_path: Option<PathBuf>,
    table: Mutex<RootTable>,
}

/// The reconciliation orchestrator.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> Result<Self> {
        let scheduler = Scheduler::new(config.clock);
        let roots = RootRegistry::new();
        let buffer = DeletionBuffer::new(
            store.clone(),
            roots.clone(),
            scheduler.clone(),
            config.deletion_timeout,
        );
        let hasher = Arc::new(HashQueue::with_config(
            store.clone(),
            scheduler.clone(),
            config.hash_workers,
            config.hash_queue_capacity,
        ));
        let executor = Executor::new(store.clone(), buffer.clone(), hasher, scheduler.clone());
        let filter = IgnoreFilter::new();
        let create = Arc::new(CreateEngine::new(store.clone(), filter, executor));
        let delete = Arc::new(DeleteEngine::new(store.clone(), buffer.clone(), filter));
        let scanner = Scanner::new(
            store.clone(),
            create.clone(),
            delete.clone(),
            buffer.clone(),
            filter,
        );

        let table = match &config.root_table {
            Some(path) => RootTable::load_or_default(path)?,
            None => RootTable::new(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                scheduler,
                roots,
                buffer,
                create,
                delete,
                scanner,
                state: Mutex::new(EngineState::Active),
                scan_states: Mutex::new(HashMap::new()),
                table_path: config.root_table,
                table: Mutex::new(table),
            }),
        })
    }

    /// A path might have been created or modified.
    ///
    /// Unexpected failures never propagate to the notifier: they are
    /// logged, the transaction rolls back, and the affected root gets a
    /// full rescan.
    pub fn might_create(&self, path: &Path) -> Decision {
        if self.state() == EngineState::Paused {
            return Decision::Ignored;
        }
        let Some(root) = self.inner.roots.by_path(path) else {
            trace!(path = %path.display(), "no root owns this path");
            return Decision::Ignored;
        };
        let Ok(pair) = PathPair::under_root(root.anchor(), path) else {
            // Invalid encoding; unrepresentable names never reach the store.
            return Decision::Ignored;
        };

        let mut tx = self.inner.store.begin();
        let decision = match self.inner.create.handle(&mut tx, &root, &pair) {
            Ok(decision) => match tx.commit() {
                Ok(()) => decision,
                Err(e) => {
                    warn!(path = %pair.logical(), error = %e, "commit failed, escalating to rescan");
                    self.request_scan(root.store(), LogicalPath::root());
                    return Decision::Ignored;
                }
            },
            Err(e) if e.is_benign() => {
                drop(tx);
                return Decision::Ignored;
            }
            Err(e) => {
                drop(tx);
                warn!(path = %pair.logical(), error = %e, "reconciliation failed, escalating to rescan");
                self.request_scan(root.store(), LogicalPath::root());
                return Decision::Ignored;
            }
        };

        if decision == Decision::NewOrReplacedFolder {
            // Child events may have raced ahead of watch registration.
            self.request_scan_for_path(path);
        }
        decision
    }

    /// A path might have been deleted.
    pub fn might_delete(&self, path: &Path) {
        if self.state() == EngineState::Paused {
            return;
        }
        let Some(root) = self.inner.roots.by_path(path) else {
            return;
        };
        let Ok(pair) = PathPair::under_root(root.anchor(), path) else {
            return;
        };
        self.inner.delete.handle(&root, &pair);
    }

    /// Link a store to an anchor path, creating the store on first link,
    /// persisting the root table, and scheduling the initial scan.
    ///
    /// Returns once the root is registered, so the caller can install its
    /// watch before any event can be missed.
    pub fn link_root(&self, store_id: StoreId, anchor: &Path) -> Result<Arc<Root>> {
        let mut tx = self.inner.store.begin();
        if !self.inner.store.has_store(store_id) {
            self.inner.store.create_store(&mut tx, store_id)?;
        }
        let root = self.inner.roots.link(&mut tx, store_id, anchor)?;
        tx.commit()?;

        self.persist_table(|table| table.add(store_id, root.anchor().to_path_buf()))?;
        info!(store = %store_id, anchor = %root.anchor().display(), "root linked");

        self.request_scan(store_id, LogicalPath::root());
        Ok(root)
    }

    /// Unlink a store's root. Logical objects are kept; only the physical
    /// binding goes away.
    pub fn unlink_root(&self, store_id: StoreId) -> Result<()> {
        let mut tx = self.inner.store.begin();
        self.inner.roots.unlink(&mut tx, store_id)?;
        tx.commit()?;

        self.persist_table(|table| {
            table.remove(store_id);
        })?;
        self.inner.scan_states.lock().remove(&store_id);
        Ok(())
    }

    /// Re-link every root recorded in the persisted table.
    ///
    /// Tolerates partially applied state from a previous crash: anchors
    /// that no longer exist are skipped with a warning and left for the
    /// operator, everything else is re-linked and rescanned.
    pub fn recover(&self) -> Result<usize> {
        let entries: Vec<_> = self.inner.table.lock().entries().to_vec();
        let mut recovered = 0;

        for entry in entries {
            let store_id = StoreId(entry.store);
            if self.inner.roots.get(store_id).is_some() {
                continue;
            }
            match self.link_root(store_id, &entry.path) {
                Ok(_) => recovered += 1,
                Err(e) => {
                    warn!(store = %store_id, path = %entry.path.display(), error = %e,
                        "could not recover root");
                }
            }
        }
        Ok(recovered)
    }

    /// Stop reacting to observations.
    pub fn pause(&self) {
        *self.inner.state.lock() = EngineState::Paused;
        info!("engine paused");
    }

    /// Resume and rescan every root; events were dropped while paused.
    pub fn resume(&self) {
        *self.inner.state.lock() = EngineState::Active;
        info!("engine resumed, rescanning all roots");
        for root in self.inner.roots.list() {
            self.request_scan(root.store(), LogicalPath::root());
        }
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock()
    }

    /// Queue a full rescan of one root.
    pub fn request_rescan(&self, store_id: StoreId) {
        self.request_scan(store_id, LogicalPath::root());
    }

    /// Drive the scheduler until no task is ready. Returns the number of
    /// tasks executed.
    pub fn run_until_idle(&self) -> usize {
        self.inner.scheduler.run_until_idle()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn roots(&self) -> &RootRegistry {
        &self.inner.roots
    }

    pub fn deletion_buffer(&self) -> &DeletionBuffer {
        &self.inner.buffer
    }

    /// Queue a scan of the subtree at a physical path, routed to the
    /// deepest root owning it (an anchor's subtree belongs to its mounted
    /// store's root).
    fn request_scan_for_path(&self, path: &Path) {
        let Some(root) = self.inner.roots.by_path(path) else {
            return;
        };
        let Ok(pair) = PathPair::under_root(root.anchor(), path) else {
            return;
        };
        self.request_scan(root.store(), pair.logical().clone());
    }

    fn request_scan(&self, store_id: StoreId, path: LogicalPath) {
        let mut states = self.inner.scan_states.lock();
        let state = states.entry(store_id).or_insert(ScanState::Idle);
        match state {
            ScanState::Scanning { remaining } => {
                if !remaining.contains(&path) {
                    remaining.push_back(path);
                }
            }
            ScanState::Idle => {
                *state = ScanState::Scanning {
                    remaining: VecDeque::from([path]),
                };
                let this = self.clone();
                self.inner
                    .scheduler
                    .schedule(move || this.run_scans(store_id));
            }
        }
    }

    /// Work through one root's scan queue; chained, not fanned out, so
    /// multiple roots proceed sequentially on the scheduler.
    fn run_scans(&self, store_id: StoreId) {
        loop {
            let next = {
                let mut states = self.inner.scan_states.lock();
                match states.get_mut(&store_id) {
                    Some(ScanState::Scanning { remaining }) => remaining.pop_front(),
                    _ => None,
                }
            };
            let Some(path) = next else {
                self.set_idle(store_id);
                return;
            };
            let Some(root) = self.inner.roots.get(store_id) else {
                self.set_idle(store_id);
                return;
            };

            match self.inner.scanner.scan(&root, &path) {
                Ok(report) => {
                    debug!(store = %store_id, start = %path, ?report, "scan pass complete");
                }
                Err(e) => {
                    warn!(store = %store_id, start = %path, error = %e,
                        "scan failed, scheduling full rescan");
                    self.set_idle(store_id);
                    let this = self.clone();
                    self.inner.scheduler.schedule_in(SCAN_RETRY_DELAY, move || {
                        this.request_scan(store_id, LogicalPath::root());
                    });
                    return;
                }
            }
        }
    }

    fn set_idle(&self, store_id: StoreId) {
        self.inner
            .scan_states
            .lock()
            .insert(store_id, ScanState::Idle);
    }

    fn persist_table(&self, mutate: impl FnOnce(&mut RootTable)) -> Result<()> {
        let mut table = self.inner.table.lock();
        mutate(&mut table);
        if let Some(path) = &self.inner.table_path {
            table.save(path)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("roots", &self.inner.roots)
            .finish_non_exhaustive()
    }
}
