//! Buffered, timeout-based deletion.
//!
//! Objects suspected deleted are staged here for a grace period instead of
//! being removed outright: rename storms and scan races routinely report a
//! path gone moments before it reappears elsewhere under the same FID. An
//! entry is only committed once its deadline passes with no holders pinning
//! it, and even then only after the live filesystem confirms the object is
//! really gone.
//!
//! Per-SOID state machine: `Absent → Pending(deadline, holders) →
//! Absent (reinstated) | Deleted (committed)`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use mirror_fs::Fid;
use mirror_store::{ObjectStore, Soid};

use crate::roots::RootRegistry;
use crate::scheduler::Scheduler;

/// Grace period between suspicion and committed deletion.
pub const DEFAULT_DELETION_TIMEOUT: Duration = Duration::from_secs(8);

struct Entry {
    /// Set once at first suspicion; never pushed later.
    deadline: Instant,
    holders: HashSet<u64>,
}

#[derive(Default)]
struct BufferState {
    entries: HashMap<Soid, Entry>,
    sweep_scheduled: bool,
    next_holder: u64,
}

/// The deletion buffer shared by the engines and the scanner.
#[derive(Clone)]
pub struct DeletionBuffer {
    state: Arc<Mutex<BufferState>>,
    store: Arc<dyn ObjectStore>,
    roots: RootRegistry,
    scheduler: Scheduler,
    timeout: Duration,
}

impl DeletionBuffer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        roots: RootRegistry,
        scheduler: Scheduler,
        timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState::default())),
            store,
            roots,
            scheduler,
            timeout,
        }
    }

    /// Stage an object for deletion.
    ///
    /// Re-adding an already pending object keeps its original deadline.
    /// Infallible so callers can treat the add as a commitment point.
    pub fn add(&self, soid: Soid) {
        let mut state = self.state.lock();
        let now = self.scheduler.clock().now();
        let timeout = self.timeout;
        state.entries.entry(soid).or_insert_with(|| {
            trace!(%soid, "staged for deletion");
            Entry {
                deadline: now + timeout,
                holders: HashSet::new(),
            }
        });
        self.ensure_sweep(&mut state);
    }

    /// Reinstate an object: drop its entry unconditionally.
    pub fn remove(&self, soid: Soid) {
        if self.state.lock().entries.remove(&soid).is_some() {
            trace!(%soid, "reinstated from deletion buffer");
        }
    }

    /// Whether an object is currently staged.
    pub fn pending(&self, soid: Soid) -> bool {
        self.state.lock().entries.contains_key(&soid)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Create a holder that can pin entries past their deadline.
    pub fn holder(&self) -> Holder {
        let mut state = self.state.lock();
        let id = state.next_holder;
        state.next_holder += 1;
        Holder {
            id,
            held: HashSet::new(),
            buffer: self.clone(),
        }
    }

    /// Schedule a sweep if entries exist with no holders and none is
    /// already scheduled. Must be called with the state lock held.
    fn ensure_sweep(&self, state: &mut BufferState) {
        if state.sweep_scheduled {
            return;
        }
        let Some(earliest) = state
            .entries
            .values()
            .filter(|entry| entry.holders.is_empty())
            .map(|entry| entry.deadline)
            .min()
        else {
            return;
        };

        state.sweep_scheduled = true;
        let now = self.scheduler.clock().now();
        let delay = earliest.saturating_duration_since(now);
        let buffer = self.clone();
        self.scheduler.schedule_in(delay, move || buffer.sweep());
    }

    /// Commit every zero-holder entry whose deadline has passed, then
    /// reschedule if unswept zero-holder entries remain.
    fn sweep(&self) {
        let now = self.scheduler.clock().now();
        let due: Vec<Soid> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, entry)| entry.holders.is_empty() && entry.deadline <= now)
                .map(|(&soid, _)| soid)
                .collect()
        };

        for soid in due {
            // Entry may have been reinstated while we were sweeping others.
            if self.state.lock().entries.remove(&soid).is_none() {
                continue;
            }
            self.commit_delete(soid);
        }

        let mut state = self.state.lock();
        state.sweep_scheduled = false;
        self.ensure_sweep(&mut state);
    }

    /// Final re-validation against the live filesystem, then the delete.
    fn commit_delete(&self, soid: Soid) {
        let Ok(attr) = self.store.attributes(soid) else {
            return; // already gone from the logical store
        };
        let Some(root) = self.roots.get(soid.store) else {
            return; // root unlinked while the entry was pending
        };
        let Ok(path) = self.store.path_of(soid) else {
            return;
        };

        let physical = root.physical(&path);
        if let Ok(metadata) = std::fs::symlink_metadata(&physical)
            && attr.otype.matches_physical(metadata.is_dir())
            && attr.fid.is_some()
            && Fid::from_metadata(&metadata).ok() == attr.fid
        {
            // The object is demonstrably still there. Losing track of live
            // content is worse than a late delete, so drop the entry and
            // let the next scan re-derive the truth.
            warn!(%soid, path = %physical.display(), "suspected deletion no longer holds, aborting");
            return;
        }

        let mut tx = self.store.begin();
        match self
            .store
            .remove_object(&mut tx, soid)
            .and_then(|()| tx.commit())
        {
            Ok(()) => debug!(%soid, "committed buffered deletion"),
            Err(e) => warn!(%soid, error = %e, "buffered deletion failed"),
        }
    }
}

impl std::fmt::Debug for DeletionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionBuffer")
            .field("entries", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Pins pending entries so a sweep cannot commit them.
///
/// A recursive scan holds every object it provisionally suspects gone until
/// the walk finishes; only then do the survivors become eligible. Dropping
/// a holder releases its pins.
pub struct Holder {
    id: u64,
    held: HashSet<Soid>,
    buffer: DeletionBuffer,
}

impl Holder {
    /// Pin a pending entry. Holding an object that is not pending is a
    /// no-op.
    pub fn hold(&mut self, soid: Soid) {
        let mut state = self.buffer.state.lock();
        if let Some(entry) = state.entries.get_mut(&soid) {
            entry.holders.insert(self.id);
            self.held.insert(soid);
        }
    }

    /// Unpin all held entries; any past-deadline entry that reaches zero
    /// holders becomes eligible on the next sweep.
    pub fn release_all(&mut self) {
        let mut state = self.buffer.state.lock();
        for soid in self.held.drain() {
            if let Some(entry) = state.entries.get_mut(&soid) {
                entry.holders.remove(&self.id);
            }
        }
        self.buffer.ensure_sweep(&mut state);
    }

    /// Drop (not just unpin) all held entries. Used on scan failure: the
    /// retry path re-adds whatever is still actually missing.
    pub fn remove_all(&mut self) {
        let mut state = self.buffer.state.lock();
        for soid in self.held.drain() {
            state.entries.remove(&soid);
        }
    }

    /// Number of entries this holder currently pins.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl Drop for Holder {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.release_all();
        }
    }
}
