//! Asynchronous content hashing.
//!
//! Hashing is the only work heavy enough to leave the engine thread. A
//! small worker pool drains a bounded queue; when the queue is full the
//! submitting thread hashes inline: deliberate backpressure, preserved
//! even though it can stall the cooperative scheduler under sustained load,
//! because changing the blocking behavior changes system-wide latency
//! guarantees.
//!
//! At most one request is live per SOID: an identical resubmission is a
//! no-op, a different one supersedes and aborts its predecessor, and a
//! request whose owning transaction rolls back is aborted too. Workers
//! never touch engine state directly; results come back as a scheduled
//! callback that re-validates everything under a fresh transaction.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use mirror_fs::hash_file_bounded;
use mirror_store::{Branch, ContentAttr, ObjectStore, Soid, Transaction, TxOutcome};

use crate::scheduler::Scheduler;

const WORKER_COUNT: usize = 2;
const QUEUE_CAPACITY: usize = 32;

/// A content-hash request for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRequest {
    pub soid: Soid,
    /// Physical path observed for the object
    pub path: PathBuf,
    /// Length observed when the request was issued
    pub length: u64,
    /// Modification time observed when the request was issued
    pub mtime: SystemTime,
    /// Master content attributes on record when the request was issued
    pub prior: Option<ContentAttr>,
}

struct LiveRequest {
    request: HashRequest,
    abort: Arc<AtomicBool>,
}

struct Job {
    request: HashRequest,
    abort: Arc<AtomicBool>,
}

/// How a submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Queued for a worker
    Enqueued,
    /// Identical request already in flight; nothing to do
    Duplicate,
    /// Queue full; hashed inline on the submitting thread
    RanInline,
    /// Workers are gone (shutdown); request dropped
    Dropped,
}

/// De-duplicating bounded hash queue.
pub struct HashQueue {
    live: Arc<DashMap<Soid, LiveRequest>>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Scheduler,
    store: Arc<dyn ObjectStore>,
}

impl HashQueue {
    pub fn new(store: Arc<dyn ObjectStore>, scheduler: Scheduler) -> Self {
        Self::with_config(store, scheduler, WORKER_COUNT, QUEUE_CAPACITY)
    }

    /// Configurable variant; `workers == 0` leaves jobs in the queue, which
    /// tests use to control timing.
    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        scheduler: Scheduler,
        workers: usize,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = bounded::<Job>(capacity);
        let live: Arc<DashMap<Soid, LiveRequest>> = Arc::new(DashMap::new());

        let handles = (0..workers)
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                let live = live.clone();
                let store = store.clone();
                let scheduler = scheduler.clone();
                std::thread::Builder::new()
                    .name(format!("mirror-hash-{i}"))
                    .spawn(move || {
                        for job in receiver {
                            run_job(job, &live, &store, &scheduler);
                        }
                    })
                    .expect("failed to spawn hash worker")
            })
            .collect();

        Self {
            live,
            sender: Some(sender),
            workers: handles,
            scheduler,
            store,
        }
    }

    /// Submit a request within an open transaction.
    ///
    /// The request is bound to the transaction: if it rolls back, the
    /// request aborts before it can write anything.
    pub fn request(&self, tx: &mut Transaction, request: HashRequest) -> Submission {
        let soid = request.soid;
        let abort = Arc::new(AtomicBool::new(false));

        match self.live.entry(soid) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().request == request {
                    trace!(%soid, "identical hash request already in flight");
                    return Submission::Duplicate;
                }
                // A newer observation supersedes the stale request.
                occupied.get().abort.store(true, Ordering::Relaxed);
                trace!(%soid, "superseding stale hash request");
                occupied.insert(LiveRequest {
                    request: request.clone(),
                    abort: abort.clone(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(LiveRequest {
                    request: request.clone(),
                    abort: abort.clone(),
                });
            }
        }

        let live = self.live.clone();
        let tx_abort = abort.clone();
        tx.on_outcome(move |outcome| {
            if outcome == TxOutcome::Aborted {
                tx_abort.store(true, Ordering::Relaxed);
                live.remove_if(&soid, |_, entry| Arc::ptr_eq(&entry.abort, &tx_abort));
            }
        });

        let Some(sender) = &self.sender else {
            self.live
                .remove_if(&soid, |_, entry| Arc::ptr_eq(&entry.abort, &abort));
            return Submission::Dropped;
        };

        match sender.try_send(Job { request, abort }) {
            Ok(()) => Submission::Enqueued,
            Err(TrySendError::Full(job)) => {
                // Backpressure valve: hash on the submitting thread.
                run_job(job, &self.live, &self.store, &self.scheduler);
                Submission::RanInline
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!(%soid, "hash queue is shut down, dropping request");
                self.live
                    .remove_if(&soid, |_, entry| Arc::ptr_eq(&entry.abort, &job.abort));
                Submission::Dropped
            }
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.live.len()
    }
}

impl Drop for HashQueue {
    fn drop(&mut self) {
        for entry in self.live.iter() {
            entry.abort.store(true, Ordering::Relaxed);
        }
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for HashQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashQueue")
            .field("in_flight", &self.live.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Hash one file and hand the result back to the scheduler.
///
/// Any failure (abort, length mismatch, I/O) silently drops the request;
/// the file is hashed again on the next relevant notification.
fn run_job(
    job: Job,
    live: &Arc<DashMap<Soid, LiveRequest>>,
    store: &Arc<dyn ObjectStore>,
    scheduler: &Scheduler,
) {
    let Job { request, abort } = job;
    let soid = request.soid;

    match hash_file_bounded(&request.path, request.length, &abort) {
        Ok(hash) => {
            let live = live.clone();
            let store = store.clone();
            scheduler.schedule(move || {
                live.remove_if(&soid, |_, entry| Arc::ptr_eq(&entry.abort, &abort));
                if abort.load(Ordering::Relaxed) {
                    return;
                }
                complete(&store, request, hash);
            });
        }
        Err(e) => {
            trace!(%soid, error = %e, "hash request dropped");
            live.remove_if(&soid, |_, entry| Arc::ptr_eq(&entry.abort, &abort));
        }
    }
}

/// Apply a finished hash under a fresh transaction.
fn complete(store: &Arc<dyn ObjectStore>, request: HashRequest, hash: mirror_fs::ContentHash) {
    // Re-validate: logical attributes unchanged since the request...
    if store.content(request.soid, Branch::MASTER) != request.prior {
        trace!(soid = %request.soid, "content attributes moved, dropping hash result");
        return;
    }
    // ...and so is the physical file.
    let Ok(metadata) = std::fs::symlink_metadata(&request.path) else {
        return;
    };
    if metadata.is_dir()
        || metadata.len() != request.length
        || metadata.modified().ok() != Some(request.mtime)
    {
        trace!(soid = %request.soid, "physical file moved on, dropping hash result");
        return;
    }

    // Same bytes, newer timestamp: record metadata without a version bump.
    let touch_only = request
        .prior
        .as_ref()
        .is_some_and(|prior| prior.hash.as_ref() == Some(&hash));

    let attr = ContentAttr {
        length: request.length,
        mtime: request.mtime,
        hash: Some(hash),
    };

    let mut tx = store.begin();
    match store
        .set_content(&mut tx, request.soid, Branch::MASTER, attr, !touch_only)
        .and_then(|()| tx.commit())
    {
        Ok(()) => debug!(soid = %request.soid, touch_only, "content hash recorded"),
        Err(e) => warn!(soid = %request.soid, error = %e, "failed to record content hash"),
    }
}
