//! Single-threaded cooperative scheduler.
//!
//! All engine mutation funnels through one logical thread: tasks queue here
//! and run when the owner drains the scheduler. Hash workers and other
//! threads only ever *post* tasks. Delayed tasks (deletion-buffer sweeps,
//! deferred marker fixes) sit in a deadline-ordered heap driven by a
//! [`Clock`], which tests can replace with a manually advanced one.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

type Task = Box<dyn FnOnce() + Send>;

/// Time source for the scheduler.
///
/// The system clock is the normal mode; the manual clock only moves when
/// [`Clock::advance`] is called, which makes timeout behavior deterministic
/// under test.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

enum ClockInner {
    System,
    Manual(Mutex<Instant>),
}

impl Clock {
    pub fn system() -> Self {
        Self {
            inner: Arc::new(ClockInner::System),
        }
    }

    /// A clock that only moves via [`Clock::advance`].
    pub fn manual() -> Self {
        Self {
            inner: Arc::new(ClockInner::Manual(Mutex::new(Instant::now()))),
        }
    }

    pub fn now(&self) -> Instant {
        match &*self.inner {
            ClockInner::System => Instant::now(),
            ClockInner::Manual(now) => *now.lock(),
        }
    }

    /// Advance a manual clock. Panics on the system clock: advancing real
    /// time is not a thing this crate does.
    pub fn advance(&self, by: Duration) {
        match &*self.inner {
            ClockInner::System => panic!("Clock::advance called on the system clock"),
            ClockInner::Manual(now) => {
                let mut now = now.lock();
                *now += by;
            }
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner {
            ClockInner::System => write!(f, "Clock::System"),
            ClockInner::Manual(now) => write!(f, "Clock::Manual({:?})", *now.lock()),
        }
    }
}

struct Delayed {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Default)]
struct Queues {
    ready: VecDeque<Task>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    seq: u64,
}

/// Cooperative task queue shared by the whole engine.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    queues: Arc<Mutex<Queues>>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(clock: Clock) -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
            clock,
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Queue a task to run on the next drain.
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        self.queues.lock().ready.push_back(Box::new(task));
    }

    /// Queue a task to run once `delay` has elapsed.
    pub fn schedule_in(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let mut queues = self.queues.lock();
        let seq = queues.seq;
        queues.seq += 1;
        queues.delayed.push(Reverse(Delayed {
            due: self.clock.now() + delay,
            seq,
            task: Box::new(task),
        }));
    }

    /// Run queued tasks until nothing is ready, including delayed tasks
    /// whose deadline has passed. Returns the number of tasks executed.
    ///
    /// Tasks run without the queue lock held, so they are free to schedule
    /// more work; that work runs within the same drain if it is ready.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        loop {
            let task = {
                let mut queues = self.queues.lock();
                let now = self.clock.now();
                while let Some(Reverse(head)) = queues.delayed.peek() {
                    if head.due > now {
                        break;
                    }
                    let Reverse(delayed) = queues.delayed.pop().expect("peeked above");
                    queues.ready.push_back(delayed.task);
                }
                queues.ready.pop_front()
            };

            match task {
                Some(task) => {
                    task();
                    executed += 1;
                }
                None => return executed,
            }
        }
    }

    /// Whether any task is queued, ready or delayed.
    pub fn has_pending(&self) -> bool {
        let queues = self.queues.lock();
        !queues.ready.is_empty() || !queues.delayed.is_empty()
    }

    /// Deadline of the earliest delayed task, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queues.lock().delayed.peek().map(|Reverse(d)| d.due)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock();
        f.debug_struct("Scheduler")
            .field("ready", &queues.ready.len())
            .field("delayed", &queues.delayed.len())
            .finish()
    }
}
