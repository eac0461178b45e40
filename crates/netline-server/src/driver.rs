//! Scheduled executor driving session ticks at a fixed cadence.
//!
//! A fixed-size pool of worker threads repeatedly scans a shared task table
//! for entries whose next-due instant has passed, ticks at most one such
//! entry per thread at a time, and reschedules it. A task's tick closure
//! returns an `i32` status: `-1` cancels it (its slot and owner are
//! dropped), anything else reschedules it one period out. The `in_flight`
//! flag, checked and set while the table is locked but held across the tick
//! call itself, guarantees at most one concurrent invocation of any given
//! task while still letting other workers pick up other due tasks.
//!
//! Grounded in the same thread-plus-shutdown-flag shape used by background
//! pollers elsewhere in the ecosystem: a shared `AtomicBool` stop signal, a
//! `JoinHandle` per thread, joined on `stop()`.
#![allow(
    clippy::expect_used,
    reason = "lock().expect() on our own task table, poisoned only if a worker thread already \
              panicked while holding it, which this pool treats as fatal"
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use netline_core::Environment;

/// How often an idle worker thread re-checks the task table when nothing is
/// currently due.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Default periodic tick delay for a scheduled task, per the reference
/// design.
pub const DEFAULT_TICK_DELAY: Duration = Duration::from_millis(50);

type TickFn = Box<dyn FnMut() -> i32 + Send>;

struct TaskEntry {
    task: Option<TickFn>,
    period: Duration,
    due: Instant,
    in_flight: bool,
}

struct Shared {
    tasks: Mutex<HashMap<u64, TaskEntry>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

/// A fixed-size scheduled executor. Constructed lazily by
/// [`crate::server::ProxyServer::start`] and torn down by `stop`, draining
/// whatever tick is currently in flight on each worker before returning.
pub struct WorkerPool<E: Environment> {
    pool_size: usize,
    env: Arc<E>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl<E: Environment> WorkerPool<E> {
    /// A pool with `pool_size` worker threads, none spawned yet.
    #[must_use]
    pub fn new(pool_size: usize, env: Arc<E>) -> Self {
        Self {
            pool_size,
            env,
            shared: Arc::new(Shared {
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
            workers: Vec::new(),
        }
    }

    /// Spawn the pool's worker threads. Idempotent: calling `start` again
    /// while already started is a no-op.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        self.shared.shutdown.store(false, Ordering::Release);
        for _ in 0..self.pool_size {
            let shared = Arc::clone(&self.shared);
            let env = Arc::clone(&self.env);
            self.workers.push(thread::spawn(move || worker_loop(shared, env)));
        }
    }

    /// Signal shutdown and join every worker thread, draining whichever
    /// task each was mid-tick on.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Register `task`, first due after `initial_delay` and thereafter every
    /// `period`. Returns a handle id, unused today but kept symmetrical with
    /// the reference design's scheduling call.
    pub fn schedule(&self, initial_delay: Duration, period: Duration, task: impl FnMut() -> i32 + Send + 'static) -> u64 {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let due = self.env.now() + initial_delay;
        let mut tasks = self.shared.tasks.lock().expect("worker pool task table poisoned");
        tasks.insert(id, TaskEntry { task: Some(Box::new(task)), period, due, in_flight: false });
        id
    }

    /// Number of tasks currently registered (ticking or awaiting their next
    /// due instant).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.tasks.lock().expect("worker pool task table poisoned").len()
    }

    /// Whether no tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Environment> Drop for WorkerPool<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<E: Environment>(shared: Arc<Shared>, env: Arc<E>) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let picked = {
            let mut tasks = shared.tasks.lock().expect("worker pool task table poisoned");
            let now = env.now();
            let due_id =
                tasks.iter().find(|(_, entry)| !entry.in_flight && entry.due <= now).map(|(id, _)| *id);
            due_id.and_then(|id| {
                let entry = tasks.get_mut(&id).expect("id came from this same table");
                entry.in_flight = true;
                entry.task.take().map(|task| (id, task))
            })
        };

        match picked {
            Some((id, mut task)) => {
                let status = task();
                let mut tasks = shared.tasks.lock().expect("worker pool task table poisoned");
                if status == -1 {
                    tasks.remove(&id);
                } else if let Some(entry) = tasks.get_mut(&id) {
                    entry.due = env.now() + entry.period;
                    entry.task = Some(task);
                    entry.in_flight = false;
                }
            },
            None => env.sleep(IDLE_POLL_INTERVAL),
        }
    }
}
