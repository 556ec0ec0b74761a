// src/pool.rs

//! Bounded worker pool
//!
//! Each submitted task runs on its own scoped thread, but at most
//! `max_workers` tasks hold a slot (and therefore execute) at once.
//! Tasks are fire-and-forget: results flow back through caller-held
//! state. A shared [`StopSignal`] lets pending tasks abandon execution
//! without running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{Scope, ScopedJoinHandle};
use std::time::Duration;

/// How long a slot waiter sleeps before re-checking the stop signal.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One-shot broadcast flag observed by many tasks. Setting it is
/// idempotent.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Counting semaphore guarding execution slots.
#[derive(Debug)]
struct Slots {
    available: Mutex<usize>,
    cvar: Condvar,
}

impl Slots {
    fn new(count: usize) -> Self {
        Self {
            available: Mutex::new(count),
            cvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock().unwrap();
        while *available == 0 {
            available = self.cvar.wait(available).unwrap();
        }
        *available -= 1;
    }

    /// Wait for a slot or for the stop signal, whichever comes first.
    /// Returns false when the signal won.
    fn acquire_or_stop(&self, stop: &StopSignal) -> bool {
        let mut available = self.available.lock().unwrap();
        loop {
            if stop.is_set() {
                return false;
            }
            if *available > 0 {
                *available -= 1;
                return true;
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(available, STOP_POLL_INTERVAL)
                .unwrap();
            available = guard;
        }
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap();
        *available += 1;
        self.cvar.notify_one();
    }
}

/// Releases the held slot when the task finishes (or panics).
struct SlotGuard<'a>(&'a Slots);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A pool of scoped worker threads bounded to `max_workers` concurrent
/// tasks. Values below 1 are normalized to 1.
pub struct WorkerPool<'scope, 'env> {
    scope: &'scope Scope<'scope, 'env>,
    slots: Arc<Slots>,
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope, 'env> WorkerPool<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            scope,
            slots: Arc::new(Slots::new(max_workers)),
            handles: Vec::new(),
        }
    }

    /// Submit a task unconditionally: it blocks for a slot and then runs.
    pub fn submit(&mut self, task: impl FnOnce() + Send + 'scope) {
        let slots = Arc::clone(&self.slots);
        self.handles.push(self.scope.spawn(move || {
            slots.acquire();
            let _slot = SlotGuard(&slots);
            task();
        }));
    }

    /// Submit a task that is abandoned if the stop signal fires before it
    /// obtains a slot. The signal is re-checked after slot acquisition so
    /// a task never starts once the signal is set.
    pub fn submit_with_stop(
        &mut self,
        task: impl FnOnce() + Send + 'scope,
        stop: &StopSignal,
    ) {
        let slots = Arc::clone(&self.slots);
        let stop = stop.clone();
        self.handles.push(self.scope.spawn(move || {
            if !slots.acquire_or_stop(&stop) {
                return;
            }
            let _slot = SlotGuard(&slots);
            if stop.is_set() {
                return;
            }
            task();
        }));
    }

    /// Block until every submitted task has run or been abandoned.
    pub fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
