//! Background worker pool: a single worker draining a task channel,
//! exposing `submit`/`wait_for_all`/`shutdown` over `crossbeam::channel`
//! rather than a stored write-back callback — a dedicated channel from
//! worker to API is easier to reason about than a callback slot set at
//! construction time.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    pending: AtomicUsize,
    idle: Mutex<()>,
    idle_cv: Condvar,
}

/// Single-worker pool performing packing, SSTable writes, and SSTable
/// erases off the caller's thread. Tasks run in submission order, so
/// flush and compaction stay serialized relative to each other.
pub struct WorkerPool {
    sender: Option<crossbeam::channel::Sender<Task>>,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam::channel::unbounded::<Task>();
        let shared = Arc::new(Shared { pending: AtomicUsize::new(0), idle: Mutex::new(()), idle_cv: Condvar::new() });
        let worker_shared = shared.clone();
        let handle = std::thread::spawn(move || {
            for task in receiver {
                task();
                if worker_shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    let _guard = worker_shared.idle.lock();
                    worker_shared.idle_cv.notify_all();
                }
            }
        });
        Self { sender: Some(sender), shared, handle: Some(handle) }
    }

    /// Enqueues `task`; runs on the worker thread once prior tasks finish.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(task));
        }
    }

    /// Blocks until every task submitted before this call has completed.
    pub fn wait_for_all(&self) {
        let mut guard = self.shared.idle.lock();
        while self.shared.pending.load(Ordering::SeqCst) != 0 {
            self.shared.idle_cv.wait(&mut guard);
        }
    }

    /// Closes the task channel and joins the worker once it drains —
    /// every already-submitted task still runs to completion; there is no
    /// cooperative cancellation.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn wait_for_all_observes_submitted_work() {
        let pool = WorkerPool::new();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_for_all();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn shutdown_drains_pending_tasks() {
        let mut pool = WorkerPool::new();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
