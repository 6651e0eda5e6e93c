//! Thread Pool
//!
//! Fixed set of worker threads draining one shared concurrent queue.
//! Idle workers sleep on a condition variable; every enqueue wakes all of
//! them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancellationToken;
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskResult};
use crate::queue::ConcurrentQueue;
use crate::task::{Task, TaskExecutor};

/// Default worker count: available parallelism - 1, clamped to `[1, max]`
pub fn default_worker_count(max_workers: usize) -> usize {
    let cpus = thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(2);
    cpus.saturating_sub(1).clamp(1, max_workers.max(1))
}

/// State shared by the pool handle, its workers and its tasks
struct PoolShared {
    /// Pending tasks
    queue: ConcurrentQueue<Task>,
    /// Global exit flag
    exit: AtomicBool,
    /// Lock paired with `wake`
    sleep: Mutex<()>,
    /// Idle workers sleep here
    wake: Condvar,
    /// Tasks currently executing
    active: AtomicUsize,
    /// Tasks executed since creation
    executed: AtomicU64,
}

impl PoolShared {
    fn new() -> Self {
        Self {
            queue: ConcurrentQueue::new(),
            exit: AtomicBool::new(false),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
            active: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
        }
    }

    fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    fn wake_all(&self) {
        let _sleep = self.sleep.lock();
        self.wake.notify_all();
    }

    fn worker_loop(&self) {
        while !self.is_exiting() {
            if let Some(task) = self.queue.try_pop() {
                self.active.fetch_add(1, Ordering::SeqCst);
                task.execute();
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.executed.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let mut sleep = self.sleep.lock();
            if self.is_exiting() || !self.queue.is_empty() {
                continue;
            }
            self.wake.wait(&mut sleep);
        }
    }
}

impl TaskExecutor for PoolShared {
    fn enqueue(&self, task: Task) {
        if self.is_exiting() {
            tracing::warn!("Thread pool is shut down; abandoning task '{}'", task.name());
            return;
        }
        self.queue.push(task);
        self.wake_all();
    }
}

struct Worker {
    id: usize,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl Worker {
    fn spawn(id: usize, name: String, shared: Arc<PoolShared>) -> Result<Self, PoolError> {
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || shared.worker_loop())?;

        Ok(Self {
            id,
            thread: Some(thread),
        })
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub workers: usize,
    pub pending: usize,
    pub active: usize,
    pub executed: u64,
}

/// Worker thread pool
///
/// Tasks pending at shutdown are abandoned, not canceled: wait on any
/// handle that must complete before shutting the pool down.
pub struct ThreadPool {
    /// Worker threads
    workers: Vec<Worker>,
    /// Queue and wake-up state
    shared: Arc<PoolShared>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ThreadPool {
    /// Create and start the worker threads
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let worker_count = config
            .worker_count
            .unwrap_or_else(|| default_worker_count(config.max_workers))
            .max(1);
        tracing::info!("Creating thread pool with {} workers", worker_count);

        let shared = Arc::new(PoolShared::new());
        let mut pool = Self {
            workers: Vec::with_capacity(worker_count),
            shared,
        };
        for id in 0..worker_count {
            let name = format!("{}-{}", config.thread_name_prefix, id);
            // A partially built pool is shut down by Drop
            let worker = Worker::spawn(id, name, Arc::clone(&pool.shared))?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    /// Executor handle that routes tasks into this pool
    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        self.shared.clone()
    }

    /// Create a pool-bound task without starting it
    pub fn task<F>(&self, name: impl Into<String>, f: F) -> Task
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        Task::from_fn(name, self.executor(), f)
    }

    /// Create and start a pool-bound task
    pub fn spawn<F>(&self, name: impl Into<String>, f: F) -> Task
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        Task::start_new(self.task(name, f))
    }

    /// Get worker count
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Get pending task count
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get active task count
    pub fn active_tasks(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Check if pool is idle
    pub fn is_idle(&self) -> bool {
        self.pending_tasks() == 0 && self.active_tasks() == 0
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.worker_count(),
            pending: self.pending_tasks(),
            active: self.active_tasks(),
            executed: self.shared.executed.load(Ordering::Relaxed),
        }
    }

    /// Stop the workers and join them
    ///
    /// Workers finish the task in hand; queued tasks are dropped unexecuted.
    pub fn shutdown(&mut self) {
        if self.shared.exit.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.wake_all();

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("Thread pool worker {} panicked", worker.id);
                }
            }
        }

        let abandoned = self.shared.queue.clear();
        tracing::info!("Thread pool shut down ({} queued tasks abandoned)", abandoned);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
