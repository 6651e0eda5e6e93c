//! Main-Thread Task Queue
//!
//! Any thread may queue work here; only the thread that created the queue
//! runs it, once per frame, in FIFO order.
//!
//! `run_all` takes the whole pending list before executing anything, so a
//! task queued while a pass is running (including by a task in that pass)
//! runs on the next call.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::CancellationToken;
use crate::error::{TaskError, TaskResult};
use crate::task::{Task, TaskExecutor};

struct MainThreadShared {
    main_thread: ThreadId,
    pending: Mutex<Vec<Task>>,
}

impl TaskExecutor for MainThreadShared {
    fn enqueue(&self, task: Task) {
        self.pending.lock().push(task);
    }
}

/// Queue of tasks bound to the main thread
pub struct MainThreadTaskQueue {
    shared: Arc<MainThreadShared>,
}

impl MainThreadTaskQueue {
    /// Create a queue owned by the calling thread
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MainThreadShared {
                main_thread: thread::current().id(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Executor handle that routes tasks into this queue
    pub fn executor(&self) -> Arc<dyn TaskExecutor> {
        self.shared.clone()
    }

    /// Create a main-thread task without starting it
    pub fn task<F>(&self, name: impl Into<String>, f: F) -> Task
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        Task::from_fn(name, self.executor(), f)
    }

    /// Create and start a main-thread task
    pub fn spawn<F>(&self, name: impl Into<String>, f: F) -> Task
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        Task::start_new(self.task(name, f))
    }

    /// Check if the caller is the owning thread
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.main_thread
    }

    /// Get pending task count
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Execute everything queued so far; returns how many tasks ran
    pub fn run_all(&self, dt: Duration) -> Result<usize, TaskError> {
        if !self.is_main_thread() {
            tracing::warn!("MainThreadTaskQueue::run_all called off the main thread");
            return Err(TaskError::NotMainThread);
        }

        let batch = mem::take(&mut *self.shared.pending.lock());
        if !batch.is_empty() {
            tracing::trace!(tasks = batch.len(), dt = ?dt, "running main-thread tasks");
        }
        for task in &batch {
            task.execute();
        }
        Ok(batch.len())
    }
}

impl Default for MainThreadTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MainThreadTaskQueue {
    fn drop(&mut self) {
        // Queued tasks hold the shared state alive; break the cycle
        let abandoned = mem::take(&mut *self.shared.pending.lock());
        if !abandoned.is_empty() {
            tracing::debug!("Dropping {} unexecuted main-thread tasks", abandoned.len());
        }
    }
}

impl fmt::Debug for MainThreadTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadTaskQueue")
            .field("main_thread", &self.shared.main_thread)
            .field("pending", &self.pending_tasks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_run_all_is_fifo() {
        let queue = MainThreadTaskQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.spawn(format!("step-{i}"), move |_: &CancellationToken| {
                order.lock().push(i);
                Ok(())
            });
        }

        assert_eq!(queue.run_all(FRAME).unwrap(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.pending_tasks(), 0);
    }

    #[test]
    fn test_tasks_queued_during_pass_wait_for_next_frame() {
        let queue = Arc::new(MainThreadTaskQueue::new());
        let executor = queue.executor();

        let follow_up = Task::from_fn("follow-up", executor.clone(), |_: &CancellationToken| Ok(()));
        let trigger_follow_up = follow_up.clone();
        queue.spawn("trigger", move |_: &CancellationToken| {
            trigger_follow_up.start();
            Ok(())
        });

        assert_eq!(queue.run_all(FRAME).unwrap(), 1);
        assert!(follow_up.is_queued());

        assert_eq!(queue.run_all(FRAME).unwrap(), 1);
        assert!(follow_up.is_finished());
    }

    #[test]
    fn test_run_all_rejects_other_threads() {
        let queue = Arc::new(MainThreadTaskQueue::new());
        let task = queue.spawn("ui", |_: &CancellationToken| Ok(()));

        let remote = Arc::clone(&queue);
        let result = thread::spawn(move || remote.run_all(FRAME)).join().unwrap();

        assert!(matches!(result, Err(TaskError::NotMainThread)));
        assert!(task.is_queued());
    }
}
