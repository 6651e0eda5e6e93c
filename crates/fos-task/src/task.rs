//! Task
//!
//! Reference-counted, cancelable unit of work with an atomic lifecycle.
//!
//! Lifecycle: `Created -> Queued -> Running -> Finished | Failed`, with
//! `Canceled` reachable from any non-terminal state. Terminal states are
//! never left. Producers only touch a task through `start`, `cancel`,
//! `wait` and chain building; the executor that dequeues a task calls
//! `execute` exactly once.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::atomic::{AtomicCounter, AtomicRepr, AtomicState};
use crate::cancel::CancellationToken;
use crate::config::DEFAULT_CANCEL_TIMEOUT;
use crate::error::{TaskError, TaskResult};

/// Task ID counter
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Raw value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TaskState {
    /// Built, not yet started
    Created = 0,
    /// Handed to an executor
    Queued = 1,
    /// Body is executing
    Running = 2,
    /// Body succeeded
    Finished = 3,
    /// Body failed, or a predecessor in the chain failed
    Failed = 4,
    /// Cancellation reached this task
    Canceled = 5,
}

impl TaskState {
    /// Get state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Check if terminal
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }
}

impl AtomicRepr for TaskState {
    fn into_raw(self) -> u32 {
        self as u32
    }

    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Finished,
            4 => Self::Failed,
            5 => Self::Canceled,
            _ => unreachable!("invalid task state word {raw}"),
        }
    }
}

/// Destination for started tasks
///
/// `enqueue` is called once per task, right after it moves to Queued. The
/// executor must eventually call [`Task::execute`] on it, or drop it.
pub trait TaskExecutor: Send + Sync {
    /// Accept a queued task
    fn enqueue(&self, task: Task);
}

/// The work a task performs
///
/// Bodies should poll the token when they run for long and return early
/// once it reports cancellation.
pub trait TaskBody: Send + 'static {
    /// Run to completion; `Err` marks the task Failed
    fn run(self: Box<Self>, cancel: &CancellationToken) -> TaskResult;
}

impl<F> TaskBody for F
where
    F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
{
    fn run(self: Box<Self>, cancel: &CancellationToken) -> TaskResult {
        (*self)(cancel)
    }
}

struct TaskInner {
    id: TaskId,
    name: Arc<str>,
    state: AtomicState<TaskState>,
    /// > 0 once cancellation was requested
    cancel_flag: Arc<AtomicCounter>,
    executor: Arc<dyn TaskExecutor>,
    /// Taken when the body runs or the task ends
    body: Mutex<Option<Box<dyn TaskBody>>>,
    next: Mutex<Option<Task>>,
    failure: Mutex<Option<String>>,
    /// Guards terminal transitions so waiters never miss the wakeup
    signal: Mutex<()>,
    ended: Condvar,
}

/// Shared handle to a task
///
/// Cloning is cheap; the task lives as long as any handle does, including
/// the executor's queue and the predecessor in a chain.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task bound to an executor
    pub fn new(
        name: impl Into<String>,
        executor: Arc<dyn TaskExecutor>,
        body: impl TaskBody,
    ) -> Self {
        let name: String = name.into();
        Self {
            inner: Arc::new(TaskInner {
                id: next_task_id(),
                name: Arc::from(name),
                state: AtomicState::new(TaskState::Created),
                cancel_flag: Arc::new(AtomicCounter::default()),
                executor,
                body: Mutex::new(Some(Box::new(body))),
                next: Mutex::new(None),
                failure: Mutex::new(None),
                signal: Mutex::new(()),
                ended: Condvar::new(),
            }),
        }
    }

    /// Create a task from a closure
    pub fn from_fn<F>(name: impl Into<String>, executor: Arc<dyn TaskExecutor>, f: F) -> Self
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        Self::new(name, executor, f)
    }

    /// Start a task and hand it back
    pub fn start_new(task: Task) -> Task {
        task.start();
        task
    }

    /// Get task ID
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Get task name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.inner.state.load()
    }

    pub fn is_queued(&self) -> bool {
        self.state() == TaskState::Queued
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    pub fn is_failed(&self) -> bool {
        self.state() == TaskState::Failed
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == TaskState::Canceled
    }

    pub fn is_ended(&self) -> bool {
        self.state().is_ended()
    }

    /// Check if cancellation was requested
    pub fn cancel_requested(&self) -> bool {
        self.inner.cancel_flag.read() > 0
    }

    /// Token observing this task's cancel flag
    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken::new(
            Arc::clone(&self.inner.cancel_flag),
            Arc::clone(&self.inner.name),
        )
    }

    /// The task started after this one finishes
    pub fn next_task(&self) -> Option<Task> {
        self.inner.next.lock().clone()
    }

    /// Why the task failed, if it did
    pub fn failure_reason(&self) -> Option<String> {
        self.inner.failure.lock().clone()
    }

    /// Check if both handles point at the same task
    pub fn same_task(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue the task on its executor
    ///
    /// Only a Created task can start; later calls are ignored.
    pub fn start(&self) {
        if !self.inner.state.transition(TaskState::Created, TaskState::Queued) {
            return;
        }
        tracing::trace!(task = %self.name(), id = %self.id(), "task queued");
        self.inner.executor.enqueue(self.clone());
    }

    /// Run the body; called once by the executor that dequeued the task
    ///
    /// # Panics
    /// If the task is not Queued (a task canceled while queued is skipped).
    pub fn execute(&self) {
        if let Err(observed) = self
            .inner
            .state
            .compare_exchange(TaskState::Queued, TaskState::Running)
        {
            assert!(
                observed == TaskState::Canceled,
                "Task '{}' executed while {}; only queued tasks may run",
                self.name(),
                observed.name(),
            );
            return;
        }
        tracing::trace!(task = %self.name(), id = %self.id(), "task running");

        if self.cancel_requested() {
            self.on_cancel();
            return;
        }

        let body = self.inner.body.lock().take();
        let result = match body {
            Some(body) => {
                let token = self.cancellation_token();
                match panic::catch_unwind(AssertUnwindSafe(|| body.run(&token))) {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!("Task '{}' panicked: {}", self.name(), message);
                        Err(TaskError::failed(self.name(), format!("panicked: {message}")))
                    }
                }
            }
            None => Ok(()),
        };

        if self.cancel_requested() {
            self.on_cancel();
            return;
        }

        match result {
            Ok(()) => self.on_finish(),
            Err(err) => self.on_fail(failure_text(err)),
        }
    }

    /// Request cancellation, waiting up to [`DEFAULT_CANCEL_TIMEOUT`] for a
    /// running body
    ///
    /// Returns true for the one caller that performed the cancellation.
    pub fn cancel(&self) -> bool {
        self.cancel_with_timeout(DEFAULT_CANCEL_TIMEOUT)
    }

    /// Request cancellation with a custom bound on the running-body wait
    ///
    /// If the body is still running when the bound elapses the task is
    /// forced to Canceled anyway; the body itself keeps running until it
    /// returns, and its result is discarded.
    pub fn cancel_with_timeout(&self, timeout: Duration) -> bool {
        if self.inner.cancel_flag.increment() != 1 {
            return false;
        }

        if self.is_running() {
            let deadline = Instant::now().checked_add(timeout);
            if self.wait_ended(deadline).is_none() {
                tracing::warn!(
                    "Task '{}' still running after {:?}; forcing cancellation",
                    self.name(),
                    timeout,
                );
            }
        }

        // The rest of the chain is canceled even if this task already ended
        self.finalize(TaskState::Canceled, None);
        self.cancel_chain(timeout);
        true
    }

    /// Block until the task and the rest of its chain finish
    ///
    /// `seconds <= 0` waits forever.
    pub fn wait(&self, seconds: f32) -> TaskResult {
        let timeout = if seconds > 0.0 {
            Duration::try_from_secs_f32(seconds).ok()
        } else {
            None
        };
        self.wait_timeout(timeout)
    }

    /// Block until the task and the rest of its chain finish
    ///
    /// `None` waits forever. Each chained task is waited on with whatever
    /// is left of the budget. A timeout leaves the task untouched.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> TaskResult {
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));

        let mut current = self.clone();
        loop {
            match current.wait_ended(deadline) {
                Some(TaskState::Finished) => match current.next_task() {
                    Some(next) => current = next,
                    None => return Ok(()),
                },
                Some(TaskState::Canceled) => {
                    return Err(TaskError::Canceled {
                        task: current.name().to_string(),
                    });
                }
                Some(_) => {
                    return Err(TaskError::Failed {
                        task: current.name().to_string(),
                        reason: current
                            .failure_reason()
                            .unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                None => {
                    let waited = started.elapsed();
                    tracing::warn!("Task '{}' has timed out after {:?}", current.name(), waited);
                    return Err(TaskError::Timeout {
                        task: current.name().to_string(),
                        waited,
                    });
                }
            }
        }
    }

    /// Append a task to the end of this chain
    ///
    /// Rejects the task itself and anything that would close a cycle. If
    /// the current tail already ended, the appended task follows the
    /// tail's outcome right away.
    pub fn set_next_task(&self, task: Task) -> TaskResult {
        if task.reaches(self) || self.reaches(&task) {
            return Err(TaskError::ChainCycle {
                task: task.name().to_string(),
            });
        }
        self.link_tail(task);
        Ok(())
    }

    /// Create a follow-up task on the same executor and chain it
    pub fn continue_with<F>(&self, name: impl Into<String>, f: F) -> Task
    where
        F: FnOnce(&CancellationToken) -> TaskResult + Send + 'static,
    {
        let next = Task::from_fn(name, Arc::clone(&self.inner.executor), f);
        self.link_tail(next.clone());
        next
    }

    fn reaches(&self, target: &Task) -> bool {
        let mut current = Some(self.clone());
        while let Some(task) = current {
            if task.same_task(target) {
                return true;
            }
            current = task.next_task();
        }
        false
    }

    fn link_tail(&self, task: Task) {
        let mut tail = self.clone();
        loop {
            let following = {
                let mut slot = tail.inner.next.lock();
                match &*slot {
                    Some(following) => following.clone(),
                    None => {
                        *slot = Some(task.clone());
                        break;
                    }
                }
            };
            tail = following;
        }

        match tail.state() {
            TaskState::Finished => task.start(),
            TaskState::Failed => {
                task.on_fail(format!("previous task '{}' in chain failed", tail.name()));
            }
            TaskState::Canceled => {
                task.cancel();
            }
            _ => {}
        }
    }

    fn on_finish(&self) {
        debug_assert!(!self.cancel_requested());
        if !self.finalize(TaskState::Finished, None) {
            return;
        }
        if let Some(next) = self.next_task() {
            next.start();
        }
    }

    fn on_fail(&self, reason: String) {
        if !self.finalize(TaskState::Failed, Some(reason)) {
            return;
        }

        let mut next = self.next_task();
        while let Some(task) = next {
            task.finalize(
                TaskState::Failed,
                Some(format!("previous task '{}' in chain failed", self.name())),
            );
            next = task.next_task();
        }
    }

    fn on_cancel(&self) {
        self.finalize(TaskState::Canceled, None);
        self.cancel_chain(DEFAULT_CANCEL_TIMEOUT);
    }

    fn cancel_chain(&self, timeout: Duration) {
        if let Some(next) = self.next_task() {
            next.cancel_with_timeout(timeout);
        }
    }

    /// Move to a terminal state; false if the task had already ended
    fn finalize(&self, to: TaskState, failure: Option<String>) -> bool {
        {
            let _signal = self.inner.signal.lock();
            let mut current = self.state();
            loop {
                if current.is_ended() {
                    return false;
                }
                match self.inner.state.compare_exchange(current, to) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
            if failure.is_some() {
                *self.inner.failure.lock() = failure;
            }
            self.inner.ended.notify_all();
        }

        // Release whatever the body captured now rather than when the last
        // handle goes away.
        drop(self.inner.body.lock().take());
        tracing::trace!(task = %self.name(), id = %self.id(), state = to.name(), "task ended");
        true
    }

    /// Wait for a terminal state; None on timeout
    fn wait_ended(&self, deadline: Option<Instant>) -> Option<TaskState> {
        let mut signal = self.inner.signal.lock();
        loop {
            let state = self.state();
            if state.is_ended() {
                return Some(state);
            }
            match deadline {
                None => self.inner.ended.wait(&mut signal),
                Some(deadline) => {
                    if self.inner.ended.wait_until(&mut signal, deadline).timed_out() {
                        let state = self.state();
                        return state.is_ended().then_some(state);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("cancel_requested", &self.cancel_requested())
            .finish()
    }
}

fn failure_text(err: TaskError) -> String {
    match err {
        TaskError::Failed { reason, .. } => reason,
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
