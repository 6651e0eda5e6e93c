//! fOS Task System
//!
//! Cancelable, chainable units of work and the executors that run them.
//!
//! # Components
//! - [`AtomicState`] / [`AtomicCounter`]: lock-free state words
//! - [`ConcurrentQueue`]: MPMC queue feeding the workers
//! - [`Task`]: reference-counted task handle with an atomic lifecycle
//! - [`ThreadPool`]: fixed worker pool draining one shared queue
//! - [`MainThreadTaskQueue`]: tasks drained once per frame on the main thread
//!
//! # Example
//! ```rust,ignore
//! use fos_task::{PoolConfig, ThreadPool};
//!
//! let pool = ThreadPool::new(&PoolConfig::default())?;
//! let load = pool.task("load", |_cancel| Ok(()));
//! load.continue_with("upload", |_cancel| Ok(()));
//! load.start();
//! load.wait(5.0)?;
//! ```

pub mod atomic;
pub mod cancel;
pub mod config;
pub mod error;
pub mod main_thread;
pub mod pool;
pub mod queue;
pub mod task;

pub use atomic::{AtomicCounter, AtomicRepr, AtomicState};
pub use cancel::CancellationToken;
pub use config::{PoolConfig, DEFAULT_CANCEL_TIMEOUT};
pub use error::{PoolError, TaskError, TaskResult};
pub use main_thread::MainThreadTaskQueue;
pub use pool::{default_worker_count, PoolStats, ThreadPool};
pub use queue::ConcurrentQueue;
pub use task::{Task, TaskBody, TaskExecutor, TaskId, TaskState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
