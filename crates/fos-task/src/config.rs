//! Task System Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long `Task::cancel` waits for a running body before forcing the
/// Canceled state
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// Thread pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Fixed worker count (None = available parallelism - 1)
    pub worker_count: Option<usize>,

    /// Upper clamp for the derived worker count
    pub max_workers: usize,

    /// Worker thread name prefix
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_workers: 12,
            thread_name_prefix: "fos-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Config with an explicit worker count
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count: Some(worker_count),
            ..Default::default()
        }
    }
}
