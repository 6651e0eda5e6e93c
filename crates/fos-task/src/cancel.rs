//! Cancellation Token
//!
//! Handed to every task body so long-running work can poll for a pending
//! cancellation. Cancellation is cooperative: the token never interrupts a
//! body that does not look at it.

use std::sync::Arc;

use crate::atomic::AtomicCounter;
use crate::error::{TaskError, TaskResult};

/// Read-only view of a task's cancel flag
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicCounter>,
    task: Arc<str>,
}

impl CancellationToken {
    pub(crate) fn new(flag: Arc<AtomicCounter>, task: Arc<str>) -> Self {
        Self { flag, task }
    }

    /// Check if cancellation was requested
    pub fn is_canceled(&self) -> bool {
        self.flag.read() > 0
    }

    /// Bail out of a body with `?` once cancellation was requested
    pub fn check(&self) -> TaskResult {
        if self.is_canceled() {
            Err(TaskError::Canceled {
                task: self.task.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_follows_flag() {
        let flag = Arc::new(AtomicCounter::default());
        let token = CancellationToken::new(Arc::clone(&flag), Arc::from("decode"));

        assert!(!token.is_canceled());
        assert!(token.check().is_ok());

        flag.increment();
        assert!(token.is_canceled());
        assert!(matches!(token.check(), Err(TaskError::Canceled { task }) if task == "decode"));
    }
}
