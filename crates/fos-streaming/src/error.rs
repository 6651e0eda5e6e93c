//! Streaming errors

use fos_task::TaskError;

use crate::resource::ResourceId;

/// Streaming error
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("Resource {0} is not registered for streaming")]
    UnknownResource(ResourceId),

    #[error("Streaming task error: {0}")]
    Task(#[from] TaskError),
}
