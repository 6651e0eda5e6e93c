//! fOS Streaming
//!
//! Residency scheduler for streamable resources (textures, models, ...).
//!
//! Each tick the [`StreamingScheduler`] scans a budgeted slice of the
//! registered resources, asks each resource's [`StreamingHandler`] what
//! residency it should have, and starts a streaming [`Task`](fos_task::Task)
//! for every resource that needs to change.
//!
//! # Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use fos_streaming::{RampHandler, StreamingConfig, StreamingScheduler};
//!
//! let scheduler = Arc::new(StreamingScheduler::new(StreamingConfig::default()));
//! let handler = Arc::new(RampHandler::new(1, |res| res.max_residency()));
//! let id = scheduler.start_streaming(&texture, handler, true);
//!
//! // once per frame
//! scheduler.schedule_update(pool.executor());
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod resource;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::StreamingConfig;
pub use error::StreamingError;
pub use resource::{RampHandler, ResourceId, StreamableResource, StreamingHandler};
pub use scheduler::{ResourceInfo, StreamingScheduler, TickReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
