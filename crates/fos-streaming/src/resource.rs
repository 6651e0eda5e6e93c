//! Streamable Resources
//!
//! A streamable resource can change how much of itself is resident (mip
//! levels of a texture, LODs of a model). A [`StreamingHandler`] decides
//! which residency the resource should have and how far to move towards it
//! in one step.
//!
//! Both traits are called with the scheduler's registry locked; they must
//! not call back into the scheduler.

use std::fmt;

use fos_task::Task;

/// Registry handle for a streaming resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Resource whose residency the scheduler manages
pub trait StreamableResource: Send + Sync {
    /// Highest residency the resource supports
    fn max_residency(&self) -> u32;

    /// Residency currently loaded
    fn current_residency(&self) -> u32;

    /// Whether the resource wants to be considered right now
    fn should_update(&self) -> bool {
        true
    }

    /// Build an unstarted task that moves the resource to `residency`
    ///
    /// `None` means the resource cannot stream right now; it is retried on
    /// its next eligible tick.
    fn create_streaming_task(&self, residency: u32) -> Option<Task>;

    /// Abort any streaming work the resource itself tracks
    fn cancel_streaming_task(&self) {}
}

/// Residency policy for a kind of resource
pub trait StreamingHandler: Send + Sync {
    /// Residency the resource should end up at; must not exceed its max
    fn calculate_residency(&self, resource: &dyn StreamableResource) -> u32;

    /// Residency to request now on the way to `target`; must not exceed
    /// the resource's max
    fn calculate_requested_residency(&self, resource: &dyn StreamableResource, target: u32)
    -> u32;
}

/// Handler that moves residency by at most `step` per request
pub struct RampHandler<F> {
    step: u32,
    target: F,
}

impl<F> RampHandler<F>
where
    F: Fn(&dyn StreamableResource) -> u32 + Send + Sync,
{
    /// Create a ramp towards the residency computed by `target`
    pub fn new(step: u32, target: F) -> Self {
        Self {
            step: step.max(1),
            target,
        }
    }

    /// Max change per request
    pub fn step(&self) -> u32 {
        self.step
    }
}

impl<F> StreamingHandler for RampHandler<F>
where
    F: Fn(&dyn StreamableResource) -> u32 + Send + Sync,
{
    fn calculate_residency(&self, resource: &dyn StreamableResource) -> u32 {
        (self.target)(resource).min(resource.max_residency())
    }

    fn calculate_requested_residency(&self, resource: &dyn StreamableResource, target: u32) -> u32 {
        let current = resource.current_residency();
        if target > current {
            current.saturating_add(self.step).min(target)
        } else {
            current.saturating_sub(self.step).max(target)
        }
    }
}

impl<F> fmt::Debug for RampHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RampHandler")
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}
