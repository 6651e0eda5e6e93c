//! Streaming Scheduler
//!
//! Registry of streaming resources plus the budgeted per-tick update.
//!
//! Every tick walks the registry from a persistent round-robin cursor,
//! visiting each entry at most once and processing at most
//! `max_resources_per_update` eligible ones. A resource is eligible once
//! `update_interval` has passed since it was last processed. Processing
//! asks the resource's handler for a target residency and, when it differs
//! from the loaded one, starts one streaming task towards the residency the
//! handler requests for this step.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fos_task::{Task, TaskExecutor};
use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::config::StreamingConfig;
use crate::error::StreamingError;
use crate::resource::{ResourceId, StreamableResource, StreamingHandler};

/// When a resource was last processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastUpdate {
    /// Due on the next tick
    Never,
    At(Duration),
    /// Canceled; never due until explicitly requested
    Frozen,
}

struct Entry {
    id: ResourceId,
    /// Allocation address of the resource, the `by_ptr` key
    key: usize,
    resource: Weak<dyn StreamableResource>,
    handler: Arc<dyn StreamingHandler>,
    is_dynamic: bool,
    target_residency: u32,
    last_update: LastUpdate,
    /// Head of the streaming chain started for this resource, if any
    in_flight: Option<Task>,
}

impl Entry {
    fn is_eligible(&self, now: Duration, interval: Duration) -> bool {
        match self.last_update {
            LastUpdate::Never => true,
            LastUpdate::At(last) => now.saturating_sub(last) > interval,
            LastUpdate::Frozen => false,
        }
    }

    /// Check if any task of the in-flight chain has yet to end
    fn is_busy(&self) -> bool {
        let mut current = self.in_flight.clone();
        while let Some(task) = current {
            if !task.is_ended() {
                return true;
            }
            current = task.next_task();
        }
        false
    }
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    /// Entry position by id
    index: HashMap<ResourceId, usize>,
    /// Id by resource allocation address
    by_ptr: HashMap<usize, ResourceId>,
    /// Next entry to visit
    cursor: usize,
}

impl Registry {
    fn get_mut(&mut self, id: ResourceId) -> Option<&mut Entry> {
        let position = *self.index.get(&id)?;
        self.entries.get_mut(position)
    }

    fn remove(&mut self, id: ResourceId) -> Option<Entry> {
        let position = self.index.remove(&id)?;
        let entry = self.entries.swap_remove(position);
        if let Some(moved) = self.entries.get(position) {
            self.index.insert(moved.id, position);
        }
        self.by_ptr.remove(&entry.key);
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
        Some(entry)
    }

    /// Unlink entries whose resource no longer exists
    ///
    /// The entries are handed back so the caller can drop them after
    /// releasing the lock.
    fn prune(&mut self) -> Vec<Entry> {
        let dead: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|entry| entry.resource.strong_count() == 0)
            .map(|entry| entry.id)
            .collect();
        dead.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Entries the cursor moved over
    pub visited: usize,
    /// Eligible entries whose residency was evaluated
    pub processed: usize,
    /// Streaming tasks started
    pub spawned: usize,
    /// Entries removed because their resource was dropped
    pub pruned: usize,
}

/// Registry view of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub target_residency: u32,
    pub is_dynamic: bool,
    pub is_frozen: bool,
    pub has_task_in_flight: bool,
}

/// Residency streaming scheduler
pub struct StreamingScheduler {
    config: StreamingConfig,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
    /// Last scheduled update task
    update_task: Mutex<Option<Task>>,
    next_id: AtomicU64,
}

impl StreamingScheduler {
    /// Create a scheduler driven by the monotonic clock
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a scheduler driven by a custom clock
    pub fn with_clock(config: StreamingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            registry: Mutex::new(Registry::default()),
            update_task: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Register a resource; a resource already registered keeps its id
    ///
    /// The registry only holds a weak reference: dropping the resource
    /// unregisters it on the next tick. Non-dynamic resources always
    /// target their max residency.
    pub fn start_streaming<R>(
        &self,
        resource: &Arc<R>,
        handler: Arc<dyn StreamingHandler>,
        is_dynamic: bool,
    ) -> ResourceId
    where
        R: StreamableResource + 'static,
    {
        let key = Arc::as_ptr(resource) as *const () as usize;
        let mut registry = self.registry.lock();
        if let Some(id) = registry.by_ptr.get(&key) {
            return *id;
        }

        let id = ResourceId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let weak: Weak<R> = Arc::downgrade(resource);
        let weak: Weak<dyn StreamableResource> = weak;
        let position = registry.entries.len();
        registry.entries.push(Entry {
            id,
            key,
            resource: weak,
            handler,
            is_dynamic,
            target_residency: 0,
            last_update: LastUpdate::Never,
            in_flight: None,
        });
        registry.index.insert(id, position);
        registry.by_ptr.insert(key, id);
        tracing::trace!("Started streaming {}", id);
        id
    }

    /// Remove a resource from the registry
    ///
    /// A streaming task already in flight is left to finish. Safe to call
    /// from the resource's own `Drop`.
    pub fn stop_streaming(&self, id: ResourceId) -> Result<(), StreamingError> {
        // Dropped after the lock is released
        let removed = self.registry.lock().remove(id);
        if removed.is_none() {
            return Err(StreamingError::UnknownResource(id));
        }
        tracing::trace!("Stopped streaming {}", id);
        Ok(())
    }

    /// Freeze a resource at target residency 0 and cancel its streaming
    ///
    /// The resource stays registered but is skipped by every tick until
    /// [`request_update`](Self::request_update) is called for it.
    pub fn cancel_streaming(&self, id: ResourceId) -> Result<(), StreamingError> {
        let (resource, in_flight) = {
            let mut registry = self.registry.lock();
            let entry = registry
                .get_mut(id)
                .ok_or(StreamingError::UnknownResource(id))?;
            entry.target_residency = 0;
            entry.last_update = LastUpdate::Frozen;
            (entry.resource.upgrade(), entry.in_flight.take())
        };

        // Cancel may block on a running task; never under the registry lock
        if let Some(resource) = resource {
            resource.cancel_streaming_task();
        }
        if let Some(task) = in_flight {
            task.cancel();
        }
        tracing::debug!("Canceled streaming {}", id);
        Ok(())
    }

    /// Make every streaming resource due on the next tick
    ///
    /// Frozen resources stay frozen.
    pub fn request_streaming_update(&self) {
        let mut registry = self.registry.lock();
        for entry in &mut registry.entries {
            if entry.last_update != LastUpdate::Frozen {
                entry.last_update = LastUpdate::Never;
            }
        }
    }

    /// Make one resource due on the next tick, un-freezing it if needed
    pub fn request_update(&self, id: ResourceId) -> Result<(), StreamingError> {
        let mut registry = self.registry.lock();
        let entry = registry
            .get_mut(id)
            .ok_or(StreamingError::UnknownResource(id))?;
        entry.last_update = LastUpdate::Never;
        Ok(())
    }

    pub fn is_streaming(&self, id: ResourceId) -> bool {
        self.registry.lock().index.contains_key(&id)
    }

    pub fn resource_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Position the next tick starts from
    pub fn cursor(&self) -> usize {
        self.registry.lock().cursor
    }

    pub fn resource_info(&self, id: ResourceId) -> Option<ResourceInfo> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(id)?;
        Some(ResourceInfo {
            id,
            target_residency: entry.target_residency,
            is_dynamic: entry.is_dynamic,
            is_frozen: entry.last_update == LastUpdate::Frozen,
            has_task_in_flight: entry.is_busy(),
        })
    }

    /// Run one budgeted update pass
    ///
    /// # Panics
    /// If a handler returns a residency above the resource's max.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let interval = self.config.update_interval;
        let budget = self.config.max_resources_per_update;
        let mut report = TickReport::default();
        let mut spawned = Vec::new();
        // Resources and entries touched under the lock are released after
        // it, so a resource `Drop` may call back into the scheduler
        let mut touched: Vec<Arc<dyn StreamableResource>> = Vec::new();
        let pruned;

        {
            let mut registry = self.registry.lock();
            pruned = registry.prune();
            report.pruned = pruned.len();

            let count = registry.entries.len();
            while report.visited < count && report.processed < budget {
                let position = registry.cursor % count;
                registry.cursor = (position + 1) % count;
                report.visited += 1;

                let entry = &mut registry.entries[position];
                if !entry.is_eligible(now, interval) || entry.is_busy() {
                    continue;
                }
                entry.in_flight = None;
                let Some(resource) = entry.resource.upgrade() else {
                    continue;
                };
                touched.push(Arc::clone(&resource));
                if !resource.should_update() {
                    continue;
                }

                entry.last_update = LastUpdate::At(now);
                report.processed += 1;

                if let Some(task) = update_entry(entry, resource.as_ref()) {
                    entry.in_flight = Some(task.clone());
                    spawned.push(task);
                }
            }
        }
        drop(touched);
        drop(pruned);

        report.spawned = spawned.len();
        for task in spawned {
            task.start();
        }

        tracing::debug!(
            visited = report.visited,
            processed = report.processed,
            spawned = report.spawned,
            pruned = report.pruned,
            "Streaming tick"
        );
        report
    }

    /// Run [`tick`](Self::tick) as a task on `executor`
    ///
    /// Returns `None` without scheduling anything while the previous update
    /// task has not ended.
    pub fn schedule_update(self: &Arc<Self>, executor: Arc<dyn TaskExecutor>) -> Option<Task> {
        let mut slot = self.update_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_ended()) {
            tracing::trace!("Streaming update still pending; skipping");
            return None;
        }

        let scheduler = Arc::downgrade(self);
        let task = Task::from_fn("streaming-update", executor, move |_| {
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.tick();
            }
            Ok(())
        });
        *slot = Some(task.clone());
        drop(slot);

        task.start();
        Some(task)
    }

    /// Block until the last scheduled update task has ended
    pub fn wait_for_update(&self, seconds: f32) -> Result<(), StreamingError> {
        let task = self.update_task.lock().clone();
        if let Some(task) = task {
            task.wait(seconds)?;
        }
        Ok(())
    }
}

/// Recompute an entry's target and build a streaming task if it must change
fn update_entry(entry: &mut Entry, resource: &dyn StreamableResource) -> Option<Task> {
    let max = resource.max_residency();
    let target = if entry.is_dynamic {
        entry.handler.calculate_residency(resource)
    } else {
        max
    };
    assert!(
        target <= max,
        "Handler target residency {target} exceeds max {max} for {}",
        entry.id
    );
    entry.target_residency = target;

    let current = resource.current_residency();
    if target == current {
        return None;
    }

    let requested = entry.handler.calculate_requested_residency(resource, target);
    assert!(
        requested <= max,
        "Handler requested residency {requested} exceeds max {max} for {}",
        entry.id
    );
    if requested == current {
        return None;
    }

    let task = resource.create_streaming_task(requested);
    if task.is_none() {
        tracing::trace!("{} declined to stream to residency {}", entry.id, requested);
    }
    task
}

impl Default for StreamingScheduler {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

impl fmt::Debug for StreamingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("StreamingScheduler")
            .field("config", &self.config)
            .field("resources", &registry.entries.len())
            .field("cursor", &registry.cursor)
            .finish()
    }
}
