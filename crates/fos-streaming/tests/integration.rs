//! Integration tests - streaming driven through a real thread pool

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use fos_streaming::{
    ManualClock, RampHandler, StreamableResource, StreamingConfig, StreamingScheduler,
};
use fos_task::{CancellationToken, PoolConfig, Task, TaskExecutor, ThreadPool};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Texture {
    mips: u32,
    loaded: Arc<AtomicU32>,
    loads: Arc<AtomicUsize>,
    executor: Arc<dyn TaskExecutor>,
}

impl Texture {
    fn new(mips: u32, executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Arc::new(Self {
            mips,
            loaded: Arc::new(AtomicU32::new(0)),
            loads: Arc::new(AtomicUsize::new(0)),
            executor,
        })
    }

    fn loaded(&self) -> u32 {
        self.loaded.load(Ordering::SeqCst)
    }
}

impl StreamableResource for Texture {
    fn max_residency(&self) -> u32 {
        self.mips
    }

    fn current_residency(&self) -> u32 {
        self.loaded()
    }

    fn create_streaming_task(&self, residency: u32) -> Option<Task> {
        let loaded = Arc::clone(&self.loaded);
        let loads = Arc::clone(&self.loads);
        Some(Task::from_fn(
            format!("stream-mips-{residency}"),
            Arc::clone(&self.executor),
            move |cancel: &CancellationToken| {
                thread::sleep(Duration::from_millis(1));
                cancel.check()?;
                loads.fetch_add(1, Ordering::SeqCst);
                loaded.store(residency, Ordering::SeqCst);
                Ok(())
            },
        ))
    }
}

#[test]
fn test_textures_ramp_to_target_on_pool() {
    init_tracing();
    let pool = ThreadPool::new(&PoolConfig::with_workers(3)).unwrap();
    let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
    let scheduler = Arc::new(StreamingScheduler::with_clock(
        StreamingConfig::default(),
        clock.clone(),
    ));
    let handler = Arc::new(RampHandler::new(1, |res: &dyn StreamableResource| {
        res.max_residency()
    }));

    let textures: Vec<_> = (0..20).map(|i| Texture::new(4 + i % 3, pool.executor())).collect();
    for texture in &textures {
        scheduler.start_streaming(texture, handler.clone(), true);
    }

    for _ in 0..500 {
        if textures.iter().all(|t| t.loaded() == t.mips) {
            break;
        }
        if let Some(update) = scheduler.schedule_update(pool.executor()) {
            update.wait(5.0).unwrap();
        }
        clock.advance(Duration::from_millis(150));
        thread::sleep(Duration::from_millis(2));
    }

    for texture in &textures {
        assert_eq!(texture.loaded(), texture.mips);
        // Ramp step of one: exactly one load per mip level
        assert_eq!(texture.loads.load(Ordering::SeqCst), texture.mips as usize);
    }
}

#[test]
fn test_budget_spreads_work_across_ticks() {
    init_tracing();
    let pool = ThreadPool::new(&PoolConfig::with_workers(2)).unwrap();
    let clock = Arc::new(ManualClock::new(Duration::from_secs(1)));
    let config = StreamingConfig {
        max_resources_per_update: 8,
        ..Default::default()
    };
    let scheduler = StreamingScheduler::with_clock(config, clock.clone());
    let handler = Arc::new(RampHandler::new(8, |res: &dyn StreamableResource| {
        res.max_residency()
    }));

    let textures: Vec<_> = (0..20).map(|_| Texture::new(2, pool.executor())).collect();
    for texture in &textures {
        scheduler.start_streaming(texture, handler.clone(), true);
    }

    let reports: Vec<_> = (0..3).map(|_| scheduler.tick()).collect();

    assert_eq!(
        reports.iter().map(|r| r.spawned).collect::<Vec<_>>(),
        vec![8, 8, 4]
    );
    // Third tick ran out of due entries and stopped after one full pass
    assert_eq!(reports[2].visited, 20);
    assert_eq!(scheduler.cursor(), 16);
}

#[test]
fn test_cancel_streaming_while_loading() {
    init_tracing();
    let pool = ThreadPool::new(&PoolConfig::with_workers(1)).unwrap();
    let scheduler = StreamingScheduler::new(StreamingConfig::default());
    let handler = Arc::new(RampHandler::new(4, |res: &dyn StreamableResource| {
        res.max_residency()
    }));

    let texture = Texture::new(4, pool.executor());
    let id = scheduler.start_streaming(&texture, handler, true);
    assert_eq!(scheduler.tick().spawned, 1);

    scheduler.cancel_streaming(id).unwrap();

    let info = scheduler.resource_info(id).unwrap();
    assert!(info.is_frozen);
    assert!(!info.has_task_in_flight);
    assert_eq!(info.target_residency, 0);
    assert_eq!(scheduler.tick().processed, 0);
}
