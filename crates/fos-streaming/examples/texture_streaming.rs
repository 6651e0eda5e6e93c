//! Texture streaming demo
//!
//! Streams a handful of textures to a distance-based mip count on a worker
//! pool, uploading each finished level on the main thread.
//!
//! Run with: RUST_LOG=debug cargo run -p fos-streaming --example texture_streaming

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use fos_streaming::{RampHandler, StreamableResource, StreamingConfig, StreamingScheduler};
use fos_task::{CancellationToken, MainThreadTaskQueue, PoolConfig, Task, TaskExecutor, ThreadPool};

const FRAME: Duration = Duration::from_millis(16);

struct Texture {
    name: String,
    mips: u32,
    /// Camera distance in world units
    distance: f32,
    resident: Arc<AtomicU32>,
    pool: Arc<dyn TaskExecutor>,
    main_thread: Arc<dyn TaskExecutor>,
}

impl StreamableResource for Texture {
    fn max_residency(&self) -> u32 {
        self.mips
    }

    fn current_residency(&self) -> u32 {
        self.resident.load(Ordering::SeqCst)
    }

    fn create_streaming_task(&self, residency: u32) -> Option<Task> {
        let name = self.name.clone();
        let load = Task::from_fn(
            format!("{name}: read mips"),
            Arc::clone(&self.pool),
            move |cancel: &CancellationToken| {
                for _ in 0..residency {
                    cancel.check()?;
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(())
            },
        );

        let resident = Arc::clone(&self.resident);
        let upload = Task::from_fn(
            format!("{name}: upload"),
            Arc::clone(&self.main_thread),
            move |_: &CancellationToken| {
                resident.store(residency, Ordering::SeqCst);
                tracing::info!("{} now has {} mips resident", name, residency);
                Ok(())
            },
        );
        load.set_next_task(upload).ok()?;
        Some(load)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let pool = ThreadPool::new(&PoolConfig::default())?;
    let main_queue = MainThreadTaskQueue::new();
    let scheduler = Arc::new(StreamingScheduler::new(StreamingConfig::default()));

    // Closer textures keep more mips
    let handler = Arc::new(RampHandler::new(2, |res: &dyn StreamableResource| {
        res.max_residency()
    }));
    let far_handler = Arc::new(RampHandler::new(1, |res: &dyn StreamableResource| {
        res.max_residency() / 2
    }));

    let textures: Vec<_> = [("ground", 10, 5.0), ("rock", 8, 40.0), ("sky", 12, 500.0)]
        .into_iter()
        .map(|(name, mips, distance)| {
            Arc::new(Texture {
                name: name.to_string(),
                mips,
                distance,
                resident: Arc::new(AtomicU32::new(0)),
                pool: pool.executor(),
                main_thread: main_queue.executor(),
            })
        })
        .collect();

    let mut ids = Vec::new();
    for texture in &textures {
        let id = if texture.distance > 100.0 {
            scheduler.start_streaming(texture, far_handler.clone(), true)
        } else {
            scheduler.start_streaming(texture, handler.clone(), true)
        };
        ids.push(id);
    }

    for frame in 0..300 {
        scheduler.schedule_update(pool.executor());
        main_queue.run_all(FRAME)?;

        if frame == 120 {
            tracing::info!("Quality setting changed; re-evaluating all textures");
            scheduler.request_streaming_update();
        }
        thread::sleep(FRAME);
    }

    scheduler.wait_for_update(1.0)?;
    scheduler.cancel_streaming(ids[2])?;
    for texture in &textures {
        tracing::info!(
            "{}: {}/{} mips resident",
            texture.name,
            texture.current_residency(),
            texture.mips
        );
    }
    tracing::info!("Pool stats: {:?}", pool.stats());
    Ok(())
}
