// pit.rs
//
// Periodic tick source. One dedicated thread fires the callback at a fixed
// cadence until stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{NexisError, NexisResult};

pub struct Pit {
    interval: Duration,
    tick_count: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pit {
    /// Start firing `on_tick` every `interval_ms` milliseconds.
    pub fn start<F>(interval_ms: u64, mut on_tick: F) -> NexisResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval_ms == 0 {
            return Err(NexisError::InvalidArgument("tick interval must be positive".into()));
        }
        let interval = Duration::from_millis(interval_ms);
        let tick_count = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let ticks = Arc::clone(&tick_count);
        let live = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("nexis-pit".into())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                while live.load(Ordering::SeqCst) {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    if !live.load(Ordering::SeqCst) {
                        break;
                    }
                    ticks.fetch_add(1, Ordering::SeqCst);
                    on_tick();
                    deadline += interval;
                }
            })
            .map_err(|e| NexisError::TickSource(e.to_string()))?;

        log::debug!("PIT started at {} ms", interval_ms);
        Ok(Self {
            interval,
            tick_count,
            running,
            handle: Some(handle),
        })
    }

    pub fn ticks(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the clock. No callback starts after this returns, unless called
    /// from the tick thread itself.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            log::debug!("PIT stopped after {} ticks", self.ticks());
        }
    }
}

impl Drop for Pit {
    fn drop(&mut self) {
        self.stop();
    }
}
