use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Stall detector for the capture path. The capture loop feeds it once per
/// frame; if feeds stop for longer than the timeout an error is logged and
/// `is_triggered` flips until audio resumes.
pub struct WatchdogTimer {
    timeout: Duration,
    last_feed: Arc<RwLock<Instant>>,
    triggered: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatchdogTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Arc::new(RwLock::new(Instant::now())),
            triggered: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self, running: Arc<AtomicBool>) {
        let timeout = self.timeout;
        let poll = (timeout / 4).clamp(Duration::from_millis(100), Duration::from_secs(1));
        let last_feed = Arc::clone(&self.last_feed);
        let triggered = Arc::clone(&self.triggered);
        *last_feed.write() = Instant::now();

        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                thread::sleep(poll);
                let elapsed = last_feed.read().elapsed();
                if elapsed > timeout && !triggered.swap(true, Ordering::SeqCst) {
                    tracing::error!("Watchdog timeout! No audio data for {:?}", elapsed);
                }
            }
        }));
    }

    pub fn feed(&self) {
        *self.last_feed.write() = Instant::now();
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Joins the poll thread. The `running` flag handed to `start` must be
    /// cleared first or this blocks for good.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.triggered.store(false, Ordering::SeqCst);
    }
}
