//! Observer to worker commands.
//!
//! Plain flags polled by the worker between steps and inside its sleep, so a
//! stop lands within one slice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Why an interruptible sleep returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Stop,
    Refresh,
}

#[derive(Debug, Clone, Default)]
pub struct CommandChannel {
    stop: Arc<AtomicBool>,
    refresh: Arc<AtomicBool>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Cut the current sleep short and poll again.
    pub fn request_refresh(&self) {
        self.refresh.store(true, Ordering::SeqCst);
    }

    fn take_refresh(&self) -> bool {
        self.refresh.swap(false, Ordering::SeqCst)
    }

    /// Clear both flags before a new run.
    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.refresh.store(false, Ordering::SeqCst);
    }

    /// Sleep for `total`, checking the flags every `slice`.
    pub async fn sleep(&self, total: Duration, slice: Duration) -> Wake {
        let deadline = Instant::now() + total;
        let slice = slice.max(Duration::from_millis(1));
        loop {
            if self.stop_requested() {
                return Wake::Stop;
            }
            if self.take_refresh() {
                return Wake::Refresh;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            tokio::time::sleep(slice.min(deadline - now)).await;
        }
    }
}
