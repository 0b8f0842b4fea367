use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use std::time::Duration;

/// Default pause between two model calls.
pub const RATE_LIMIT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    /// Finish the batch in flight, then save what has been merged.
    Stop,
    /// Leave without saving.
    Abort,
}

const CONTINUE: u8 = 0;
const STOP: u8 = 1;
const ABORT: u8 = 2;

/// Cooperative stop/abort token. Clones share state; the runner only looks at it
/// between batches.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    state: Arc<AtomicU8>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful stop. Does not downgrade a pending abort.
    pub fn stop(&self) {
        let _ = self
            .state
            .compare_exchange(CONTINUE, STOP, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn abort(&self) {
        self.state.store(ABORT, Ordering::SeqCst);
    }

    pub fn signal(&self) -> Signal {
        match self.state.load(Ordering::SeqCst) {
            CONTINUE => Signal::Continue,
            STOP => Signal::Stop,
            _ => Signal::Abort,
        }
    }
}

/// Receives progress (0-100) and human-readable run log lines.
pub trait RunObserver: Send + Sync {
    fn on_progress(&self, percent: f64);
    fn on_log(&self, message: &str);
}

/// Forwards the run log to `tracing`; used when no progress bar is shown.
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_progress(&self, percent: f64) {
        tracing::debug!("Progress: {:.1}%", percent);
    }

    fn on_log(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Flat pause between batches; not adaptive.
pub async fn rate_limit(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
