use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval limiter for a single external dependency.
///
/// Callers reserve the next free slot under the lock and sleep outside it, so concurrent
/// workers are spaced `min_interval` apart in reservation order.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dependency: String,
    min_interval: Duration,
    // time at which the next call may start
    next_slot: Mutex<Option<Instant>>,
    calls: AtomicU64,
}

impl RateLimiter {
    pub fn new(dependency: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                dependency: dependency.into(),
                min_interval,
                next_slot: Mutex::new(None),
                calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.inner.dependency
    }

    /// Wait until the next call is permitted.
    pub async fn acquire(&self) {
        self.inner.calls.fetch_add(1, Ordering::Relaxed);
        crate::metrics::steps::external_call(&self.inner.dependency);

        let slot = {
            let mut guard = self.inner.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *guard {
                Some(next) if next > now => next,
                _ => now,
            };
            *guard = Some(slot + self.inner.min_interval);
            slot
        };

        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Number of permits handed out so far.
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }
}
