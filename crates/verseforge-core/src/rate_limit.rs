//! Shared rate limiting for provider calls
//!
//! Two constraints are enforced together: a concurrency cap (at most
//! `max_concurrent_requests` provider calls in flight) and a rolling
//! per-minute quota shared by every task in the run. `acquire` suspends the
//! caller until both are satisfied; the returned `RateSlot` gives the
//! concurrency permit back on drop, so it is returned on every exit path
//! including panics and cancellation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);
// Small cushion past the oldest grant's expiry so a wakeup never lands
// inside the still-full window.
const WAKE_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_concurrent_requests: usize,
    pub requests_per_minute: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            requests_per_minute: 60,
        }
    }
}

/// Rolling-minute accounting: timestamps of granted quota slots.
#[derive(Debug)]
struct RateWindow {
    granted: VecDeque<Instant>,
    capacity: usize,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.granted.front() {
            if now.duration_since(*oldest) >= WINDOW {
                self.granted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to take a slot; on failure return how long until one frees up.
    fn try_grant(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);
        if self.granted.len() < self.capacity {
            self.granted.push_back(now);
            return Ok(());
        }
        let oldest = *self
            .granted
            .front()
            .expect("full window has a front entry");
        let elapsed = now.duration_since(oldest);
        Err(WINDOW.saturating_sub(elapsed) + WAKE_MARGIN)
    }
}

/// Concurrency slot held for the duration of one provider call.
pub struct RateSlot {
    _permit: OwnedSemaphorePermit,
}

/// Process-wide limiter, instantiated once per run and passed explicitly
/// into the orchestrator and all tasks.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            window: Mutex::new(RateWindow {
                granted: VecDeque::new(),
                capacity: config.requests_per_minute.max(1),
            }),
        }
    }

    /// Wait for a concurrency permit and a minute-quota slot.
    pub async fn acquire(&self) -> RateSlot {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore never closes");
        self.reserve_quota().await;
        RateSlot { _permit: permit }
    }

    /// Wait for a minute-quota slot only.
    ///
    /// Used when retrying after a provider-side `RateLimited` response while
    /// the concurrency permit is already held.
    pub async fn reserve_quota(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                match window.try_grant(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "per-minute quota exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Permits currently available (test observability).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
