//! Retry combinator with exponential backoff and jitter
//!
//! One policy wraps every fallible external call in the pipeline: provider
//! synthesis, storage uploads, and rollback deletions. Callers supply a
//! classifier mapping their error type onto `ErrorClass`; permanent errors
//! abort immediately, transient errors burn through a bounded attempt
//! budget, and rate-limit responses wait without consuming that budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Retry-relevant classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Quota exhausted upstream; wait (honoring any server hint) and retry.
    RateLimited { retry_after: Option<Duration> },
    /// Worth retrying with backoff.
    Transient,
    /// Retrying cannot help.
    Permanent,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempt budget for transient failures (includes the first attempt).
    pub max_attempts: u32,
    /// Separate cap on rate-limit waits so a saturated provider cannot
    /// stall an item forever.
    pub max_rate_limit_waits: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_rate_limit_waits: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given 1-based attempt, with up to 50%
    /// additive jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 2);
        (exp + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the classifier says stop, or budgets run out.
///
/// `op` receives the 1-based attempt number. `on_backoff` runs after each
/// sleep, before the next attempt; the dispatcher uses it to re-consult the
/// shared rate window after a `RateLimited` response.
pub async fn retry_with_hook<T, E, F, Fut, C, H, HFut>(
    policy: &RetryPolicy,
    classify: C,
    mut op: F,
    mut on_backoff: H,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
    E: std::fmt::Display,
    H: FnMut(ErrorClass) -> HFut,
    HFut: Future<Output = ()>,
{
    let mut transient_attempts: u32 = 0;
    let mut rate_limit_waits: u32 = 0;

    loop {
        let attempt = transient_attempts + rate_limit_waits + 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify(&err);
                let delay = match class {
                    ErrorClass::Permanent => return Err(err),
                    ErrorClass::RateLimited { retry_after } => {
                        rate_limit_waits += 1;
                        if rate_limit_waits > policy.max_rate_limit_waits {
                            return Err(err);
                        }
                        retry_after.unwrap_or_else(|| policy.backoff_delay(rate_limit_waits))
                    }
                    ErrorClass::Transient => {
                        transient_attempts += 1;
                        if transient_attempts >= policy.max_attempts {
                            return Err(err);
                        }
                        policy.backoff_delay(transient_attempts)
                    }
                };
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                on_backoff(class).await;
            }
        }
    }
}

/// `retry_with_hook` without a backoff hook.
pub async fn retry<T, E, F, Fut, C>(policy: &RetryPolicy, classify: C, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
    E: std::fmt::Display,
{
    retry_with_hook(policy, classify, op, |_| async {}).await
}
