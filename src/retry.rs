//! Bounded retry with backoff for "wait until the page shows X" conditions.
//!
//! Every wait against the remote board (row visibility, loaded indicator,
//! confirmation controls) goes through [`retry_until`] with its own policy.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::Result;

/// How long and how often to re-check a condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on probe calls (at least one is always made).
    pub max_attempts: u32,
    /// Delay after the first failed probe.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failed probe.
    pub backoff: f64,
    /// Cap on a single delay.
    pub max_delay: Duration,
    /// Overall time budget. No new attempt starts after it is spent.
    pub max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Poll at a fixed interval until `timeout` elapses.
    pub fn poll(interval: Duration, timeout: Duration) -> Self {
        let attempts = (timeout.as_millis() / interval.as_millis().max(1)) as u32 + 1;
        Self {
            max_attempts: attempts.max(1),
            initial_delay: interval,
            backoff: 1.0,
            max_delay: interval,
            max_elapsed: Some(timeout),
        }
    }

    /// A fixed number of attempts with growing delays.
    pub fn attempts(max_attempts: u32, initial_delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff,
            max_delay: Duration::from_secs(30),
            max_elapsed: None,
        }
    }

    /// Delay before attempt `n + 1`, given `n` failed attempts so far.
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(3, Duration::from_millis(500), 2.0)
    }
}

/// Re-run `probe` until it reports `true` or the policy is exhausted.
///
/// Returns `Ok(false)` when the condition never held. Row-level and other
/// recoverable errors count as a failed attempt; fatal errors (see
/// [`crate::error::Error::is_fatal`]) are returned immediately.
pub async fn retry_until<F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<bool>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let mut failed = 0u32;

    loop {
        match probe(failed).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(attempt = failed + 1, error = %e, "retry probe failed");
            }
        }
        failed += 1;

        if failed >= policy.max_attempts {
            return Ok(false);
        }
        if let Some(budget) = policy.max_elapsed
            && started.elapsed() >= budget
        {
            return Ok(false);
        }
        tokio::time::sleep(policy.delay_after(failed)).await;
    }
}
