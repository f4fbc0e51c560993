//! Backoff strategies for contended lock acquisition.

use std::fmt;
use std::time::Duration;

use rand::Rng;

/// Decides how long to wait before the next attempt.
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// Returns the wait before retry number `attempt` (zero-based), or `None`
    /// to stop retrying.
    fn next_backoff(&self, attempt: u32) -> Option<Duration>;
}

/// Gives up after the first failed attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_backoff(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries forever at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff(pub Duration);

impl RetryStrategy for LinearBackoff {
    fn next_backoff(&self, _attempt: u32) -> Option<Duration> {
        Some(self.0)
    }
}

/// Retries forever, doubling the wait from 2ms and clamping it to
/// `[min, max]`. Each wait is jittered down by up to half.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Lower bound for every wait.
    pub min: Duration,
    /// Upper bound for every wait.
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_backoff(&self, attempt: u32) -> Option<Duration> {
        let base = Duration::from_millis(2_u64 << attempt.min(25));
        let capped = base.min(self.max);
        let half = capped / 2;
        let jitter = rand::rng().random_range(Duration::ZERO..=half);
        Some((capped - jitter).max(self.min))
    }
}

/// Stops another strategy after `max_retries` retries.
#[derive(Debug, Clone, Copy)]
pub struct LimitRetry<S> {
    inner: S,
    max_retries: u32,
}

impl<S: RetryStrategy> LimitRetry<S> {
    /// Creates a new `LimitRetry`.
    #[must_use]
    pub fn new(inner: S, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }
}

impl<S: RetryStrategy> RetryStrategy for LimitRetry<S> {
    fn next_backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            None
        } else {
            self.inner.next_backoff(attempt)
        }
    }
}
