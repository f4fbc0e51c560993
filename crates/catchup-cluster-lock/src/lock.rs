//! Locker and lock contracts.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::LockError;
use crate::retry::RetryStrategy;

/// Options for `Locker::obtain`.
#[derive(Clone, Default)]
pub struct LockOptions {
    /// How to wait between contended attempts. `None` gives up after the
    /// first attempt.
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    /// Opaque data stored alongside the lock token.
    pub metadata: String,
}

impl LockOptions {
    /// Sets the retry strategy.
    #[must_use]
    pub fn with_retry_strategy(mut self, strategy: impl RetryStrategy + 'static) -> Self {
        self.retry_strategy = Some(Arc::new(strategy));
        self
    }

    /// Sets the lock metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }
}

impl fmt::Debug for LockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockOptions")
            .field("retry_strategy", &self.retry_strategy)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Hands out named locks.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Claims `key` for `ttl`, retrying per `options` until the claim
    /// succeeds, the strategy gives up or `cancel` fires.
    ///
    /// Failure under contention is an expected outcome, not a fault.
    async fn obtain(
        &self,
        key: &str,
        ttl: Duration,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Lock>, LockError>;
}

#[async_trait]
impl<L: Locker + ?Sized> Locker for Arc<L> {
    async fn obtain(
        &self,
        key: &str,
        ttl: Duration,
        options: &LockOptions,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Lock>, LockError> {
        (**self).obtain(key, ttl, options, cancel).await
    }
}

/// A held claim on a key. Only the owning token may refresh or release it.
#[async_trait]
pub trait Lock: fmt::Debug + Send + Sync {
    /// The locked key.
    fn key(&self) -> &str;

    /// The ownership token.
    fn token(&self) -> &str;

    /// The metadata stored with the lock.
    fn metadata(&self) -> &str;

    /// Remaining time to live, or `None` if the lock is no longer held.
    async fn ttl(&self) -> Result<Option<Duration>, LockError>;

    /// Extends the lock to expire `ttl` from now.
    ///
    /// Fails with `LockError::NotHeld` if it expired or was stolen.
    async fn refresh(&self, ttl: Duration) -> Result<(), LockError>;

    /// Releases the lock.
    ///
    /// Fails with `LockError::NotHeld` if it expired or was stolen.
    async fn release(&self) -> Result<(), LockError>;
}

/// Generates a fresh ownership token.
#[must_use]
pub fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Runs `attempt` until it yields a lock, following the retry strategy in
/// `options` and honouring `cancel` while backing off.
///
/// # Errors
///
/// Returns `LockError::NotObtained` when the strategy stops,
/// `LockError::Cancelled` when `cancel` fires, or the attempt's own error.
pub async fn retry_until_obtained<F, Fut>(
    key: &str,
    options: &LockOptions,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<Box<dyn Lock>, LockError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<Box<dyn Lock>>, LockError>> + Send,
{
    let mut retries = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return Err(LockError::Cancelled(key.to_owned()));
        }
        if let Some(lock) = attempt().await? {
            debug!(key, retries, "lock obtained");
            return Ok(lock);
        }
        let Some(backoff) = options
            .retry_strategy
            .as_ref()
            .and_then(|strategy| strategy.next_backoff(retries))
        else {
            return Err(LockError::NotObtained(key.to_owned()));
        };
        retries = retries.saturating_add(1);
        tokio::select! {
            () = cancel.cancelled() => return Err(LockError::Cancelled(key.to_owned())),
            () = tokio::time::sleep(backoff) => {}
        }
    }
}
