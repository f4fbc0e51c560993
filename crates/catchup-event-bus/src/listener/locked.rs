//! Cluster-wide singleton execution of a listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catchup_cluster_lock::{Lock, LockError, LockOptions, Locker};
use catchup_core::event::Event;
use tokio::runtime::Handle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BatchHandler, LOCK_KEY_PREFIX, Listener, ListenerError};

const MIN_REFRESH_PERIOD: Duration = Duration::from_millis(10);

/// Runs the wrapped listener only while holding the cluster lock
/// `locks.listeners.<name>`.
///
/// The lock is refreshed every half TTL. If a refresh fails the wrapped
/// listener is cancelled and `ListenerError::LockLost` is returned. The lock
/// is released however `listen` ends, including when its future is dropped.
pub struct LockedListener<E> {
    inner: Box<dyn Listener<E>>,
    locker: Arc<dyn Locker>,
    ttl: Duration,
    options: LockOptions,
    key: Option<String>,
}

impl<E: Event> LockedListener<E> {
    /// Wraps `inner` behind locks of `ttl` obtained from `locker`.
    #[must_use]
    pub fn new(
        inner: Box<dyn Listener<E>>,
        locker: Arc<dyn Locker>,
        ttl: Duration,
        options: LockOptions,
    ) -> Self {
        Self {
            inner,
            locker,
            ttl,
            options,
            key: None,
        }
    }

    async fn run_while_held(
        &self,
        lock: &dyn Lock,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let child = cancel.child_token();
        let run = self.inner.listen(&child, handler);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            err = keep_alive(lock, self.ttl) => {
                warn!(key = lock.key(), error = %err, "lock lost, stopping listener");
                child.cancel();
                if let Err(err) = run.await {
                    debug!(error = %err, "listener stopped with error after lock loss");
                }
                Err(ListenerError::LockLost(lock.key().to_owned()))
            }
        }
    }
}

/// Refreshes `lock` every half `ttl` until a refresh fails.
async fn keep_alive(lock: &dyn Lock, ttl: Duration) -> LockError {
    let period = (ttl / 2).max(MIN_REFRESH_PERIOD);
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        ticks.tick().await;
        if let Err(err) = lock.refresh(ttl).await {
            return err;
        }
        debug!(key = lock.key(), "lock refreshed");
    }
}

async fn release(lock: &dyn Lock) {
    match lock.release().await {
        Ok(()) => info!(key = lock.key(), "lock released"),
        Err(err) => warn!(key = lock.key(), error = %err, "could not release lock"),
    }
}

/// Releases the lock from a spawned task if `listen` is dropped mid-flight.
struct ReleaseOnDrop(Option<Arc<dyn Lock>>);

impl ReleaseOnDrop {
    async fn release(mut self) {
        if let Some(lock) = self.0.take() {
            release(lock.as_ref()).await;
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(lock) = self.0.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { release(lock.as_ref()).await });
            }
            Err(_) => warn!(key = lock.key(), "no runtime to release lock, leaving it to expire"),
        }
    }
}

#[async_trait]
impl<E: Event> Listener<E> for LockedListener<E> {
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        self.inner.initialize(name, event_types).await?;
        self.key = Some(format!("{LOCK_KEY_PREFIX}{name}"));
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let key = self.key.as_deref().ok_or(ListenerError::NotInitialized)?;
        let lock = match self
            .locker
            .obtain(key, self.ttl, &self.options, cancel)
            .await
        {
            Ok(lock) => Arc::<dyn Lock>::from(lock),
            Err(LockError::Cancelled(_)) => {
                info!(key, "cancelled while waiting for lock");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        info!(key, "lock obtained");

        let guard = ReleaseOnDrop(Some(Arc::clone(&lock)));
        let result = self.run_while_held(lock.as_ref(), cancel, handler).await;
        guard.release().await;
        result
    }
}
