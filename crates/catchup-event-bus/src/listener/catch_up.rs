//! The top-level catch-up listener and its factory.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catchup_cluster_lock::{LockOptions, Locker};
use catchup_core::clock::Watermark;
use catchup_core::event::Event;
use catchup_core::mapper::EventMapper;
use catchup_core::store::EventStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    BatchHandler, DeduplicateListener, Listener, ListenerError, LockedListener, QueueListener,
    ReplayListener, SequenceListener,
};
use crate::broker::Broker;
use crate::dedup::EventDeduplicator;

/// Collaborators shared by every catch-up listener of a process.
pub struct CatchUpDependencies<E> {
    /// Source of history.
    pub store: Arc<dyn EventStore>,
    /// Source of live events.
    pub broker: Arc<dyn Broker>,
    /// Decoder registry.
    pub mapper: Arc<EventMapper<E>>,
    /// Lower bound of the history replay.
    pub watermark: Watermark,
    /// Cluster lock provider.
    pub locker: Arc<dyn Locker>,
    /// Options for obtaining the listener lock.
    pub lock_options: LockOptions,
}

impl<E> Clone for CatchUpDependencies<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            broker: Arc::clone(&self.broker),
            mapper: Arc::clone(&self.mapper),
            watermark: Arc::clone(&self.watermark),
            locker: Arc::clone(&self.locker),
            lock_options: self.lock_options.clone(),
        }
    }
}

impl<E> fmt::Debug for CatchUpDependencies<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatchUpDependencies")
            .field("mapper", &self.mapper)
            .field("lock_options", &self.lock_options)
            .finish_non_exhaustive()
    }
}

/// History followed by live events, delivered once per id, by at most one
/// cluster member per listener name:
///
/// `Deduplicate(Locked(Sequence([Replay, Queue])))`
pub struct CatchUpListener<E> {
    listener: DeduplicateListener<E>,
    initialized: bool,
}

impl<E: Event> CatchUpListener<E> {
    /// Assembles the pipeline. Call `initialize` before listening.
    #[must_use]
    pub fn new(
        deps: CatchUpDependencies<E>,
        lock_ttl: Duration,
        dedup: Arc<dyn EventDeduplicator<E>>,
    ) -> Self {
        let replay: Box<dyn Listener<E>> = Box::new(ReplayListener::new(
            deps.store,
            Arc::clone(&deps.mapper),
            deps.watermark,
        ));
        let queue: Box<dyn Listener<E>> = Box::new(QueueListener::new(deps.broker, deps.mapper));
        let sequence = SequenceListener::new(vec![replay, queue]);
        let locked = LockedListener::new(
            Box::new(sequence),
            deps.locker,
            lock_ttl,
            deps.lock_options,
        );
        Self {
            listener: DeduplicateListener::new(Box::new(locked), dedup),
            initialized: false,
        }
    }
}

#[async_trait]
impl<E: Event> Listener<E> for CatchUpListener<E> {
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        self.listener.initialize(name, event_types).await?;
        self.initialized = true;
        info!(name, ?event_types, "catch-up listener initialized");
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        if !self.initialized {
            return Err(ListenerError::NotInitialized);
        }
        self.listener.listen(cancel, handler).await
    }
}

/// Builds the deduplicator for a listener name.
pub type DeduplicatorFactory<E> = Arc<dyn Fn(&str) -> Arc<dyn EventDeduplicator<E>> + Send + Sync>;

/// Creates catch-up listeners that share one set of collaborators.
pub struct CatchUpListenerFactory<E> {
    deps: CatchUpDependencies<E>,
    dedup_factory: DeduplicatorFactory<E>,
}

impl<E: Event> CatchUpListenerFactory<E> {
    /// Creates a factory. `dedup_factory` receives the listener name so each
    /// projection gets its own window.
    #[must_use]
    pub fn new(deps: CatchUpDependencies<E>, dedup_factory: DeduplicatorFactory<E>) -> Self {
        Self {
            deps,
            dedup_factory,
        }
    }

    /// Creates an uninitialized listener for projection `name`.
    #[must_use]
    pub fn create(&self, name: &str, lock_ttl: Duration) -> CatchUpListener<E> {
        CatchUpListener::new(self.deps.clone(), lock_ttl, (self.dedup_factory)(name))
    }

    /// Creates and initializes a listener for projection `name`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first sub-listener that fails to initialize.
    pub async fn listener(
        &self,
        name: &str,
        event_types: &[String],
        lock_ttl: Duration,
    ) -> Result<CatchUpListener<E>, ListenerError> {
        let mut listener = self.create(name, lock_ttl);
        listener.initialize(name, event_types).await?;
        Ok(listener)
    }
}

impl<E> fmt::Debug for CatchUpListenerFactory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatchUpListenerFactory")
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}
