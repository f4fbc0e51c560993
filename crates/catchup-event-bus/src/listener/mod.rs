//! Listener pipeline.
//!
//! Sources (`StaticListener`, `ReplayListener`, `QueueListener`) produce
//! batches of decoded events; decorators (`SequenceListener`,
//! `ParallelListener`, `LockedListener`, `DeduplicateListener`) compose them.
//! Every listener must be initialized before it listens.

mod catch_up;
mod deduplicate;
mod locked;
mod parallel;
mod queue;
mod replay;
mod sequence;
mod static_listener;

use std::future::Future;

use async_trait::async_trait;
use catchup_cluster_lock::LockError;
use catchup_core::error::{BoxError, EventStoreError, MapperError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerError;
use crate::dedup::DedupError;

pub use catch_up::{CatchUpDependencies, CatchUpListener, CatchUpListenerFactory, DeduplicatorFactory};
pub use deduplicate::DeduplicateListener;
pub use locked::LockedListener;
pub use parallel::ParallelListener;
pub use queue::QueueListener;
pub use replay::ReplayListener;
pub use sequence::SequenceListener;
pub use static_listener::StaticListener;

/// Prefix of the cluster lock key taken by `LockedListener`.
pub const LOCK_KEY_PREFIX: &str = "locks.listeners.";

/// Errors raised by a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// `listen` was called before `initialize`.
    #[error("listener not initialized")]
    NotInitialized,

    /// The event store failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// A stored event could not be decoded.
    #[error(transparent)]
    Mapper(#[from] MapperError),

    /// A broker message body was not a stream event.
    #[error("malformed broker message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The broker failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The cluster lock could not be obtained.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The cluster lock expired or was taken over while listening.
    #[error("lock {0} was lost while listening")]
    LockLost(String),

    /// The dedup window failed or its callback failed.
    #[error(transparent)]
    Dedup(#[from] DedupError),

    /// The batch handler failed.
    #[error("batch handler failed: {0}")]
    Handler(#[source] BoxError),
}

/// Recovers a `ListenerError` that travelled through a boxed error, wrapping
/// anything else as a handler failure.
pub(crate) fn handler_error(err: BoxError) -> ListenerError {
    match err.downcast::<ListenerError>() {
        Ok(err) => *err,
        Err(err) => ListenerError::Handler(err),
    }
}

/// Receives batches of decoded events.
#[async_trait]
pub trait BatchHandler<E>: Send + Sync {
    /// Handles one batch. An error aborts the current `listen` call, except
    /// under `QueueListener`, which leaves the message unacknowledged.
    async fn handle(&self, events: Vec<E>) -> Result<(), BoxError>;
}

#[async_trait]
impl<E, F, Fut> BatchHandler<E> for F
where
    E: Send + 'static,
    F: Fn(Vec<E>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, events: Vec<E>) -> Result<(), BoxError> {
        (self)(events).await
    }
}

/// A source of event batches.
#[async_trait]
pub trait Listener<E>: Send + Sync {
    /// Binds the listener to `name` and the event types it receives. Creates
    /// whatever broker topology the listener needs.
    async fn initialize(&mut self, name: &str, event_types: &[String])
    -> Result<(), ListenerError>;

    /// Delivers batches to `handler` until the source is exhausted, an error
    /// occurs or `cancel` fires. Cancellation is a clean stop.
    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError>;
}
