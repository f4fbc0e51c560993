//! Suppression of recently seen events.
//!
//! A deduplicator calls back once per event whose id is not in its window, in
//! input order, and records an id only after its callback succeeded.

mod distributed;
mod memory;

use std::future::Future;

use async_trait::async_trait;
use catchup_core::error::BoxError;
use thiserror::Error;

pub use distributed::RedisDeduplicator;
pub use memory::MemoryDeduplicator;

/// Errors raised while deduplicating a batch.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The callback failed; the rest of the batch was not processed.
    #[error("event callback failed: {0}")]
    Callback(#[source] BoxError),

    /// The window store failed.
    #[error("dedup window unavailable: {0}")]
    Redis(#[from] redis::RedisError),

    /// Concurrent writers kept changing the window.
    #[error("dedup window {key} kept changing after {attempts} attempts")]
    Contention {
        /// The window's storage key.
        key: String,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Invoked for each unseen event.
#[async_trait]
pub trait EventCallback<E>: Send + Sync {
    /// Handles one event.
    async fn call(&self, event: E) -> Result<(), BoxError>;
}

#[async_trait]
impl<E, F, Fut> EventCallback<E> for F
where
    E: Send + 'static,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn call(&self, event: E) -> Result<(), BoxError> {
        (self)(event).await
    }
}

/// Calls back once per event not seen within the window.
#[async_trait]
pub trait EventDeduplicator<E>: Send + Sync {
    /// Runs `callback` for each unseen event of `events`, in order, stopping
    /// at the first callback failure.
    async fn deduplicate(
        &self,
        events: Vec<E>,
        callback: &dyn EventCallback<E>,
    ) -> Result<(), DedupError>;
}
