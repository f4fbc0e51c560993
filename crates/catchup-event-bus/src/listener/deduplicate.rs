use std::sync::Arc;

use async_trait::async_trait;
use catchup_core::error::BoxError;
use catchup_core::event::Event;
use tokio_util::sync::CancellationToken;

use super::{BatchHandler, Listener, ListenerError};
use crate::dedup::{EventCallback, EventDeduplicator};

/// Filters the wrapped listener's batches through a deduplicator and hands
/// each unseen event to the handler as its own batch.
pub struct DeduplicateListener<E> {
    inner: Box<dyn Listener<E>>,
    dedup: Arc<dyn EventDeduplicator<E>>,
}

impl<E: Event> DeduplicateListener<E> {
    /// Wraps `inner` with `dedup`.
    #[must_use]
    pub fn new(inner: Box<dyn Listener<E>>, dedup: Arc<dyn EventDeduplicator<E>>) -> Self {
        Self { inner, dedup }
    }
}

struct ForwardEach<'a, E> {
    handler: &'a dyn BatchHandler<E>,
}

#[async_trait]
impl<E: Event> EventCallback<E> for ForwardEach<'_, E> {
    async fn call(&self, event: E) -> Result<(), BoxError> {
        self.handler.handle(vec![event]).await
    }
}

struct DedupHandler<'a, E> {
    dedup: &'a dyn EventDeduplicator<E>,
    handler: &'a dyn BatchHandler<E>,
}

#[async_trait]
impl<E: Event> BatchHandler<E> for DedupHandler<'_, E> {
    async fn handle(&self, events: Vec<E>) -> Result<(), BoxError> {
        let forward = ForwardEach {
            handler: self.handler,
        };
        self.dedup
            .deduplicate(events, &forward)
            .await
            .map_err(|err| Box::new(ListenerError::from(err)) as BoxError)
    }
}

#[async_trait]
impl<E: Event> Listener<E> for DeduplicateListener<E> {
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        self.inner.initialize(name, event_types).await
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let dedup = DedupHandler {
            dedup: self.dedup.as_ref(),
            handler,
        };
        self.inner.listen(cancel, &dedup).await
    }
}
