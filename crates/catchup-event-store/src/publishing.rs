//! Store decorator that publishes committed events.

use async_trait::async_trait;
use catchup_core::error::EventStoreError;
use catchup_core::event::StreamKey;
use catchup_core::store::{EventPublisher, EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::{NewStreamEvent, StreamEvent};
use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

/// Wraps an `EventStore` so every successful `save` is followed by a publish
/// of the persisted events.
///
/// A publish failure is reported as `EventStoreError::Publish`; the events
/// are already committed at that point and are picked up again by replay.
#[derive(Debug)]
pub struct PublishingEventStore<S, P> {
    inner: S,
    publisher: P,
}

impl<S, P> PublishingEventStore<S, P> {
    /// Creates a new `PublishingEventStore`.
    #[must_use]
    pub fn new(inner: S, publisher: P) -> Self {
        Self { inner, publisher }
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S, P> EventStore for PublishingEventStore<S, P>
where
    S: EventStore,
    P: EventPublisher,
{
    async fn load(&self, stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError> {
        self.inner.load(stream_key).await
    }

    #[instrument(skip(self, stream_key, events), fields(stream = %stream_key))]
    async fn save(
        &self,
        stream_key: &StreamKey,
        expected_revision: i64,
        events: Vec<NewStreamEvent>,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        let saved = self.inner.save(stream_key, expected_revision, events).await?;
        if saved.is_empty() {
            return Ok(saved);
        }
        if let Err(e) = self.publisher.publish_events(&saved).await {
            warn!(error = %e, event_count = saved.len(), "committed events were not published");
            return Err(EventStoreError::Publish(e));
        }
        Ok(saved)
    }

    async fn replay_events_by_type(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        handler: &dyn ReplayHandler,
        options: ReplayOptions,
    ) -> Result<(), EventStoreError> {
        self.inner
            .replay_events_by_type(event_types, since, handler, options)
            .await
    }
}
