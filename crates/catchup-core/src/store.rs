//! Event store and publisher contracts.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BoxError, EventStoreError};
use crate::event::StreamKey;
use crate::stream::{NewStreamEvent, StreamEvent};

/// Page size used by `replay_events_by_type` when none is configured.
pub const DEFAULT_REPLAY_BATCH_SIZE: usize = 200;

/// Tuning knobs for a replay scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Rows per page. Zero selects `DEFAULT_REPLAY_BATCH_SIZE`.
    pub batch_size: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_REPLAY_BATCH_SIZE,
        }
    }
}

impl ReplayOptions {
    /// Creates options with the given page size.
    #[must_use]
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Returns the page size to use.
    #[must_use]
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_REPLAY_BATCH_SIZE
        } else {
            self.batch_size
        }
    }
}

/// Receives the pages of a replay scan.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    /// Handles one non-empty page.
    async fn handle(&self, events: Vec<StreamEvent>) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> ReplayHandler for F
where
    F: Fn(Vec<StreamEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, events: Vec<StreamEvent>) -> Result<(), BoxError> {
        (self)(events).await
    }
}

/// Durable per-stream append-only log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Loads every event of a stream, ordered by `sequence_no`. A stream that
    /// does not exist yields an empty list.
    async fn load(&self, stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError>;

    /// Appends `events` atomically, provided the stream is at
    /// `expected_revision`. Returns the events as persisted.
    ///
    /// Stale revisions fail with `ConcurrencyConflict` and are never retried
    /// inside the store.
    async fn save(
        &self,
        stream_key: &StreamKey,
        expected_revision: i64,
        events: Vec<NewStreamEvent>,
    ) -> Result<Vec<StreamEvent>, EventStoreError>;

    /// Scans events of `event_types` with `event_time > since`, ordered by
    /// `(event_time, sequence_no)`, handing each non-empty page to `handler`.
    /// Stops after the first short page.
    async fn replay_events_by_type(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        handler: &dyn ReplayHandler,
        options: ReplayOptions,
    ) -> Result<(), EventStoreError>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn load(&self, stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError> {
        (**self).load(stream_key).await
    }

    async fn save(
        &self,
        stream_key: &StreamKey,
        expected_revision: i64,
        events: Vec<NewStreamEvent>,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        (**self).save(stream_key, expected_revision, events).await
    }

    async fn replay_events_by_type(
        &self,
        event_types: &[String],
        since: DateTime<Utc>,
        handler: &dyn ReplayHandler,
        options: ReplayOptions,
    ) -> Result<(), EventStoreError> {
        (**self)
            .replay_events_by_type(event_types, since, handler, options)
            .await
    }
}

/// Forwards committed events to a message broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `events` in order.
    async fn publish_events(&self, events: &[StreamEvent]) -> Result<(), BoxError>;
}

#[async_trait]
impl<P: EventPublisher + ?Sized> EventPublisher for Arc<P> {
    async fn publish_events(&self, events: &[StreamEvent]) -> Result<(), BoxError> {
        (**self).publish_events(events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_batch_size_falls_back_to_default() {
        assert_eq!(
            ReplayOptions::with_batch_size(0).effective_batch_size(),
            DEFAULT_REPLAY_BATCH_SIZE
        );
        assert_eq!(ReplayOptions::with_batch_size(3).effective_batch_size(), 3);
        assert_eq!(
            ReplayOptions::default().effective_batch_size(),
            DEFAULT_REPLAY_BATCH_SIZE
        );
    }
}
