//! Test stores and publishers: failing and recording doubles.

use std::sync::Mutex;

use async_trait::async_trait;
use catchup_core::error::{BoxError, EventStoreError};
use catchup_core::event::StreamKey;
use catchup_core::store::{EventPublisher, EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::{NewStreamEvent, StreamEvent};
use chrono::{DateTime, Utc};

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn load(&self, _stream_key: &StreamKey) -> Result<Vec<StreamEvent>, EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn save(
        &self,
        _stream_key: &StreamKey,
        _expected_revision: i64,
        _events: Vec<NewStreamEvent>,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }

    async fn replay_events_by_type(
        &self,
        _event_types: &[String],
        _since: DateTime<Utc>,
        _handler: &dyn ReplayHandler,
        _options: ReplayOptions,
    ) -> Result<(), EventStoreError> {
        Err(EventStoreError::Infrastructure("connection refused".into()))
    }
}

/// A publisher that records every published batch and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    published: Mutex<Vec<Vec<StreamEvent>>>,
}

impl RecordingEventPublisher {
    /// Creates an empty recording publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every published batch.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<Vec<StreamEvent>> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_events(&self, events: &[StreamEvent]) -> Result<(), BoxError> {
        self.published.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

/// A publisher whose broker is always unreachable.
#[derive(Debug)]
pub struct FailingEventPublisher;

#[async_trait]
impl EventPublisher for FailingEventPublisher {
    async fn publish_events(&self, _events: &[StreamEvent]) -> Result<(), BoxError> {
        Err("broker unreachable".into())
    }
}
