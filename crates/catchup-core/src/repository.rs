//! Generic aggregate repository over an `EventStore`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::aggregate::Aggregate;
use crate::error::RepositoryError;
use crate::event::{Event, StreamKey};
use crate::mapper::EventMapper;
use crate::store::EventStore;
use crate::stream::{NewStreamEvent, StreamEvent};

/// Loads aggregates by replaying their stream and saves their changes with
/// optimistic concurrency.
pub struct AggregateRepository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    mapper: Arc<EventMapper<A::Event>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> AggregateRepository<A> {
    /// Creates a new `AggregateRepository`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, mapper: Arc<EventMapper<A::Event>>) -> Self {
        Self {
            store,
            mapper,
            _aggregate: PhantomData,
        }
    }

    /// Rebuilds the aggregate from its stream. An empty stream yields a new
    /// aggregate at version 0.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Store` if loading fails and
    /// `RepositoryError::Mapping` if an event does not decode.
    #[instrument(skip(self), fields(stream = %stream_key))]
    pub async fn load(&self, stream_key: &StreamKey) -> Result<A, RepositoryError> {
        let events = self.store.load(stream_key).await?;
        let mut aggregate = A::new(stream_key.clone());
        for stored in &events {
            aggregate.apply(self.mapper.map_stream_event(stored)?, false);
        }
        debug!(version = aggregate.version(), "aggregate loaded");
        Ok(aggregate)
    }

    /// Appends the aggregate's changes at its current version, then marks
    /// them committed. Does nothing when there are no changes.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Store` on conflicts or store failures, in
    /// which case the changes stay buffered.
    #[instrument(skip(self, aggregate), fields(stream = %aggregate.stream_key()))]
    pub async fn save(&self, aggregate: &mut A) -> Result<Vec<StreamEvent>, RepositoryError> {
        if aggregate.changes().is_empty() {
            return Ok(Vec::new());
        }
        let events = aggregate
            .changes()
            .iter()
            .map(|event| event.to_new_stream_event())
            .collect::<Result<Vec<NewStreamEvent>, _>>()?;

        let stored = self
            .store
            .save(aggregate.stream_key(), aggregate.version(), events)
            .await?;
        aggregate.mark_as_committed();
        debug!(
            version = aggregate.version(),
            appended = stored.len(),
            "aggregate saved"
        );
        Ok(stored)
    }
}

impl<A: Aggregate> fmt::Debug for AggregateRepository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}
