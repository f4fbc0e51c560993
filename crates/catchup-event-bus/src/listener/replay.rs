//! Replays history from the event store.

use std::sync::Arc;

use async_trait::async_trait;
use catchup_core::clock::Watermark;
use catchup_core::error::{BoxError, EventStoreError};
use catchup_core::event::Event;
use catchup_core::mapper::EventMapper;
use catchup_core::store::{EventStore, ReplayHandler, ReplayOptions};
use catchup_core::stream::StreamEvent;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{BatchHandler, Listener, ListenerError, handler_error};

/// Delivers every stored event of the listener's types newer than the
/// watermark, one page per batch, then stops.
///
/// The watermark is read when `listen` starts, so queues bound during
/// `initialize` already collect anything appended after it.
pub struct ReplayListener<E> {
    store: Arc<dyn EventStore>,
    mapper: Arc<EventMapper<E>>,
    watermark: Watermark,
    options: ReplayOptions,
    event_types: Option<Vec<String>>,
}

impl<E: Event> ReplayListener<E> {
    /// Creates a replay listener over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, mapper: Arc<EventMapper<E>>, watermark: Watermark) -> Self {
        Self {
            store,
            mapper,
            watermark,
            options: ReplayOptions::default(),
            event_types: None,
        }
    }

    /// Sets the replay page size.
    #[must_use]
    pub fn with_options(mut self, options: ReplayOptions) -> Self {
        self.options = options;
        self
    }
}

struct MappingHandler<'a, E> {
    mapper: &'a EventMapper<E>,
    handler: &'a dyn BatchHandler<E>,
}

#[async_trait]
impl<E: Event> ReplayHandler for MappingHandler<'_, E> {
    async fn handle(&self, events: Vec<StreamEvent>) -> Result<(), BoxError> {
        let events = events
            .iter()
            .map(|event| self.mapper.map_stream_event(event))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| Box::new(ListenerError::Mapper(err)) as BoxError)?;
        self.handler.handle(events).await
    }
}

#[async_trait]
impl<E: Event> Listener<E> for ReplayListener<E> {
    async fn initialize(
        &mut self,
        _name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        self.event_types = Some(event_types.to_vec());
        Ok(())
    }

    #[instrument(skip_all)]
    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let event_types = self
            .event_types
            .as_deref()
            .ok_or(ListenerError::NotInitialized)?;
        let since = (self.watermark)();
        info!(%since, ?event_types, "replaying history");

        let mapping = MappingHandler {
            mapper: &self.mapper,
            handler,
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("replay cancelled");
                Ok(())
            }
            result = self.store.replay_events_by_type(event_types, since, &mapping, self.options) => {
                result.map_err(|err| match err {
                    EventStoreError::Replay(source) => handler_error(source),
                    other => ListenerError::Store(other),
                })
            }
        }
    }
}
