//! Live events from the broker.

use std::sync::Arc;

use async_trait::async_trait;
use catchup_core::event::Event;
use catchup_core::mapper::EventMapper;
use catchup_core::stream::StreamEvent;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{BatchHandler, Listener, ListenerError};
use crate::broker::{Broker, BrokerError, Delivery, Headers};
use crate::publisher::{ROUTED_EXCHANGE, declare_event_exchanges};

/// Consumes a durable queue named after the listener, bound to
/// `ROUTED_EXCHANGE` once per event type.
///
/// Each message is delivered as a single-event batch and acknowledged only if
/// the handler succeeds. Messages that fail to decode or to handle are logged
/// and left unacknowledged; the broker redelivers them once this consumer
/// goes away. Runs until cancelled.
pub struct QueueListener<E> {
    broker: Arc<dyn Broker>,
    mapper: Arc<EventMapper<E>>,
    queue: Option<String>,
}

impl<E: Event> QueueListener<E> {
    /// Creates a queue listener on `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, mapper: Arc<EventMapper<E>>) -> Self {
        Self {
            broker,
            mapper,
            queue: None,
        }
    }

    fn decode(&self, body: &[u8]) -> Result<E, ListenerError> {
        let event: StreamEvent = serde_json::from_slice(body)?;
        Ok(self.mapper.map_stream_event(&event)?)
    }

    async fn process(&self, delivery: Delivery, handler: &dyn BatchHandler<E>) {
        let message_id = delivery.message.message_id.clone().unwrap_or_default();
        let event = match self.decode(&delivery.message.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(%message_id, error = %err, "undecodable message left unacknowledged");
                return;
            }
        };
        if let Err(err) = handler.handle(vec![event]).await {
            warn!(%message_id, error = %err, "handler failed, message left unacknowledged");
            return;
        }
        match delivery.ack().await {
            Ok(()) => debug!(%message_id, "message acknowledged"),
            Err(err) => warn!(%message_id, error = %err, "could not acknowledge message"),
        }
    }
}

#[async_trait]
impl<E: Event> Listener<E> for QueueListener<E> {
    #[instrument(skip(self, event_types), fields(event_type_count = event_types.len()))]
    async fn initialize(
        &mut self,
        name: &str,
        event_types: &[String],
    ) -> Result<(), ListenerError> {
        declare_event_exchanges(self.broker.as_ref()).await?;
        self.broker.declare_queue(name).await?;
        for event_type in event_types {
            let mut arguments = Headers::new();
            arguments.insert("event_type".to_owned(), event_type.clone().into());
            self.broker
                .bind_queue(name, ROUTED_EXCHANGE, arguments)
                .await?;
        }
        self.queue = Some(name.to_owned());
        debug!("queue bound");
        Ok(())
    }

    async fn listen(
        &self,
        cancel: &CancellationToken,
        handler: &dyn BatchHandler<E>,
    ) -> Result<(), ListenerError> {
        let queue = self.queue.as_deref().ok_or(ListenerError::NotInitialized)?;
        if cancel.is_cancelled() {
            return Ok(());
        }
        let consumer_tag = format!("{queue}.{}", std::process::id());
        let mut deliveries = self.broker.consume(queue, &consumer_tag).await?;
        info!(queue, "consuming live events");

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(queue, "consumer stopped");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };
            let Some(delivery) = next else {
                return Err(BrokerError::ConsumerClosed(queue.to_owned()).into());
            };
            self.process(delivery?, handler).await;
        }
    }
}
