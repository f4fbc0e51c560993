//! Broker-backed `EventPublisher`.
//!
//! Events are published to a fanout exchange that is bound to a headers
//! exchange; listener queues bind to the headers exchange by `event_type`.

use async_trait::async_trait;
use catchup_core::error::BoxError;
use catchup_core::store::EventPublisher;
use catchup_core::stream::StreamEvent;
use tracing::{debug, instrument};

use crate::broker::{Broker, BrokerError, ExchangeKind, Headers, Message};

/// Exchange every committed event is published to.
pub const FANOUT_EXCHANGE: &str = "events.fanout";

/// Headers exchange listener queues bind to.
pub const ROUTED_EXCHANGE: &str = "events.routed";

const CONTENT_TYPE: &str = "application/json";

/// Declares both event exchanges and routes the fanout into the headers
/// exchange. Idempotent.
///
/// # Errors
///
/// Returns the broker's error if a declaration fails.
pub async fn declare_event_exchanges(broker: &dyn Broker) -> Result<(), BrokerError> {
    broker
        .declare_exchange(FANOUT_EXCHANGE, ExchangeKind::Fanout)
        .await?;
    broker
        .declare_exchange(ROUTED_EXCHANGE, ExchangeKind::Headers)
        .await?;
    broker.bind_exchange(ROUTED_EXCHANGE, FANOUT_EXCHANGE).await
}

/// Builds the broker message for a persisted event: the JSON-encoded event
/// with its identity copied into routing headers.
///
/// # Errors
///
/// Returns `serde_json::Error` if the event cannot be encoded.
pub fn event_message(event: &StreamEvent) -> Result<Message, serde_json::Error> {
    let mut headers = Headers::new();
    headers.insert("event_type".to_owned(), event.event_type.clone().into());
    headers.insert("stream_id".to_owned(), event.stream_id.clone().into());
    headers.insert("stream_type".to_owned(), event.stream_type.clone().into());
    headers.insert(
        "correlation_id".to_owned(),
        event.correlation_id.clone().into(),
    );
    headers.insert("sequence_no".to_owned(), event.sequence_no.into());
    headers.insert(
        "event_version".to_owned(),
        i64::from(event.event_version).into(),
    );

    Ok(Message {
        body: serde_json::to_vec(event)?,
        headers,
        content_type: Some(CONTENT_TYPE.to_owned()),
        message_id: Some(event.event_id.clone()),
        message_type: Some(event.event_type.clone()),
        correlation_id: Some(event.correlation_id.clone()),
        timestamp: Some(event.event_time),
        persistent: true,
    })
}

/// Publishes persisted events to `FANOUT_EXCHANGE`.
#[derive(Debug, Clone)]
pub struct BrokerEventPublisher<B> {
    broker: B,
}

impl<B: Broker> BrokerEventPublisher<B> {
    /// Creates a publisher over `broker`. Call `init` before publishing.
    #[must_use]
    pub fn new(broker: B) -> Self {
        Self { broker }
    }

    /// Declares the event exchanges.
    ///
    /// # Errors
    ///
    /// Returns the broker's error if a declaration fails.
    pub async fn init(&self) -> Result<(), BrokerError> {
        declare_event_exchanges(&self.broker).await
    }

    /// Publishes `events` one by one, in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError` if an event cannot be encoded or published.
    #[instrument(skip(self, events), fields(event_count = events.len()))]
    pub async fn publish(&self, events: &[StreamEvent]) -> Result<(), BrokerError> {
        for event in events {
            self.broker
                .publish(FANOUT_EXCHANGE, event_message(event)?)
                .await?;
            debug!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                "event published"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Broker> EventPublisher for BrokerEventPublisher<B> {
    async fn publish_events(&self, events: &[StreamEvent]) -> Result<(), BoxError> {
        self.publish(events).await.map_err(Into::into)
    }
}
