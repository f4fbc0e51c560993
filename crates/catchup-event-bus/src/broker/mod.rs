//! Message broker abstraction.
//!
//! Models the slice of AMQP the event bus needs: durable fanout and headers
//! exchanges, durable queues bound by header match, persistent publishing and
//! manually acknowledged consumption.

mod amqp;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

pub use amqp::AmqpBroker;
pub use memory::InMemoryBroker;

/// Errors raised by a `Broker`.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The AMQP client reported a failure.
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// An exchange or queue was used before being declared.
    #[error("{kind} {name} is not declared")]
    NotDeclared {
        /// `"exchange"` or `"queue"`.
        kind: &'static str,
        /// The missing name.
        name: String,
    },

    /// The consumer stream ended.
    #[error("consumer on queue {0} closed")]
    ConsumerClosed(String),

    /// The delivery was already settled or its consumer is gone.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    /// A message body could not be encoded.
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Exchange routing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Copies every message to every binding.
    Fanout,
    /// Routes by matching message headers against binding arguments.
    Headers,
}

/// A message header or binding argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Text value.
    String(String),
    /// Integer value.
    Int(i64),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Message headers or binding arguments.
pub type Headers = BTreeMap<String, HeaderValue>;

/// A message as published or delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Raw body.
    pub body: Vec<u8>,
    /// Routing headers.
    pub headers: Headers,
    /// MIME type of the body.
    pub content_type: Option<String>,
    /// Application message id.
    pub message_id: Option<String>,
    /// Application message type.
    pub message_type: Option<String>,
    /// Correlation id.
    pub correlation_id: Option<String>,
    /// Application timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether the broker should write the message to disk.
    pub persistent: bool,
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges successful processing.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Rejects the delivery, optionally putting it back on the queue.
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A consumed message awaiting settlement.
///
/// A delivery that is dropped without `ack`/`nack` stays outstanding and is
/// redelivered once its consumer goes away.
pub struct Delivery {
    /// The delivered message.
    pub message: Message,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
    acknowledger: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a delivery settled through `acknowledger`.
    #[must_use]
    pub fn new(message: Message, redelivered: bool, acknowledger: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            redelivered,
            acknowledger,
        }
    }

    /// Acknowledges the delivery.
    ///
    /// # Errors
    ///
    /// Returns the broker's error if the acknowledgement is refused.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acknowledger.ack().await
    }

    /// Rejects the delivery.
    ///
    /// # Errors
    ///
    /// Returns the broker's error if the rejection is refused.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.acknowledger.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Operations the event bus performs against a message broker. Declarations
/// are idempotent.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a durable exchange.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Routes everything published to `source` into `destination` as well.
    async fn bind_exchange(&self, destination: &str, source: &str) -> Result<(), BrokerError>;

    /// Declares a durable queue.
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    /// Binds `queue` to `exchange`. On a headers exchange, a message matches
    /// when every argument equals the message header of the same name.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        arguments: Headers,
    ) -> Result<(), BrokerError>;

    /// Publishes `message` to `exchange`.
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BrokerError>;

    /// Starts consuming `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        (**self).declare_exchange(name, kind).await
    }

    async fn bind_exchange(&self, destination: &str, source: &str) -> Result<(), BrokerError> {
        (**self).bind_exchange(destination, source).await
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        (**self).declare_queue(name).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        arguments: Headers,
    ) -> Result<(), BrokerError> {
        (**self).bind_queue(queue, exchange, arguments).await
    }

    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BrokerError> {
        (**self).publish(exchange, message).await
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        (**self).consume(queue, consumer_tag).await
    }
}
