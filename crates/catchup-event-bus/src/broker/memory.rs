//! In-process broker with AMQP routing semantics, for tests and single-node
//! runs.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::Notify;
use tracing::{debug, instrument};

use super::{
    Acknowledger, Broker, BrokerError, Delivery, DeliveryStream, ExchangeKind, HeaderValue,
    Headers, Message,
};

const X_MATCH: &str = "x-match";

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    exchanges: Vec<String>,
    queues: Vec<(String, Headers)>,
}

#[derive(Debug)]
struct Pending {
    message: Message,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct Queue {
    ready: VecDeque<Pending>,
    outstanding: HashMap<u64, Message>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Topology {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    next_tag: u64,
}

impl Topology {
    fn queue_mut(&mut self, name: &str) -> Result<&mut Queue, BrokerError> {
        self.queues.get_mut(name).ok_or_else(|| BrokerError::NotDeclared {
            kind: "queue",
            name: name.to_owned(),
        })
    }

    fn route(
        &self,
        exchange: &str,
        message: &Message,
        visited: &mut HashSet<String>,
        targets: &mut BTreeSet<String>,
    ) {
        if !visited.insert(exchange.to_owned()) {
            return;
        }
        let Some(exchange) = self.exchanges.get(exchange) else {
            return;
        };
        for (queue, arguments) in &exchange.queues {
            if exchange.kind == ExchangeKind::Fanout || headers_match(arguments, &message.headers) {
                targets.insert(queue.clone());
            }
        }
        for destination in &exchange.exchanges {
            self.route(destination, message, visited, targets);
        }
    }
}

fn headers_match(arguments: &Headers, headers: &Headers) -> bool {
    let match_any = matches!(arguments.get(X_MATCH), Some(HeaderValue::String(mode)) if mode == "any");
    let mut criteria = arguments
        .iter()
        .filter(|(key, _)| !key.starts_with("x-"))
        .map(|(key, value)| headers.get(key) == Some(value));
    if match_any {
        criteria.any(|matched| matched)
    } else {
        criteria.all(|matched| matched)
    }
}

/// Broker that keeps exchanges and queues in process memory.
///
/// Deliveries still unsettled when their consumer stream is dropped go back to
/// the front of the queue flagged as redelivered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    topology: Arc<Mutex<Topology>>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of messages waiting in `queue`, not counting unsettled
    /// deliveries.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.topology().queues.get(queue).map_or(0, |q| q.ready.len())
    }
}

fn lock(topology: &Mutex<Topology>) -> MutexGuard<'_, Topology> {
    topology.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Consumer {
    topology: Arc<Mutex<Topology>>,
    queue: String,
    notify: Arc<Notify>,
    held: Arc<Mutex<HashSet<u64>>>,
}

impl Consumer {
    fn try_take(&self) -> Option<Delivery> {
        let mut topology = lock(&self.topology);
        topology.next_tag += 1;
        let tag = topology.next_tag;
        let queue = topology.queues.get_mut(&self.queue)?;
        let pending = queue.ready.pop_front()?;
        queue.outstanding.insert(tag, pending.message.clone());
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag);

        let acknowledger = MemoryAcknowledger {
            topology: Arc::clone(&self.topology),
            queue: self.queue.clone(),
            held: Arc::clone(&self.held),
            tag,
        };
        Some(Delivery::new(
            pending.message,
            pending.redelivered,
            Box::new(acknowledger),
        ))
    }

    async fn next_delivery(&self) -> Delivery {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(delivery) = self.try_take() {
                return delivery;
            }
            notified.await;
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let held: Vec<u64> = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if held.is_empty() {
            return;
        }
        let mut topology = lock(&self.topology);
        let Some(queue) = topology.queues.get_mut(&self.queue) else {
            return;
        };
        let mut requeued: Vec<(u64, Message)> = held
            .into_iter()
            .filter_map(|tag| queue.outstanding.remove(&tag).map(|m| (tag, m)))
            .collect();
        requeued.sort_by_key(|(tag, _)| *tag);
        for (_, message) in requeued.into_iter().rev() {
            queue.ready.push_front(Pending {
                message,
                redelivered: true,
            });
        }
        queue.notify.notify_waiters();
    }
}

struct MemoryAcknowledger {
    topology: Arc<Mutex<Topology>>,
    queue: String,
    held: Arc<Mutex<HashSet<u64>>>,
    tag: u64,
}

impl MemoryAcknowledger {
    fn settle(&self) -> Result<(Message, Arc<Notify>), BrokerError> {
        let mut topology = lock(&self.topology);
        let queue = topology.queue_mut(&self.queue)?;
        let message = queue
            .outstanding
            .remove(&self.tag)
            .ok_or(BrokerError::UnknownDelivery(self.tag))?;
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.tag);
        Ok((message, Arc::clone(&queue.notify)))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.settle().map(|_| ())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        let (message, notify) = self.settle()?;
        if requeue {
            let mut topology = lock(&self.topology);
            topology.queue_mut(&self.queue)?.ready.push_back(Pending {
                message,
                redelivered: true,
            });
            drop(topology);
            notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.topology()
            .exchanges
            .entry(name.to_owned())
            .or_insert_with(|| Exchange {
                kind,
                exchanges: Vec::new(),
                queues: Vec::new(),
            });
        Ok(())
    }

    async fn bind_exchange(&self, destination: &str, source: &str) -> Result<(), BrokerError> {
        let mut topology = self.topology();
        if !topology.exchanges.contains_key(destination) {
            return Err(BrokerError::NotDeclared {
                kind: "exchange",
                name: destination.to_owned(),
            });
        }
        let source = topology
            .exchanges
            .get_mut(source)
            .ok_or_else(|| BrokerError::NotDeclared {
                kind: "exchange",
                name: source.to_owned(),
            })?;
        if !source.exchanges.iter().any(|d| d == destination) {
            source.exchanges.push(destination.to_owned());
        }
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.topology().queues.entry(name.to_owned()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        arguments: Headers,
    ) -> Result<(), BrokerError> {
        let mut topology = self.topology();
        topology.queue_mut(queue)?;
        let exchange = topology
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::NotDeclared {
                kind: "exchange",
                name: exchange.to_owned(),
            })?;
        let binding = (queue.to_owned(), arguments);
        if !exchange.queues.contains(&binding) {
            exchange.queues.push(binding);
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(message_id = ?message.message_id))]
    async fn publish(&self, exchange: &str, message: Message) -> Result<(), BrokerError> {
        let mut topology = self.topology();
        if !topology.exchanges.contains_key(exchange) {
            return Err(BrokerError::NotDeclared {
                kind: "exchange",
                name: exchange.to_owned(),
            });
        }
        let mut targets = BTreeSet::new();
        topology.route(exchange, &message, &mut HashSet::new(), &mut targets);
        debug!(queues = targets.len(), "message routed");

        for name in targets {
            if let Some(queue) = topology.queues.get_mut(&name) {
                queue.ready.push_back(Pending {
                    message: message.clone(),
                    redelivered: false,
                });
                queue.notify.notify_waiters();
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let notify = Arc::clone(&self.topology().queue_mut(queue)?.notify);
        let consumer = Consumer {
            topology: Arc::clone(&self.topology),
            queue: queue.to_owned(),
            notify,
            held: Arc::new(Mutex::new(HashSet::new())),
        };
        let deliveries = stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await;
            Some((Ok(delivery), consumer))
        });
        Ok(deliveries.boxed())
    }
}
