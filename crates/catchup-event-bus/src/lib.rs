//! Catch-up event bus.
//!
//! Publishes committed events to a message broker and delivers history plus
//! live events to read-model builders through composable listeners:
//!
//! ```text
//! Deduplicate(Locked(Sequence([Replay(store), Queue(broker)])))
//! ```

pub mod broker;
pub mod dedup;
pub mod listener;
pub mod publisher;

pub use broker::{AmqpBroker, Broker, BrokerError, InMemoryBroker};
pub use dedup::{
    DedupError, EventCallback, EventDeduplicator, MemoryDeduplicator, RedisDeduplicator,
};
pub use listener::{
    BatchHandler, CatchUpDependencies, CatchUpListener, CatchUpListenerFactory,
    DeduplicatorFactory, Listener, ListenerError,
};
pub use publisher::{BrokerEventPublisher, FANOUT_EXCHANGE, ROUTED_EXCHANGE};
