//! Event store implementations.
//!
//! `PgEventStore` is the durable store. `InMemoryEventStore` follows the same
//! rules for tests and single-process tools, and `PublishingEventStore`
//! forwards committed events to an `EventPublisher`.

pub mod in_memory;
pub mod pg_event_store;
pub mod publishing;
pub mod schema;

pub use in_memory::InMemoryEventStore;
pub use pg_event_store::PgEventStore;
pub use publishing::PublishingEventStore;
