//! Read-model worker: wires the event store, broker, cluster lock and dedup
//! window into one catch-up listener and logs every event it receives.

pub mod config;
pub mod error;
pub mod worker;
