//! Catch-up Core: event-sourcing abstractions.
//!
//! This crate defines the event model, the append-only store contract, the
//! event-type registry and the aggregate contract that every other crate in
//! the workspace depends on. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod mapper;
pub mod repository;
pub mod store;
pub mod stream;
