//! Aggregate contract.

use crate::event::{Event, StreamKey};

/// Trait for event-sourced entities that a generic repository can load and save.
///
/// `version` counts committed events only. Replayed events advance it
/// directly; new events are buffered in `changes` until
/// `mark_as_committed` folds them into the version.
pub trait Aggregate: Send + Sync {
    /// The event type this aggregate produces and consumes.
    type Event: Event;

    /// Creates an empty aggregate for `stream_key`.
    fn new(stream_key: StreamKey) -> Self
    where
        Self: Sized;

    /// Returns the key of the aggregate's stream.
    fn stream_key(&self) -> &StreamKey;

    /// Returns the number of committed events.
    fn version(&self) -> i64;

    /// Applies an event. `is_new` is `false` during replay (the version
    /// advances) and `true` for freshly raised events (buffered in `changes`).
    fn apply(&mut self, event: Self::Event, is_new: bool);

    /// Returns the events raised since the last commit.
    fn changes(&self) -> &[Self::Event];

    /// Folds `changes` into `version` and clears the buffer.
    fn mark_as_committed(&mut self);
}
