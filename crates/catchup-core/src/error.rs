//! Error types shared by stores, mappers and repositories.

use std::error::Error;

use thiserror::Error;

use crate::event::StreamKey;

/// Boxed error used where a collaborator's error type is opaque.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors raised by an `EventStore`.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The caller's expected revision does not match the stream's latest version.
    #[error("concurrency conflict on stream {stream_key}: expected revision {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_key: StreamKey,
        /// The revision the caller expected.
        expected: i64,
        /// The stream's actual latest version.
        actual: i64,
    },

    /// A concurrent writer committed first (serialization failure or a
    /// sequence number collision).
    #[error("write conflict on stream {stream_key}: {reason}")]
    WriteConflict {
        /// The stream being appended to.
        stream_key: StreamKey,
        /// Database-level description of the conflict.
        reason: String,
    },

    /// An event in the batch belongs to a different stream.
    #[error("event {event_id} belongs to stream {actual}, not {expected}")]
    StreamKeyMismatch {
        /// The offending event.
        event_id: String,
        /// The stream the batch is being appended to.
        expected: StreamKey,
        /// The stream named by the event itself.
        actual: StreamKey,
    },

    /// An event id was reused, within the batch or against the log.
    #[error("duplicate event id: {0}")]
    DuplicateEventId(String),

    /// The event payload cannot be stored as-is.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The replay batch handler failed; replay stops at that page.
    #[error("replay handler failed: {0}")]
    Replay(#[source] BoxError),

    /// Events were committed but could not be forwarded to the publisher.
    #[error("publish failed after commit: {0}")]
    Publish(#[source] BoxError),

    /// A persistence or connectivity failure.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl EventStoreError {
    /// Returns `true` for errors that a caller resolves by reloading the
    /// aggregate and retrying the command.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::WriteConflict { .. }
        )
    }
}

/// Errors raised by the `EventMapper` registry.
#[derive(Debug, Error)]
pub enum MapperError {
    /// A decoder for this event type was registered twice.
    #[error("event type {0} is already registered")]
    AlreadyRegistered(String),

    /// No decoder exists for this event type.
    #[error("unregistered event type: {0}")]
    Unregistered(String),

    /// The payload did not decode into the registered type.
    #[error("failed to decode event type {event_type}: {source}")]
    Decode {
        /// The event type being decoded.
        event_type: String,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by `AggregateRepository`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The event store rejected or failed the operation.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// A loaded event could not be decoded.
    #[error(transparent)]
    Mapping(#[from] MapperError),

    /// A new event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
