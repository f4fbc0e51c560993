//! Mock events: a single registered event type on a single stream.

use catchup_core::event::{Event, EventEnvelope, StreamKey};
use catchup_core::mapper::EventMapper;
use catchup_core::stream::StreamEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type of every `MockEvent`.
pub const MOCK_EVENT_TYPE: &str = "mock-event";
/// Stream type of every `MockEvent`.
pub const MOCK_STREAM_TYPE: &str = "mock-aggregate";
/// Stream id of every `MockEvent`.
pub const MOCK_STREAM_ID: &str = "mock-id";

/// An event carrying nothing but its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockEvent {
    /// The identity fields.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
}

impl Event for MockEvent {
    fn envelope(&self) -> &EventEnvelope {
        &self.envelope
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// The key of the mock stream.
#[must_use]
pub fn mock_stream_key() -> StreamKey {
    StreamKey::new(MOCK_STREAM_TYPE, MOCK_STREAM_ID)
}

/// A mock event with the given id and no time.
#[must_use]
pub fn mock_event(event_id: &str) -> MockEvent {
    MockEvent {
        envelope: EventEnvelope::new(MOCK_EVENT_TYPE, &mock_stream_key()).with_event_id(event_id),
    }
}

/// A mock event with the given id and time.
#[must_use]
pub fn mock_event_at(event_id: &str, event_time: DateTime<Utc>) -> MockEvent {
    MockEvent {
        envelope: EventEnvelope::new(MOCK_EVENT_TYPE, &mock_stream_key())
            .with_event_id(event_id)
            .with_event_time(event_time),
    }
}

/// A persisted mock event, as a store or broker would deliver it.
///
/// # Panics
///
/// Panics if the mock event cannot be serialized.
#[must_use]
pub fn mock_stream_event(event_id: &str, sequence_no: i64, event_time: DateTime<Utc>) -> StreamEvent {
    let mut event = mock_event_at(event_id, event_time);
    event.envelope.sequence_no = sequence_no;
    event.envelope.correlation_id = "mock-correlation".to_owned();
    StreamEvent {
        stream_type: MOCK_STREAM_TYPE.to_owned(),
        stream_id: MOCK_STREAM_ID.to_owned(),
        sequence_no,
        event_id: event_id.to_owned(),
        event_type: MOCK_EVENT_TYPE.to_owned(),
        event_version: 1,
        event_time,
        correlation_id: "mock-correlation".to_owned(),
        payload: event.to_payload().expect("mock event serializes"),
    }
}

/// A mapper with `MOCK_EVENT_TYPE` registered.
///
/// # Panics
///
/// Never in practice; registration into a fresh mapper cannot collide.
#[must_use]
pub fn mock_mapper() -> EventMapper<MockEvent> {
    let mut mapper = EventMapper::new();
    mapper
        .register_json::<MockEvent>(MOCK_EVENT_TYPE)
        .expect("fresh mapper accepts registration");
    mapper
}
